use std::sync::Arc;

use nsmc::{
    LinearModel, NestedSampler, NestedSamplingConfig, NormalLikelihood, NsError, Summary,
    UniformPrior,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;

fn main() -> Result<(), NsError> {
    tracing_subscriber::fmt::init();

    let (slope, offset, sigma) = (1.5, 10.0, 0.5);
    let rng = &mut ChaCha8Rng::seed_from_u64(2024);
    let noise = Normal::new(0.0, sigma).map_err(|_| {
        NsError::Config(nsmc::ConfigError::NonPositive {
            field: "sigma",
            value: sigma,
        })
    })?;

    let covariates: Vec<f64> = (0..40).map(|idx| idx as f64 * 0.25).collect();
    let observations: Vec<f64> = covariates
        .iter()
        .map(|x| slope * x + offset + rand::distributions::Distribution::sample(&noise, rng))
        .collect();
    let uncertainties = vec![sigma; observations.len()];

    let model = Arc::new(LinearModel::new(covariates));
    let likelihood = NormalLikelihood::new(observations, uncertainties, model)?;
    let prior = Arc::new(UniformPrior::new(vec![0.5, 2.0], vec![3.0, 20.0])?);

    let config = match std::env::args().nth(1) {
        Some(path) => NestedSamplingConfig::from_path(path)?,
        None => NestedSamplingConfig::default(),
    };
    let mut nest = NestedSampler::with_kmeans(Arc::new(likelihood), prior.clone(), config)?;
    let result = nest.run()?;
    println!("true slope {slope}, true offset {offset}");
    result.print_summary();
    result.write_to_dir("output", "Inference_")?;
    prior.write_hyper_parameters("output/Inference_hyperParametersUniform.txt")?;
    Ok(())
}
