use std::sync::Arc;

use logsumexp::LogAddExp;
use nsmc::{
    Likelihood, LikelihoodError, NestedSampler, NestedSamplingConfig, NsError, Summary,
    UniformPrior,
};

/// Equal mixture of two narrow Gaussians placed on the diagonal.
struct TwoModes {
    centres: [f64; 2],
    sigma: f64,
}

impl Likelihood for TwoModes {
    fn ln_likelihood(&self, x: &[f64]) -> Result<f64, LikelihoodError> {
        let ndim = x.len() as f64;
        let norm = -ndim * (self.sigma * (2.0 * std::f64::consts::PI).sqrt()).ln();
        Ok(self
            .centres
            .iter()
            .map(|centre| {
                norm + 0.5_f64.ln()
                    - x.iter()
                        .map(|v| (v - centre).powi(2) / (2.0 * self.sigma.powi(2)))
                        .sum::<f64>()
            })
            .fold(f64::NEG_INFINITY, |acc, term| acc.ln_add_exp(term)))
    }
}

fn main() -> Result<(), NsError> {
    tracing_subscriber::fmt::init();

    let ndim = 2;
    let likelihood = TwoModes {
        centres: [-2.0, 2.0],
        sigma: 0.2,
    };
    let prior = UniformPrior::new(vec![-5.0; ndim], vec![5.0; ndim])?;

    let mut config = NestedSamplingConfig::default();
    config.sampler.ninitial_iterations_without_clustering = 500;
    config.sampler.npool = 4;
    config.clustering.max_nclusters = 4;
    let mut nest = NestedSampler::with_kmeans(Arc::new(likelihood), Arc::new(prior), config)?;
    let result = nest.run()?;

    println!(
        "expected ln evidence: {:.3}",
        -(ndim as f64) * 10_f64.ln()
    );
    println!("reclustered {} times", result.diagnostics.reclusterings);
    result.print_summary();
    Ok(())
}
