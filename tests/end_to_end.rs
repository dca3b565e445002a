use std::sync::Arc;

use nsmc::{
    LinearModel, NestedSampler, NestedSamplingConfig, NormalLikelihood, SamplerResult,
    TerminationReason, UniformPrior,
};
use nsmc::likelihood::Likelihood;
use rand::distributions::Distribution;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use statrs::distribution::Normal;

const SLOPE: f64 = 1.5;
const OFFSET: f64 = 10.0;
const SIGMA: f64 = 1.0;
const MINIMA: [f64; 2] = [0.5, 2.0];
const MAXIMA: [f64; 2] = [3.0, 20.0];

fn likelihood() -> NormalLikelihood {
    let rng = &mut ChaCha8Rng::seed_from_u64(99);
    let noise = Normal::new(0.0, SIGMA).unwrap();
    let covariates: Vec<f64> = (0..30).map(|idx| idx as f64 / 3.0).collect();
    let observations = covariates
        .iter()
        .map(|x| SLOPE * x + OFFSET + noise.sample(rng))
        .collect::<Vec<_>>();
    let uncertainties = vec![SIGMA; observations.len()];
    NormalLikelihood::new(
        observations,
        uncertainties,
        Arc::new(LinearModel::new(covariates)),
    )
    .unwrap()
}

fn config(seed: u64) -> NestedSamplingConfig {
    let mut config = NestedSamplingConfig::default();
    config.seed = seed;
    config.sampler.initial_nobjects = 500;
    config.sampler.min_nobjects = 50;
    config.sampler.ninitial_iterations_without_clustering = 500;
    config.sampler.niterations_with_same_clustering = 50;
    config.clustering.max_nclusters = 3;
    config.clustering.ntrials = 5;
    config
}

fn run(config: NestedSamplingConfig) -> SamplerResult {
    let prior = UniformPrior::new(MINIMA.to_vec(), MAXIMA.to_vec()).unwrap();
    let mut nest =
        NestedSampler::with_kmeans(Arc::new(likelihood()), Arc::new(prior), config).unwrap();
    nest.run().unwrap()
}

/// Evidence by midpoint quadrature over the prior box.
fn grid_ln_evidence() -> f64 {
    let likelihood = likelihood();
    let n = 600;
    let widths = [(MAXIMA[0] - MINIMA[0]) / n as f64, (MAXIMA[1] - MINIMA[1]) / n as f64];
    let mut terms = Vec::with_capacity(n * n);
    for i in 0..n {
        for j in 0..n {
            let x = [
                MINIMA[0] + (i as f64 + 0.5) * widths[0],
                MINIMA[1] + (j as f64 + 0.5) * widths[1],
            ];
            terms.push(likelihood.ln_likelihood(&x).unwrap());
        }
    }
    let max = terms.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let sum: f64 = terms.iter().map(|t| (t - max).exp()).sum();
    max + (sum / (n * n) as f64).ln()
}

#[test]
fn recovers_linear_model() {
    let result = run(config(5));
    assert_eq!(result.termination, TerminationReason::Converged);
    assert!(result.ln_evidence.is_finite());
    assert!(result.ln_evidence_error > 0.0);

    let expected = grid_ln_evidence();
    assert!(
        (result.ln_evidence - expected).abs() < 4.0 * result.ln_evidence_error + 0.2,
        "ln Z = {} +/- {}, quadrature gives {}",
        result.ln_evidence,
        result.ln_evidence_error,
        expected
    );

    let mean = result.posterior_mean();
    let std = result.posterior_std();
    for (idx, truth) in [SLOPE, OFFSET].into_iter().enumerate() {
        assert!(std[idx] > 0.0);
        assert!(
            (mean[idx] - truth).abs() < 3.0 * std[idx],
            "parameter {idx}: {} +/- {}, truth {truth}",
            mean[idx],
            std[idx]
        );
    }

    let total: f64 = result.posterior_probabilities().iter().sum();
    assert!((total - 1.0).abs() < 1e-8);
    assert!(result.final_nobjects >= 50);
    assert!(result.final_nobjects <= 500);
    assert_eq!(result.archive.len(), result.niterations + result.final_nobjects);
}

#[test]
fn archive_is_ordered() {
    let result = run(config(6));
    let removed = &result.archive[..result.niterations];
    assert!(removed
        .windows(2)
        .all(|pair| pair[1].ln_remaining_prior_mass < pair[0].ln_remaining_prior_mass));
    assert!(result
        .archive
        .windows(2)
        .all(|pair| pair[1].ln_likelihood >= pair[0].ln_likelihood));
    assert!(result.archive.iter().all(|point| {
        (0..2).all(|dim| (MINIMA[dim]..=MAXIMA[dim]).contains(&point.parameters[dim]))
    }));
}

#[test]
fn same_seed_same_run() {
    let first = run(config(7));
    let second = run(config(7));
    assert_eq!(first.ln_evidence, second.ln_evidence);
    assert_eq!(first.niterations, second.niterations);
    assert_eq!(first.archive.len(), second.archive.len());
    assert_eq!(
        first.archive.last().map(|p| p.parameters.clone()),
        second.archive.last().map(|p| p.parameters.clone())
    );
}

#[test]
fn parallel_draws_are_reproducible() {
    let mut parallel = config(8);
    parallel.sampler.npool = 4;
    let first = run(parallel.clone());
    let second = run(parallel);
    assert_eq!(first.ln_evidence, second.ln_evidence);
    assert_eq!(first.niterations, second.niterations);

    let expected = grid_ln_evidence();
    assert!((first.ln_evidence - expected).abs() < 4.0 * first.ln_evidence_error + 0.2);
}

#[test]
fn iteration_cap_stops_early() {
    let mut capped = config(9);
    capped.sampler.max_iterations = Some(100);
    let result = run(capped);
    assert_eq!(result.termination, TerminationReason::IterationCap);
    assert_eq!(result.niterations, 100);
    assert_eq!(result.archive.len(), 100 + result.final_nobjects);
}
