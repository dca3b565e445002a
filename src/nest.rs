use std::mem;
use std::sync::Arc;
use std::time::Instant;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cluster::{Clusterer, KmeansClusterer};
use crate::config::NestedSamplingConfig;
use crate::error::{ConfigError, LikelihoodError, NsError};
use crate::evidence::{EvidenceAccumulator, EvidenceStep};
use crate::likelihood::Likelihood;
use crate::metric::{EuclideanMetric, Metric};
use crate::point::{ArchivedPoint, LivePoint};
use crate::prior::Prior;
use crate::reducer::PowerlawReducer;
use crate::results::{Diagnostics, SamplerResult, TerminationReason};
use crate::sampler::{DrawOutcome, DrawStats, EllipsoidSampler};

/// Lifecycle of a sampler. Initialisation happens inside
/// [`NestedSampler::new`], and re-clustering and drawing are steps of a single
/// iteration, so neither is observable as a phase of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Sampling,
    Terminated,
}

/// Bookkeeping of the main loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerState {
    pub phase: Phase,
    pub iteration: usize,
    /// Log-likelihood of the last removed point.
    pub threshold: f64,
    pub nclusters: usize,
    /// Base enlargement fraction of the current iteration.
    pub enlargement_fraction: f64,
    /// Live-set size the sampler is shrinking towards.
    pub target_nobjects: usize,
    pub last_draw: DrawStats,
}

/// Multi-ellipsoidal nested sampler.
pub struct NestedSampler {
    likelihood: Arc<dyn Likelihood + Send + Sync>,
    prior: Arc<dyn Prior + Send + Sync>,
    clusterer: Arc<dyn Clusterer + Send + Sync>,
    sampler: EllipsoidSampler,
    reducer: PowerlawReducer,
    config: NestedSamplingConfig,
    live_points: Vec<LivePoint>,
    archive: Vec<ArchivedPoint>,
    evidence: EvidenceAccumulator,
    state: SamplerState,
    diagnostics: Diagnostics,
    rng: ChaCha8Rng,
}

impl NestedSampler {
    /// Validates `config` and draws the initial live points from the prior.
    pub fn new(
        likelihood: Arc<dyn Likelihood + Send + Sync>,
        prior: Arc<dyn Prior + Send + Sync>,
        clusterer: Arc<dyn Clusterer + Send + Sync>,
        metric: Arc<dyn Metric + Send + Sync>,
        config: NestedSamplingConfig,
    ) -> Result<Self, NsError> {
        config.validate()?;
        let ndim = prior.ndim();
        if config.sampler.min_nobjects <= ndim {
            return Err(ConfigError::TooFewLivePoints {
                min: config.sampler.min_nobjects,
                ndim,
            }
            .into());
        }
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let live_points = (0..config.sampler.initial_nobjects)
            .map(|_| {
                let parameters = prior.sample(&mut rng);
                let ln_likelihood = likelihood.ln_likelihood(&parameters)?;
                Ok(LivePoint::new(parameters, ln_likelihood, 0))
            })
            .collect::<Result<Vec<_>, LikelihoodError>>()?;
        let diagnostics = Diagnostics {
            likelihood_evaluations: live_points.len(),
            ..Diagnostics::default()
        };
        Ok(Self {
            likelihood,
            prior,
            clusterer,
            sampler: EllipsoidSampler::new(metric),
            reducer: PowerlawReducer::from_config(&config.reducer),
            state: SamplerState {
                phase: Phase::Sampling,
                iteration: 0,
                threshold: f64::NEG_INFINITY,
                nclusters: 1,
                enlargement_fraction: config.sampler.initial_enlargement_fraction,
                target_nobjects: config.sampler.initial_nobjects,
                last_draw: DrawStats::default(),
            },
            config,
            live_points,
            archive: Vec::new(),
            evidence: EvidenceAccumulator::new(),
            diagnostics,
            rng,
        })
    }

    /// Sampler using K-means clustering over the Euclidean metric.
    pub fn with_kmeans(
        likelihood: Arc<dyn Likelihood + Send + Sync>,
        prior: Arc<dyn Prior + Send + Sync>,
        config: NestedSamplingConfig,
    ) -> Result<Self, NsError> {
        let clusterer = KmeansClusterer::from_config(EuclideanMetric, &config.clustering);
        Self::new(
            likelihood,
            prior,
            Arc::new(clusterer),
            Arc::new(EuclideanMetric),
            config,
        )
    }

    pub fn live_points(&self) -> &[LivePoint] {
        &self.live_points
    }

    /// Points removed so far, in removal order.
    pub fn archive(&self) -> &[ArchivedPoint] {
        &self.archive
    }

    pub fn evidence(&self) -> &EvidenceAccumulator {
        &self.evidence
    }

    pub fn state(&self) -> &SamplerState {
        &self.state
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn config(&self) -> &NestedSamplingConfig {
        &self.config
    }

    /// Runs until the stopping rule fires.
    ///
    /// Fails if the live set would drop below `min_nobjects` because no valid
    /// replacement point could be drawn; the archive built so far stays
    /// available through [`NestedSampler::archive`]. Any error is final, later
    /// calls return [`NsError::Terminated`].
    pub fn run(&mut self) -> Result<SamplerResult, NsError> {
        if self.state.phase == Phase::Terminated {
            return Err(NsError::Terminated);
        }
        let start = Instant::now();
        info!(
            ndim = self.prior.ndim(),
            nobjects = self.live_points.len(),
            min_nobjects = self.config.sampler.min_nobjects,
            npool = self.config.sampler.npool,
            seed = self.config.seed,
            "starting nested sampling"
        );
        let termination = loop {
            if let Some(reason) = self.termination() {
                break reason;
            }
            if let Err(err) = self.iterate() {
                self.state.phase = Phase::Terminated;
                return Err(err);
            }
        };
        Ok(self.finalize(termination, &start))
    }

    fn termination(&self) -> Option<TerminationReason> {
        let (min, max) = likelihood_range(&self.live_points);
        if min == max {
            info!(ln_likelihood = max, "all live points have equal likelihood");
            return Some(TerminationReason::LikelihoodPlateau);
        }
        let ln_remaining = self.evidence.ln_remaining_evidence(max);
        if self
            .reducer
            .should_stop(self.evidence.ln_evidence, ln_remaining)
        {
            return Some(TerminationReason::Converged);
        }
        if let Some(cap) = self.config.sampler.max_iterations {
            if self.state.iteration >= cap {
                warn!(cap, "iteration cap reached before convergence");
                return Some(TerminationReason::IterationCap);
            }
        }
        None
    }

    /// One nested-sampling iteration: refit the ellipsoids, remove the worst
    /// live point and replace it unless the live set is being reduced.
    fn iterate(&mut self) -> Result<(), NsError> {
        let nobjects = self.live_points.len();
        self.update_ellipsoids()?;

        let Some(worst_idx) = worst_index(&self.live_points) else {
            return Err(NsError::LivePointFloor {
                iteration: self.state.iteration,
                nobjects,
                attempts: 0,
            });
        };
        let worst = self.live_points.swap_remove(worst_idx);
        let threshold = worst.ln_likelihood;
        let (evidence, step) = self.evidence.step(threshold, nobjects);
        self.record_step(&step);
        self.evidence = evidence;
        self.archive.push(ArchivedPoint::new(
            worst,
            step.ln_prior_mass,
            evidence.ln_remaining_prior_mass,
        ));
        self.state.threshold = threshold;

        if self.live_points.len() < self.state.target_nobjects {
            let outcome = self.draw_replacement(threshold)?;
            let stats = *outcome.stats();
            self.state.last_draw = stats;
            self.diagnostics.likelihood_evaluations += stats.likelihood_evaluations;
            self.diagnostics.proposals += stats.proposals;
            self.diagnostics.overlap_rejections += stats.overlap_rejections;
            match outcome {
                DrawOutcome::Accepted { point, .. } => self.live_points.push(point),
                DrawOutcome::Exhausted { stats } => {
                    self.diagnostics.draw_exhaustions += 1;
                    if self.live_points.len() < self.config.sampler.min_nobjects {
                        return Err(NsError::LivePointFloor {
                            iteration: self.state.iteration,
                            nobjects,
                            attempts: stats.attempts,
                        });
                    }
                    warn!(
                        iteration = self.state.iteration,
                        attempts = stats.attempts,
                        nobjects = self.live_points.len(),
                        "draw exhausted, continuing with fewer live points"
                    );
                    self.state.target_nobjects = self.live_points.len();
                }
            }
        } else {
            self.diagnostics.reduced_live_points += 1;
        }

        let (_, max) = likelihood_range(&self.live_points);
        let ln_remaining = self.evidence.ln_remaining_evidence(max);
        self.state.target_nobjects = self.reducer.updated_nobjects(
            self.state.target_nobjects,
            self.config.sampler.min_nobjects,
            self.evidence.ln_evidence,
            ln_remaining,
        );
        self.state.iteration += 1;
        if self.state.iteration % self.config.sampler.log_interval == 0 {
            self.print_update(max, ln_remaining);
        }
        Ok(())
    }

    /// Re-clusters on schedule, then fits one ellipsoid per cluster.
    fn update_ellipsoids(&mut self) -> Result<(), NsError> {
        let sampler_config = &self.config.sampler;
        let iteration = self.state.iteration;
        let without = sampler_config.ninitial_iterations_without_clustering;
        if iteration < without {
            self.live_points.iter_mut().for_each(|point| point.cluster = 0);
        } else if (iteration - without) % sampler_config.niterations_with_same_clustering == 0 {
            let points: Vec<Vec<f64>> = self
                .live_points
                .iter()
                .map(|point| point.parameters.clone())
                .collect();
            let partition = self.clusterer.partition(&points, &mut self.rng);
            for (point, &cluster) in self
                .live_points
                .iter_mut()
                .zip(partition.assignments.iter())
            {
                point.cluster = cluster;
            }
            self.diagnostics.reclusterings += 1;
            debug!(
                iteration,
                nclusters = partition.nclusters,
                sizes = ?partition.cluster_sizes(),
                "re-clustered live points"
            );
        }

        let enlargement_fraction = sampler_config.initial_enlargement_fraction
            * (sampler_config.shrinking_rate * self.evidence.ln_remaining_prior_mass).exp();
        let report = self
            .sampler
            .refit(&mut self.live_points, enlargement_fraction)?;
        self.state.enlargement_fraction = enlargement_fraction;
        self.state.nclusters = report.nclusters;
        self.diagnostics.merged_points += report.merged_points;
        self.diagnostics.regularized_ellipsoids += report.regularized;
        Ok(())
    }

    /// Draws a replacement serially, or fans out over `npool` rayon workers.
    ///
    /// Worker seeds come from the master generator and results are reduced in
    /// worker order, so a run is reproducible for a given seed and pool size.
    fn draw_replacement(&mut self, threshold: f64) -> Result<DrawOutcome, NsError> {
        let max_attempts = self.config.sampler.max_ndraw_attempts;
        let npool = self.config.sampler.npool;
        if npool <= 1 {
            return Ok(self.sampler.draw(
                self.prior.as_ref(),
                self.likelihood.as_ref(),
                threshold,
                max_attempts,
                &mut self.rng,
            )?);
        }

        let seeds: Vec<u64> = (0..npool).map(|_| self.rng.gen()).collect();
        let budget = max_attempts.div_ceil(npool);
        let sampler = &self.sampler;
        let prior = self.prior.as_ref();
        let likelihood = self.likelihood.as_ref();
        let outcomes: Vec<Result<DrawOutcome, LikelihoodError>> = seeds
            .par_iter()
            .map(|&seed| {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                sampler.draw(prior, likelihood, threshold, budget, &mut rng)
            })
            .collect();

        let mut stats = DrawStats::default();
        let mut accepted = None;
        for outcome in outcomes {
            let outcome = outcome?;
            stats.merge(outcome.stats());
            if accepted.is_none() {
                if let DrawOutcome::Accepted { point, .. } = outcome {
                    accepted = Some(point);
                }
            }
        }
        Ok(match accepted {
            Some(point) => DrawOutcome::Accepted { point, stats },
            None => DrawOutcome::Exhausted { stats },
        })
    }

    fn record_step(&mut self, step: &EvidenceStep) {
        if step.clamped {
            self.diagnostics.numerical_clamps += 1;
        }
    }

    fn print_update(&self, max_ln_likelihood: f64, ln_remaining: f64) {
        info!(
            iteration = self.state.iteration,
            ln_evidence = self.evidence.ln_evidence,
            threshold = self.state.threshold,
            max_ln_likelihood,
            ln_ratio = self.reducer.ln_ratio(self.evidence.ln_evidence, ln_remaining),
            nobjects = self.live_points.len(),
            nclusters = self.state.nclusters,
            enlargement = self.state.enlargement_fraction,
            ln_union_volume = self
                .state
                .last_draw
                .ln_union_volume(self.sampler.ln_total_volume()),
            "progress"
        );
    }

    /// Hands the remaining live points over to the archive, each with an equal
    /// share of the remaining prior mass.
    fn finalize(&mut self, termination: TerminationReason, start: &Instant) -> SamplerResult {
        let niterations = self.state.iteration;
        let nobjects = self.live_points.len();
        let mut remaining = mem::take(&mut self.live_points);
        remaining.sort_by(|a, b| a.ln_likelihood.total_cmp(&b.ln_likelihood));
        for point in remaining {
            let (evidence, step) = self.evidence.add_final_live(point.ln_likelihood, nobjects);
            self.record_step(&step);
            self.evidence = evidence;
            self.archive.push(ArchivedPoint::new(
                point,
                step.ln_prior_mass,
                evidence.ln_remaining_prior_mass,
            ));
        }
        self.state.phase = Phase::Terminated;
        let ln_evidence_error = self.evidence.ln_evidence_error(nobjects.max(1));
        info!(
            iterations = niterations,
            ln_evidence = self.evidence.ln_evidence,
            ln_evidence_error,
            information_gain = self.evidence.information_gain,
            termination = ?termination,
            "nested sampling finished"
        );
        SamplerResult {
            archive: self.archive.clone(),
            ln_evidence: self.evidence.ln_evidence,
            ln_evidence_error,
            information_gain: self.evidence.information_gain,
            niterations,
            final_nobjects: nobjects,
            nclusters: self.state.nclusters,
            termination,
            diagnostics: self.diagnostics,
            config: self.config.clone(),
            duration: start.elapsed(),
        }
    }
}

/// Index of the live point with the lowest log-likelihood.
pub fn worst_index(points: &[LivePoint]) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.ln_likelihood.total_cmp(&b.1.ln_likelihood))
        .map(|(idx, _)| idx)
}

fn likelihood_range(points: &[LivePoint]) -> (f64, f64) {
    points.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY),
        |(min, max), point| (min.min(point.ln_likelihood), max.max(point.ln_likelihood)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prior::UniformPrior;
    use std::ops::Range;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    struct Bowl;

    impl Likelihood for Bowl {
        fn ln_likelihood(&self, x: &[f64]) -> Result<f64, LikelihoodError> {
            Ok(-x.iter().map(|v| (v - 0.3).powi(2) / (2.0 * 0.01)).sum::<f64>())
        }
    }

    #[derive(Clone)]
    struct Flat;

    impl Likelihood for Flat {
        fn ln_likelihood(&self, _x: &[f64]) -> Result<f64, LikelihoodError> {
            Ok(0.0)
        }
    }

    fn small_config() -> NestedSamplingConfig {
        let mut config = NestedSamplingConfig::default();
        config.sampler.initial_nobjects = 100;
        config.sampler.min_nobjects = 20;
        config.sampler.ninitial_iterations_without_clustering = 50;
        config.sampler.niterations_with_same_clustering = 25;
        config.clustering.max_nclusters = 3;
        config.clustering.ntrials = 3;
        config.seed = 17;
        config
    }

    fn unit_prior() -> Arc<UniformPrior> {
        Arc::new(UniformPrior::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap())
    }

    #[test]
    fn worst_index_picks_global_minimum() {
        let points: Vec<LivePoint> = [-1.0, -5.0, 2.0, -5.5, 0.0]
            .iter()
            .map(|&l| LivePoint::new(vec![0.0], l, 0))
            .collect();
        assert_eq!(worst_index(&points), Some(3));
        assert_eq!(worst_index(&[]), None);
    }

    #[test]
    fn flat_likelihood_stops_on_plateau_with_unit_evidence() {
        let mut sampler =
            NestedSampler::with_kmeans(Arc::new(Flat), unit_prior(), small_config()).unwrap();
        let result = sampler.run().unwrap();
        assert_eq!(result.termination, TerminationReason::LikelihoodPlateau);
        assert_eq!(result.niterations, 0);
        assert!(result.ln_evidence.abs() < 1e-10);
        assert!(matches!(sampler.run(), Err(NsError::Terminated)));
    }

    #[test]
    fn gaussian_bowl_evidence() {
        // Z = (sqrt(2 pi) * 0.1)^2 up to negligible truncation by the unit square
        let expected = 2.0 * (0.1 * (2.0 * std::f64::consts::PI).sqrt()).ln();
        let mut sampler =
            NestedSampler::with_kmeans(Arc::new(Bowl), unit_prior(), small_config()).unwrap();
        let result = sampler.run().unwrap();
        assert_eq!(result.termination, TerminationReason::Converged);
        assert!(
            (result.ln_evidence - expected).abs() < 4.0 * result.ln_evidence_error.max(0.1),
            "ln Z = {} +/- {}, expected {}",
            result.ln_evidence,
            result.ln_evidence_error,
            expected
        );
        let mean = result.posterior_mean();
        assert!((mean[0] - 0.3).abs() < 0.05);
        assert!((mean[1] - 0.3).abs() < 0.05);
        assert!(result.diagnostics.reclusterings > 0);
    }

    #[test]
    fn too_few_live_points_for_dimension_is_rejected() {
        let mut config = small_config();
        config.sampler.min_nobjects = 2;
        assert!(matches!(
            NestedSampler::with_kmeans(Arc::new(Flat), unit_prior(), config),
            Err(NsError::Config(ConfigError::TooFewLivePoints { min: 2, ndim: 2 }))
        ));
    }

    #[test]
    fn unreachable_region_breaches_floor() {
        struct Ramp;
        impl Likelihood for Ramp {
            fn ln_likelihood(&self, x: &[f64]) -> Result<f64, LikelihoodError> {
                Ok(x[0] + x[1])
            }
        }
        let mut config = small_config();
        config.sampler.initial_nobjects = 20;
        config.sampler.min_nobjects = 20;
        config.sampler.max_ndraw_attempts = 1;
        config.sampler.initial_enlargement_fraction = 0.0;
        let mut sampler =
            NestedSampler::with_kmeans(Arc::new(Ramp), unit_prior(), config).unwrap();
        match sampler.run() {
            Err(NsError::LivePointFloor { attempts, .. }) => {
                assert_eq!(attempts, 1);
                assert!(!sampler.archive().is_empty());
            }
            other => panic!("expected the live-point floor to be breached, got {other:?}"),
        }
        assert_eq!(sampler.state().phase, Phase::Terminated);
        let archived = sampler.archive().len();
        assert!(matches!(sampler.run(), Err(NsError::Terminated)));
        assert_eq!(sampler.archive().len(), archived);
        assert!(sampler.live_points().len() < 20);
    }

    /// Bowl likelihood that rejects every candidate in a window of evaluations.
    struct Outage {
        calls: AtomicUsize,
        window: Range<usize>,
    }

    impl Likelihood for Outage {
        fn ln_likelihood(&self, x: &[f64]) -> Result<f64, LikelihoodError> {
            let call = self.calls.fetch_add(1, Ordering::Relaxed);
            if self.window.contains(&call) {
                return Ok(f64::NEG_INFINITY);
            }
            Bowl.ln_likelihood(x)
        }
    }

    #[test]
    fn exhausted_draws_shrink_the_live_set_and_continue() {
        let mut config = small_config();
        config.sampler.max_ndraw_attempts = 200;
        // every call after the 100 initial evaluations fails for at least five draws
        let likelihood = Outage {
            calls: AtomicUsize::new(0),
            window: 100..1_100,
        };
        // wide enough that the reducer does not start shrinking immediately
        let prior = Arc::new(UniformPrior::new(vec![-4.7, -4.7], vec![5.3, 5.3]).unwrap());
        let mut sampler =
            NestedSampler::with_kmeans(Arc::new(likelihood), prior, config).unwrap();
        assert_eq!(sampler.state().phase, Phase::Sampling);
        let result = sampler.run().unwrap();
        assert_eq!(result.termination, TerminationReason::Converged);
        assert!(result.diagnostics.draw_exhaustions >= 5);
        assert!(result.final_nobjects >= 20);
        assert!(result.ln_evidence.is_finite());
        assert_eq!(sampler.state().phase, Phase::Terminated);
    }
}
