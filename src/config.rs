use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Everything needed to configure a run, deserialisable from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedSamplingConfig {
    /// Live-point and ellipsoid settings.
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// X-means clustering settings.
    #[serde(default)]
    pub clustering: ClusteringConfig,
    /// Stopping rule and live-point reduction settings.
    #[serde(default)]
    pub reducer: ReducerConfig,
    /// Seed of the master random number generator.
    #[serde(default)]
    pub seed: u64,
}

impl Default for NestedSamplingConfig {
    fn default() -> Self {
        Self {
            sampler: SamplerConfig::default(),
            clustering: ClusteringConfig::default(),
            reducer: ReducerConfig::default(),
            seed: 0,
        }
    }
}

impl NestedSamplingConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sampler.validate()?;
        self.clustering.validate()?;
        self.reducer.validate()
    }
}

/// Settings of the ellipsoidal nested sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Number of live points drawn from the prior at start.
    pub initial_nobjects: usize,
    /// Floor below which the live set may not shrink.
    pub min_nobjects: usize,
    /// Maximum number of candidates drawn from the ellipsoids per iteration.
    /// Candidates the prior rejects count as well, without a likelihood call.
    pub max_ndraw_attempts: usize,
    /// During the first iterations all live points form a single cluster.
    pub ninitial_iterations_without_clustering: usize,
    /// Re-clustering only happens every this many iterations.
    pub niterations_with_same_clustering: usize,
    /// Fraction by which each ellipsoid axis is enlarged at the start of the run.
    pub initial_enlargement_fraction: f64,
    /// Exponent of the remaining prior mass in the enlargement decay, in [0, 1].
    pub shrinking_rate: f64,
    /// Optional hard cap on the number of iterations.
    pub max_iterations: Option<usize>,
    /// Number of parallel draw workers; 1 draws serially.
    pub npool: usize,
    /// Progress is logged every this many iterations.
    pub log_interval: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            initial_nobjects: 500,
            min_nobjects: 50,
            max_ndraw_attempts: 50_000,
            ninitial_iterations_without_clustering: 1_000,
            niterations_with_same_clustering: 50,
            initial_enlargement_fraction: 1.0,
            shrinking_rate: 0.2,
            max_iterations: None,
            npool: 1,
            log_interval: 100,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("initial_nobjects", self.initial_nobjects)?;
        positive("min_nobjects", self.min_nobjects)?;
        positive("max_ndraw_attempts", self.max_ndraw_attempts)?;
        positive(
            "niterations_with_same_clustering",
            self.niterations_with_same_clustering,
        )?;
        positive("npool", self.npool)?;
        positive("log_interval", self.log_interval)?;
        if self.min_nobjects > self.initial_nobjects {
            return Err(ConfigError::LivePointBounds {
                min: self.min_nobjects,
                initial: self.initial_nobjects,
            });
        }
        if !(0.0..=1.0).contains(&self.shrinking_rate) {
            return Err(ConfigError::ShrinkingRate(self.shrinking_rate));
        }
        if !(self.initial_enlargement_fraction >= 0.0) {
            return Err(ConfigError::NegativeEnlargement(
                self.initial_enlargement_fraction,
            ));
        }
        Ok(())
    }
}

/// Settings of the X-means clusterer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    pub min_nclusters: usize,
    pub max_nclusters: usize,
    /// Number of K-means restarts per candidate cluster count.
    pub ntrials: usize,
    /// Relative centroid movement below which K-means has converged.
    pub rel_tolerance: f64,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            min_nclusters: 1,
            max_nclusters: 5,
            ntrials: 10,
            rel_tolerance: 0.01,
        }
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("min_nclusters", self.min_nclusters)?;
        positive("max_nclusters", self.max_nclusters)?;
        positive("ntrials", self.ntrials)?;
        if self.min_nclusters > self.max_nclusters {
            return Err(ConfigError::ClusterBounds {
                min: self.min_nclusters,
                max: self.max_nclusters,
            });
        }
        strictly_positive("rel_tolerance", self.rel_tolerance)
    }
}

/// Settings of the power-law stopping rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReducerConfig {
    /// Remainder-to-evidence ratio below which live points start being removed.
    pub tolerance: f64,
    pub exponent: f64,
    pub termination_factor: f64,
}

impl Default for ReducerConfig {
    fn default() -> Self {
        Self {
            tolerance: 100.0,
            exponent: 0.4,
            termination_factor: 0.001,
        }
    }
}

impl ReducerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        strictly_positive("tolerance", self.tolerance)?;
        strictly_positive("exponent", self.exponent)?;
        strictly_positive("termination_factor", self.termination_factor)?;
        // at or above 1 the run would stop before the live set ever shrinks
        if self.tolerance * self.termination_factor >= 1.0 {
            return Err(ConfigError::TerminationThreshold {
                tolerance: self.tolerance,
                termination_factor: self.termination_factor,
            });
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        Err(ConfigError::ZeroCount { field })
    } else {
        Ok(())
    }
}

fn strictly_positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    // NaN fails this comparison as well
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { field, value })
    }
}
