use serde::{Deserialize, Serialize};

/// A member of the live-point set.
#[derive(Debug, Clone, PartialEq)]
pub struct LivePoint {
    pub parameters: Vec<f64>,
    pub ln_likelihood: f64,
    /// Cluster this point belongs to, only meaningful until the next refit.
    pub cluster: usize,
}

impl LivePoint {
    pub fn new(parameters: Vec<f64>, ln_likelihood: f64, cluster: usize) -> Self {
        Self {
            parameters,
            ln_likelihood,
            cluster,
        }
    }
}

/// A point removed from the live set together with its posterior weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedPoint {
    pub parameters: Vec<f64>,
    pub ln_likelihood: f64,
    /// Log of the prior-mass shell this point represents.
    pub ln_prior_mass: f64,
    /// Log of the unnormalised posterior weight, `ln_prior_mass + ln_likelihood`.
    pub ln_weight: f64,
    /// Log of the prior mass still enclosed by the live set after this removal.
    pub ln_remaining_prior_mass: f64,
}

impl ArchivedPoint {
    pub fn new(point: LivePoint, ln_prior_mass: f64, ln_remaining_prior_mass: f64) -> Self {
        Self {
            ln_weight: ln_prior_mass + point.ln_likelihood,
            parameters: point.parameters,
            ln_likelihood: point.ln_likelihood,
            ln_prior_mass,
            ln_remaining_prior_mass,
        }
    }
}
