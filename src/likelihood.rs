use std::f64::consts::PI;
use std::sync::Arc;

use crate::error::{ConfigError, LikelihoodError};
use crate::model::ForwardModel;

pub trait Likelihood {
    fn ln_likelihood(&self, x: &[f64]) -> Result<f64, LikelihoodError>;
}

/// Independent Gaussian errors around the forward-model predictions.
#[derive(Clone)]
pub struct NormalLikelihood {
    observations: Vec<f64>,
    uncertainties: Vec<f64>,
    model: Arc<dyn ForwardModel + Send + Sync>,
    ln_normalization: f64,
}

impl NormalLikelihood {
    pub fn new(
        observations: Vec<f64>,
        uncertainties: Vec<f64>,
        model: Arc<dyn ForwardModel + Send + Sync>,
    ) -> Result<Self, ConfigError> {
        if uncertainties.len() != observations.len() {
            return Err(ConfigError::LengthMismatch {
                what: "uncertainties",
                expected: observations.len(),
                found: uncertainties.len(),
            });
        }
        if model.covariates().len() != observations.len() {
            return Err(ConfigError::LengthMismatch {
                what: "covariates",
                expected: observations.len(),
                found: model.covariates().len(),
            });
        }
        if let Some((index, &value)) = uncertainties
            .iter()
            .enumerate()
            .find(|(_, &sigma)| !(sigma > 0.0))
        {
            return Err(ConfigError::Uncertainty { index, value });
        }
        let ln_normalization = -uncertainties
            .iter()
            .map(|sigma| sigma.ln() + 0.5 * (2.0 * PI).ln())
            .sum::<f64>();
        Ok(Self {
            observations,
            uncertainties,
            model,
            ln_normalization,
        })
    }
}

impl Likelihood for NormalLikelihood {
    fn ln_likelihood(&self, x: &[f64]) -> Result<f64, LikelihoodError> {
        let predictions = self.model.predict(x)?;
        if predictions.len() != self.observations.len() {
            return Err(LikelihoodError::LengthMismatch {
                what: "predictions",
                expected: self.observations.len(),
                found: predictions.len(),
            });
        }
        let chi_square: f64 = self
            .observations
            .iter()
            .zip(predictions.iter())
            .zip(self.uncertainties.iter())
            .map(|((obs, pred), sigma)| ((obs - pred) / sigma).powi(2))
            .sum();
        Ok(self.ln_normalization - 0.5 * chi_square)
    }
}
