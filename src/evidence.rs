//! Evidence and prior-mass bookkeeping as an explicit fold.

use lnexp::LnExp;
use logsumexp::LogAddExp;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// `ln(exp(a) - exp(b))` for `a >= b`.
pub fn logsubexp(a: f64, b: f64) -> f64 {
    if b == f64::NEG_INFINITY {
        return a;
    }
    a + (b - a).ln_1m_exp()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvidenceAccumulator {
    pub ln_evidence: f64,
    /// Log of the prior mass still enclosed by the live points.
    pub ln_remaining_prior_mass: f64,
    /// Kullback-Leibler divergence from prior to posterior, in nats.
    pub information_gain: f64,
}

/// Contribution of one removed point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvidenceStep {
    /// Log of the prior-mass shell between the old and new remaining mass.
    pub ln_prior_mass: f64,
    /// `ln_prior_mass + ln_likelihood`.
    pub ln_weight: f64,
    /// Set when the information gain drifted negative and was clamped to zero.
    pub clamped: bool,
}

impl Default for EvidenceAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl EvidenceAccumulator {
    pub fn new() -> Self {
        Self {
            ln_evidence: f64::NEG_INFINITY,
            ln_remaining_prior_mass: 0.0,
            information_gain: 0.0,
        }
    }

    /// Removes the worst of `nobjects` live points, with log-likelihood `ln_likelihood`.
    ///
    /// The remaining prior mass shrinks by the expected factor `exp(-1 / nobjects)`.
    pub fn step(self, ln_likelihood: f64, nobjects: usize) -> (Self, EvidenceStep) {
        let ln_remaining_prior_mass = self.ln_remaining_prior_mass - 1.0 / nobjects as f64;
        let ln_prior_mass = logsubexp(self.ln_remaining_prior_mass, ln_remaining_prior_mass);
        let (next, ln_weight, clamped) =
            self.accumulate(ln_prior_mass + ln_likelihood, ln_likelihood);
        (
            Self {
                ln_remaining_prior_mass,
                ..next
            },
            EvidenceStep {
                ln_prior_mass,
                ln_weight,
                clamped,
            },
        )
    }

    /// Adds one of the `nobjects` points left alive at termination, each
    /// owning an equal share of the remaining prior mass.
    pub fn add_final_live(self, ln_likelihood: f64, nobjects: usize) -> (Self, EvidenceStep) {
        let ln_prior_mass = self.ln_remaining_prior_mass - (nobjects as f64).ln();
        let (next, ln_weight, clamped) =
            self.accumulate(ln_prior_mass + ln_likelihood, ln_likelihood);
        (
            next,
            EvidenceStep {
                ln_prior_mass,
                ln_weight,
                clamped,
            },
        )
    }

    fn accumulate(self, ln_weight: f64, ln_likelihood: f64) -> (Self, f64, bool) {
        if ln_weight == f64::NEG_INFINITY {
            return (self, ln_weight, false);
        }
        let ln_evidence = self.ln_evidence.ln_add_exp(ln_weight);
        let mut information_gain = (ln_weight - ln_evidence).exp() * ln_likelihood
            + (self.ln_evidence - ln_evidence).exp() * (self.information_gain + self.ln_evidence)
            - ln_evidence;
        if self.ln_evidence == f64::NEG_INFINITY {
            information_gain = (ln_weight - ln_evidence).exp() * ln_likelihood - ln_evidence;
        }
        let clamped = !(information_gain >= 0.0);
        if clamped {
            warn!(information_gain, "information gain drifted negative, clamping to zero");
            information_gain = 0.0;
        }
        (
            Self {
                ln_evidence,
                information_gain,
                ..self
            },
            ln_weight,
            clamped,
        )
    }

    /// Statistical uncertainty on `ln_evidence` for `nobjects` live points.
    pub fn ln_evidence_error(&self, nobjects: usize) -> f64 {
        (self.information_gain / nobjects as f64).sqrt()
    }

    /// Log of the largest evidence the live points could still contribute.
    pub fn ln_remaining_evidence(&self, max_ln_likelihood: f64) -> f64 {
        self.ln_remaining_prior_mass + max_ln_likelihood
    }
}
