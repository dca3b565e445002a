use crate::config::ReducerConfig;

/// Power-law stopping rule and live-point reducer.
///
/// Both decisions depend on the ratio `R` between the evidence the live points
/// could still add (largest live likelihood times remaining prior mass) and the
/// evidence accumulated so far.
///
/// * The run stops once `R^exponent < tolerance * termination_factor`.
/// * Once `R < tolerance`, `floor((tolerance / R)^exponent)` live points are
///   dropped per iteration, never going below the configured floor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerlawReducer {
    pub tolerance: f64,
    pub exponent: f64,
    pub termination_factor: f64,
}

impl PowerlawReducer {
    pub fn new(tolerance: f64, exponent: f64, termination_factor: f64) -> Self {
        Self {
            tolerance,
            exponent,
            termination_factor,
        }
    }

    pub fn from_config(config: &ReducerConfig) -> Self {
        Self::new(config.tolerance, config.exponent, config.termination_factor)
    }

    /// `ln R`, `+inf` before any evidence has accumulated and `-inf` once no mass remains.
    pub fn ln_ratio(&self, ln_evidence: f64, ln_remaining_evidence: f64) -> f64 {
        if !(ln_remaining_evidence > f64::NEG_INFINITY) {
            f64::NEG_INFINITY
        } else if ln_evidence == f64::NEG_INFINITY {
            f64::INFINITY
        } else {
            ln_remaining_evidence - ln_evidence
        }
    }

    pub fn should_stop(&self, ln_evidence: f64, ln_remaining_evidence: f64) -> bool {
        let ln_ratio = self.ln_ratio(ln_evidence, ln_remaining_evidence);
        if ln_ratio == f64::NEG_INFINITY {
            return true;
        }
        self.exponent * ln_ratio < (self.tolerance * self.termination_factor).ln()
    }

    /// Number of live points to keep for the next iteration.
    pub fn updated_nobjects(
        &self,
        nobjects: usize,
        min_nobjects: usize,
        ln_evidence: f64,
        ln_remaining_evidence: f64,
    ) -> usize {
        let ln_ratio = self.ln_ratio(ln_evidence, ln_remaining_evidence);
        let ln_tolerance = self.tolerance.ln();
        if ln_ratio >= ln_tolerance {
            return nobjects;
        }
        let remove = (self.exponent * (ln_tolerance - ln_ratio)).exp().floor();
        if remove >= nobjects as f64 {
            return min_nobjects.min(nobjects);
        }
        nobjects
            .saturating_sub(remove as usize)
            .max(min_nobjects.min(nobjects))
    }
}
