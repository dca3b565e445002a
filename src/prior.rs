use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use rand::distributions::Distribution;
use rand::RngCore;
use statrs::distribution::{Continuous, Uniform};

use crate::error::ConfigError;

/// Prior over the free parameters.
///
/// The sampler only needs to draw from it and evaluate its log-density; the
/// maximum log-density lets the ellipsoidal sampler apply the prior by rejection.
pub trait Prior {
    fn ndim(&self) -> usize;

    fn sample(&self, rng: &mut dyn RngCore) -> Vec<f64>;

    /// `-inf` outside the support.
    fn ln_density(&self, x: &[f64]) -> f64;

    fn ln_max_density(&self) -> f64;
}

/// Independent uniform distributions, one per dimension.
pub struct UniformPrior {
    minima: Vec<f64>,
    maxima: Vec<f64>,
    marginals: Vec<Uniform>,
}

impl UniformPrior {
    pub fn new(minima: Vec<f64>, maxima: Vec<f64>) -> Result<Self, ConfigError> {
        if minima.len() != maxima.len() {
            return Err(ConfigError::LengthMismatch {
                what: "prior maxima",
                expected: minima.len(),
                found: maxima.len(),
            });
        }
        let marginals = minima
            .iter()
            .zip(maxima.iter())
            .enumerate()
            .map(|(dim, (&min, &max))| {
                let invalid = ConfigError::PriorBounds { dim, min, max };
                if !(min < max) || !min.is_finite() || !max.is_finite() {
                    return Err(invalid);
                }
                Uniform::new(min, max).map_err(|_| invalid)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            minima,
            maxima,
            marginals,
        })
    }

    pub fn minima(&self) -> &[f64] {
        &self.minima
    }

    pub fn maxima(&self) -> &[f64] {
        &self.maxima
    }

    /// Writes the bounds as two tab-separated rows, minima first.
    pub fn write_hyper_parameters(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let mut file = BufWriter::new(File::create(path)?);
        writeln!(file, "# Row #1: Minima")?;
        writeln!(file, "# Row #2: Maxima")?;
        for values in [&self.minima, &self.maxima] {
            let line: Vec<String> = values.iter().map(|v| format!("{v:.12e}")).collect();
            writeln!(file, "{}", line.join("\t"))?;
        }
        file.flush()
    }
}

impl Prior for UniformPrior {
    fn ndim(&self) -> usize {
        self.marginals.len()
    }

    fn sample(&self, rng: &mut dyn RngCore) -> Vec<f64> {
        self.marginals
            .iter()
            .map(|marginal| marginal.sample(rng))
            .collect()
    }

    fn ln_density(&self, x: &[f64]) -> f64 {
        if x.len() != self.marginals.len() {
            return f64::NEG_INFINITY;
        }
        x.iter()
            .zip(self.marginals.iter())
            .map(|(&x, marginal)| marginal.ln_pdf(x))
            .sum()
    }

    fn ln_max_density(&self) -> f64 {
        self.minima
            .iter()
            .zip(self.maxima.iter())
            .map(|(min, max)| -(max - min).ln())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn samples_stay_inside_bounds() {
        let prior = UniformPrior::new(vec![0.5, 2.0], vec![3.0, 20.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..1000 {
            let x = prior.sample(&mut rng);
            assert!((0.5..=3.0).contains(&x[0]));
            assert!((2.0..=20.0).contains(&x[1]));
            assert!((prior.ln_density(&x) - prior.ln_max_density()).abs() < 1e-12);
        }
    }

    #[test]
    fn density_vanishes_outside_support() {
        let prior = UniformPrior::new(vec![0.0], vec![1.0]).unwrap();
        assert_eq!(prior.ln_density(&[1.5]), f64::NEG_INFINITY);
        assert_eq!(prior.ln_density(&[-0.1]), f64::NEG_INFINITY);
        assert_eq!(prior.ln_max_density(), 0.0);
    }

    #[test]
    fn bounds_are_written_row_by_row() {
        let prior = UniformPrior::new(vec![0.5, 2.0], vec![3.0, 20.0]).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hyperParametersUniform.txt");
        prior.write_hyper_parameters(&path).unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        let rows: Vec<Vec<f64>> = text
            .lines()
            .filter(|line| !line.starts_with('#'))
            .map(|line| line.split('\t').map(|v| v.parse().unwrap()).collect())
            .collect();
        assert_eq!(rows, vec![vec![0.5, 2.0], vec![3.0, 20.0]]);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        assert!(matches!(
            UniformPrior::new(vec![0.0, 5.0], vec![1.0, 2.0]),
            Err(ConfigError::PriorBounds { dim: 1, .. })
        ));
        assert!(matches!(
            UniformPrior::new(vec![0.0], vec![1.0, 2.0]),
            Err(ConfigError::LengthMismatch { .. })
        ));
    }
}
