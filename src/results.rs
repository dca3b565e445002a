//! Read-only snapshot of a finished run and the files derived from it.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::NestedSamplingConfig;
use crate::error::NsError;
use crate::point::ArchivedPoint;

/// Credible level used by the parameter summary written to disk.
pub const DEFAULT_CREDIBLE_LEVEL: f64 = 68.3;

/// Number of histogram bins in the marginal distribution files.
pub const MARGINAL_NBINS: usize = 50;

/// Recoverable conditions met during a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    pub reclusterings: usize,
    /// Iterations in which no replacement point beat the threshold.
    pub draw_exhaustions: usize,
    /// Live points dropped by the power-law reducer.
    pub reduced_live_points: usize,
    /// Live points moved out of undersized clusters.
    pub merged_points: usize,
    /// Ellipsoid fits whose covariance eigenvalues were floored.
    pub regularized_ellipsoids: usize,
    /// Quantities clamped after floating-point drift.
    pub numerical_clamps: usize,
    pub likelihood_evaluations: usize,
    pub proposals: usize,
    pub overlap_rejections: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TerminationReason {
    /// The power-law stopping rule was met.
    Converged,
    /// Every live point has the same likelihood.
    LikelihoodPlateau,
    /// The configured iteration cap was reached first.
    IterationCap,
}

#[derive(Debug, Clone, Serialize)]
pub struct SamplerResult {
    /// Removed points in removal order, followed by the final live points.
    pub archive: Vec<ArchivedPoint>,
    pub ln_evidence: f64,
    pub ln_evidence_error: f64,
    /// Information gain from prior to posterior, in nats.
    pub information_gain: f64,
    /// Number of nested-sampling iterations, i.e. points removed before termination.
    pub niterations: usize,
    pub final_nobjects: usize,
    pub nclusters: usize,
    pub termination: TerminationReason,
    pub diagnostics: Diagnostics,
    pub config: NestedSamplingConfig,
    pub duration: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSummary {
    pub mean: f64,
    pub std: f64,
    pub median: f64,
    /// Parameter value of the most probable archived point.
    pub mode: f64,
    pub lower_credible_limit: f64,
    pub upper_credible_limit: f64,
    /// In percent.
    pub credible_level: f64,
}

pub trait Summary {
    fn print_summary(&self);
}

impl Summary for SamplerResult {
    fn print_summary(&self) {
        println!("Sampling time: {:.2}s", self.duration.as_secs_f64());
        println!(
            "ln evidence: {:.3} +/- {:.3}",
            self.ln_evidence, self.ln_evidence_error
        );
        println!("Information gain: {:.3} nats", self.information_gain);
        println!(
            "{} iterations, {} live points left in {} clusters ({:?})",
            self.niterations, self.final_nobjects, self.nclusters, self.termination
        );
        println!("Posterior summary:");
        for summary in self.parameter_summaries(DEFAULT_CREDIBLE_LEVEL) {
            println!(
                "    {:.3} +/- {:.3}  [{:.3}, {:.3}]",
                summary.mean,
                summary.std,
                summary.lower_credible_limit,
                summary.upper_credible_limit
            );
        }
    }
}

impl SamplerResult {
    pub fn ndim(&self) -> usize {
        self.archive
            .first()
            .map_or(0, |point| point.parameters.len())
    }

    /// Normalised posterior probability of every archived point.
    pub fn posterior_probabilities(&self) -> Vec<f64> {
        self.archive
            .iter()
            .map(|point| (point.ln_weight - self.ln_evidence).exp())
            .collect()
    }

    pub fn posterior_mean(&self) -> Vec<f64> {
        self.parameter_summaries(DEFAULT_CREDIBLE_LEVEL)
            .iter()
            .map(|summary| summary.mean)
            .collect()
    }

    pub fn posterior_std(&self) -> Vec<f64> {
        self.parameter_summaries(DEFAULT_CREDIBLE_LEVEL)
            .iter()
            .map(|summary| summary.std)
            .collect()
    }

    /// Weighted marginal statistics with an equal-tailed credible interval.
    pub fn parameter_summaries(&self, credible_level: f64) -> Vec<ParameterSummary> {
        let probabilities = self.posterior_probabilities();
        let total: f64 = probabilities.iter().sum();
        let mode_idx = probabilities
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(idx, _)| idx);
        let tail = (1.0 - credible_level / 100.0) / 2.0;
        (0..self.ndim())
            .map(|dim| {
                let mut marginal: Vec<(f64, f64)> = self
                    .archive
                    .iter()
                    .zip(probabilities.iter())
                    .map(|(point, &p)| (point.parameters[dim], p / total))
                    .collect();
                let mean: f64 = marginal.iter().map(|(x, p)| x * p).sum();
                let variance: f64 = marginal.iter().map(|(x, p)| p * (x - mean).powi(2)).sum();
                marginal.sort_by(|a, b| a.0.total_cmp(&b.0));
                ParameterSummary {
                    mean,
                    std: variance.sqrt(),
                    median: weighted_quantile(&marginal, 0.5),
                    mode: mode_idx.map_or(f64::NAN, |idx| self.archive[idx].parameters[dim]),
                    lower_credible_limit: weighted_quantile(&marginal, tail),
                    upper_credible_limit: weighted_quantile(&marginal, 1.0 - tail),
                    credible_level,
                }
            })
            .collect()
    }

    /// Posterior histogram of parameter `dim` over the range spanned by the
    /// archive, as `(bin centre, probability density)` pairs.
    ///
    /// A parameter that never varies collapses into a single bin carrying
    /// probability one.
    pub fn marginal_distribution(&self, dim: usize, nbins: usize) -> Vec<(f64, f64)> {
        let nbins = nbins.max(1);
        let (lo, hi) = self
            .archive
            .iter()
            .map(|point| point.parameters[dim])
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
                (lo.min(x), hi.max(x))
            });
        if !(hi > lo) {
            return if lo.is_finite() { vec![(lo, 1.0)] } else { Vec::new() };
        }
        let width = (hi - lo) / nbins as f64;
        let probabilities = self.posterior_probabilities();
        let total: f64 = probabilities.iter().sum();
        let mut mass = vec![0.0; nbins];
        for (point, p) in self.archive.iter().zip(probabilities) {
            let bin = (((point.parameters[dim] - lo) / width) as usize).min(nbins - 1);
            mass[bin] += p / total;
        }
        mass.into_iter()
            .enumerate()
            .map(|(bin, m)| (lo + (bin as f64 + 0.5) * width, m / width))
            .collect()
    }

    /// Equally weighted posterior samples, by rejection against the largest weight.
    pub fn posterior_samples<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<Vec<f64>> {
        let max_weight = self
            .archive
            .iter()
            .map(|point| point.ln_weight)
            .fold(f64::NEG_INFINITY, f64::max);
        let mut output = Vec::new();
        for point in self.archive.iter() {
            if point.ln_weight - max_weight > rng.gen::<f64>().ln() {
                output.push(point.parameters.clone());
            }
        }
        output
    }

    /// Writes the run to `dir`, each file name starting with `prefix`.
    pub fn write_to_dir(&self, dir: impl AsRef<Path>, prefix: &str) -> Result<(), NsError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let create = |name: &str| -> Result<BufWriter<File>, NsError> {
            Ok(BufWriter::new(File::create(dir.join(format!("{prefix}{name}")))?))
        };

        for dim in 0..self.ndim() {
            let mut file = create(&format!("parameter{dim:03}.txt"))?;
            for point in &self.archive {
                writeln!(file, "{:.12e}", point.parameters[dim])?;
            }
            file.flush()?;
        }

        for dim in 0..self.ndim() {
            let mut file = create(&format!("marginalDistribution{dim:03}.txt"))?;
            writeln!(file, "# bin centre, probability density")?;
            for (centre, density) in self.marginal_distribution(dim, MARGINAL_NBINS) {
                writeln!(file, "{centre:.12e}\t{density:.12e}")?;
            }
            file.flush()?;
        }

        let mut file = create("logLikelihood.txt")?;
        for point in &self.archive {
            writeln!(file, "{:.12e}", point.ln_likelihood)?;
        }
        file.flush()?;

        let mut file = create("logWeights.txt")?;
        for point in &self.archive {
            writeln!(file, "{:.12e}", point.ln_weight)?;
        }
        file.flush()?;

        let mut file = create("posteriorDistribution.txt")?;
        for probability in self.posterior_probabilities() {
            writeln!(file, "{probability:.12e}")?;
        }
        file.flush()?;

        let mut file = create("evidenceInformation.txt")?;
        writeln!(file, "# ln evidence, ln evidence error, information gain (nats)")?;
        writeln!(
            file,
            "{:.12e}\t{:.12e}\t{:.12e}",
            self.ln_evidence, self.ln_evidence_error, self.information_gain
        )?;
        file.flush()?;

        let mut file = create("parameterSummary.txt")?;
        writeln!(
            file,
            "# mean, median, mode, std, lower and upper {}% credible limits",
            DEFAULT_CREDIBLE_LEVEL
        )?;
        for summary in self.parameter_summaries(DEFAULT_CREDIBLE_LEVEL) {
            writeln!(
                file,
                "{:.12e}\t{:.12e}\t{:.12e}\t{:.12e}\t{:.12e}\t{:.12e}",
                summary.mean,
                summary.median,
                summary.mode,
                summary.std,
                summary.lower_credible_limit,
                summary.upper_credible_limit
            )?;
        }
        file.flush()?;

        let mut file = create("run.json")?;
        serde_json::to_writer_pretty(&mut file, self)?;
        file.flush()?;
        Ok(())
    }
}

/// `sorted` holds `(value, probability)` pairs sorted by value.
fn weighted_quantile(sorted: &[(f64, f64)], quantile: f64) -> f64 {
    let mut cumulative = 0.0;
    for &(value, probability) in sorted {
        cumulative += probability;
        if cumulative >= quantile {
            return value;
        }
    }
    sorted.last().map_or(f64::NAN, |&(value, _)| value)
}
