//! Uniform sampling from a union of bounding ellipsoids.
//!
//! One ellipsoid is fitted per cluster of live points. A candidate is drawn
//! from an ellipsoid chosen with probability proportional to its volume, then
//! kept with probability `1 / n`, where `n` is the number of ellipsoids that
//! contain it. The accepted candidates are therefore uniform over the union,
//! however much the ellipsoids overlap.

use std::sync::Arc;

use rand::Rng;
use tracing::debug;

use crate::ellipsoid::Ellipsoid;
use crate::error::{GeometryError, LikelihoodError};
use crate::likelihood::Likelihood;
use crate::metric::{EuclideanMetric, Metric};
use crate::point::LivePoint;
use crate::prior::Prior;

/// Counters of one call to [`EllipsoidSampler::draw`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrawStats {
    /// Geometric proposals, including those dropped by the overlap correction.
    pub proposals: usize,
    /// Proposals dropped because they fell in an overlap and lost the coin flip.
    pub overlap_rejections: usize,
    /// Candidates tested against the prior and the likelihood threshold.
    pub attempts: usize,
    pub likelihood_evaluations: usize,
}

impl DrawStats {
    /// Monte Carlo estimate of the log volume of the ellipsoid union.
    pub fn ln_union_volume(&self, ln_total_volume: f64) -> f64 {
        let kept = self.proposals - self.overlap_rejections;
        if self.proposals == 0 {
            return ln_total_volume;
        }
        ln_total_volume + (kept as f64 / self.proposals as f64).ln()
    }

    pub fn merge(&mut self, other: &DrawStats) {
        self.proposals += other.proposals;
        self.overlap_rejections += other.overlap_rejections;
        self.attempts += other.attempts;
        self.likelihood_evaluations += other.likelihood_evaluations;
    }
}

#[derive(Debug, Clone)]
pub enum DrawOutcome {
    Accepted { point: LivePoint, stats: DrawStats },
    /// No candidate beat the threshold within the attempt budget.
    Exhausted { stats: DrawStats },
}

impl DrawOutcome {
    pub fn stats(&self) -> &DrawStats {
        match self {
            DrawOutcome::Accepted { stats, .. } | DrawOutcome::Exhausted { stats } => stats,
        }
    }
}

/// Result of fitting the ellipsoids to the current live points.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefitReport {
    pub nclusters: usize,
    /// Live points moved out of clusters too small to support an ellipsoid.
    pub merged_points: usize,
    /// Ellipsoids whose covariance had to be regularised.
    pub regularized: usize,
}

pub struct EllipsoidSampler {
    metric: Arc<dyn Metric + Send + Sync>,
    ellipsoids: Vec<Ellipsoid>,
    neighbours: Vec<Vec<usize>>,
    cumulative_weights: Vec<f64>,
    ln_total_volume: f64,
}

impl EllipsoidSampler {
    pub fn new(metric: Arc<dyn Metric + Send + Sync>) -> Self {
        Self {
            metric,
            ellipsoids: Vec::new(),
            neighbours: Vec::new(),
            cumulative_weights: Vec::new(),
            ln_total_volume: f64::NEG_INFINITY,
        }
    }

    /// Sampler over a fixed set of ellipsoids.
    pub fn from_ellipsoids(
        metric: Arc<dyn Metric + Send + Sync>,
        ellipsoids: Vec<Ellipsoid>,
    ) -> Self {
        let mut sampler = Self::new(metric);
        sampler.set_ellipsoids(ellipsoids);
        sampler
    }

    pub fn ellipsoids(&self) -> &[Ellipsoid] {
        &self.ellipsoids
    }

    /// Indices of the ellipsoids that may intersect ellipsoid `idx`.
    pub fn neighbours(&self, idx: usize) -> &[usize] {
        &self.neighbours[idx]
    }

    /// Log of the summed ellipsoid volumes, overlaps counted repeatedly.
    pub fn ln_total_volume(&self) -> f64 {
        self.ln_total_volume
    }

    /// Number of ellipsoids containing `point`.
    pub fn coverage(&self, point: &[f64]) -> usize {
        self.ellipsoids
            .iter()
            .filter(|ellipsoid| ellipsoid.contains(point))
            .count()
    }

    /// Fits one ellipsoid per cluster of `live_points`.
    ///
    /// Clusters with fewer than `ndim + 1` members cannot support a full-rank
    /// ellipsoid; their points join the cluster with the nearest centroid.
    /// Cluster labels are compacted in place. Each ellipsoid is enlarged by
    /// `enlargement_fraction * sqrt(nobjects / cluster_size)`.
    pub fn refit(
        &mut self,
        live_points: &mut [LivePoint],
        enlargement_fraction: f64,
    ) -> Result<RefitReport, GeometryError> {
        let first = live_points.first().ok_or(GeometryError::Empty)?;
        let ndim = first.parameters.len();
        let nobjects = live_points.len();
        let min_size = ndim + 1;

        let nlabels = live_points.iter().map(|p| p.cluster).max().unwrap_or(0) + 1;
        let mut members = vec![Vec::new(); nlabels];
        for (idx, point) in live_points.iter().enumerate() {
            members[point.cluster].push(idx);
        }
        let centroids: Vec<Option<Vec<f64>>> = members
            .iter()
            .map(|indices| mean_of(live_points, indices))
            .collect();
        let large: Vec<usize> = (0..nlabels)
            .filter(|&label| members[label].len() >= min_size)
            .collect();

        let mut relabel = vec![0; nlabels];
        let mut merged_points = 0;
        for (compact, &label) in large.iter().enumerate() {
            relabel[label] = compact;
        }
        for label in 0..nlabels {
            if members[label].is_empty() || members[label].len() >= min_size {
                continue;
            }
            merged_points += members[label].len();
            if let Some(centroid) = &centroids[label] {
                let nearest = large
                    .iter()
                    .enumerate()
                    .filter_map(|(compact, &other)| {
                        centroids[other]
                            .as_ref()
                            .map(|c| (compact, self.metric.distance(centroid, c)))
                    })
                    .min_by(|a, b| a.1.total_cmp(&b.1))
                    .map(|(compact, _)| compact)
                    .unwrap_or(0);
                relabel[label] = nearest;
            }
        }
        if large.is_empty() {
            relabel.iter_mut().for_each(|label| *label = 0);
        }
        for point in live_points.iter_mut() {
            point.cluster = relabel[point.cluster];
        }
        if merged_points > 0 {
            debug!(merged_points, "merged undersized clusters");
        }

        let nclusters = large.len().max(1);
        let mut grouped: Vec<Vec<&[f64]>> = vec![Vec::new(); nclusters];
        for point in live_points.iter() {
            grouped[point.cluster].push(&point.parameters);
        }
        let ellipsoids = grouped
            .iter()
            .map(|points| {
                let size = points.len().max(1) as f64;
                let fraction = enlargement_fraction * (nobjects as f64 / size).sqrt();
                Ellipsoid::fit(points, fraction)
            })
            .collect::<Result<Vec<_>, _>>()?;
        let regularized = ellipsoids.iter().filter(|e| e.is_regularized()).count();
        if regularized > 0 {
            debug!(regularized, "regularised near-singular cluster covariances");
        }
        self.set_ellipsoids(ellipsoids);
        Ok(RefitReport {
            nclusters,
            merged_points,
            regularized,
        })
    }

    fn set_ellipsoids(&mut self, ellipsoids: Vec<Ellipsoid>) {
        // two ellipsoids can only intersect if their bounding spheres do
        self.neighbours = ellipsoids
            .iter()
            .enumerate()
            .map(|(i, a)| {
                ellipsoids
                    .iter()
                    .enumerate()
                    .filter(|&(j, b)| {
                        j != i
                            && EuclideanMetric.distance(a.centroid(), b.centroid())
                                <= a.largest_semi_axis() + b.largest_semi_axis()
                    })
                    .map(|(j, _)| j)
                    .collect()
            })
            .collect();
        let ln_max = ellipsoids
            .iter()
            .map(|e| e.ln_volume())
            .fold(f64::NEG_INFINITY, f64::max);
        let weights: Vec<f64> = ellipsoids
            .iter()
            .map(|e| (e.ln_volume() - ln_max).exp())
            .collect();
        let total: f64 = weights.iter().sum();
        let mut running = 0.0;
        self.cumulative_weights = weights
            .iter()
            .map(|w| {
                running += w / total;
                running
            })
            .collect();
        self.ln_total_volume = ln_max + total.ln();
        self.ellipsoids = ellipsoids;
    }

    /// Draws a point uniformly from the union of the ellipsoids, returning the
    /// index of the ellipsoid it came from, or `None` before the first fit.
    pub fn draw_candidate<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        stats: &mut DrawStats,
    ) -> Option<(usize, Vec<f64>)> {
        if self.ellipsoids.is_empty() {
            return None;
        }
        loop {
            let u: f64 = rng.gen();
            let idx = self
                .cumulative_weights
                .partition_point(|&c| c < u)
                .min(self.ellipsoids.len() - 1);
            let candidate = self.ellipsoids[idx].sample_uniform(rng);
            stats.proposals += 1;
            let coverage = 1 + self.neighbours[idx]
                .iter()
                .filter(|&&other| self.ellipsoids[other].contains(&candidate))
                .count();
            if coverage == 1 || rng.gen::<f64>() * (coverage as f64) < 1.0 {
                return Some((idx, candidate));
            }
            stats.overlap_rejections += 1;
        }
    }

    /// Draws a new live point with log-likelihood above `threshold`.
    ///
    /// Candidates outside the prior support are rejected, and non-flat priors
    /// are applied by rejection against their maximum density. Each candidate
    /// that survives the overlap correction counts against `max_attempts`,
    /// including those the prior rejects before any likelihood evaluation.
    /// Without fitted ellipsoids the draw is exhausted straight away.
    pub fn draw<P, L, R>(
        &self,
        prior: &P,
        likelihood: &L,
        threshold: f64,
        max_attempts: usize,
        rng: &mut R,
    ) -> Result<DrawOutcome, LikelihoodError>
    where
        P: Prior + ?Sized,
        L: Likelihood + ?Sized,
        R: Rng + ?Sized,
    {
        let mut stats = DrawStats::default();
        let ln_max_density = prior.ln_max_density();
        while stats.attempts < max_attempts {
            let Some((cluster, candidate)) = self.draw_candidate(rng, &mut stats) else {
                break;
            };
            stats.attempts += 1;
            let ln_density = prior.ln_density(&candidate);
            if ln_density == f64::NEG_INFINITY
                || ln_density - ln_max_density < rng.gen::<f64>().ln()
            {
                continue;
            }
            let ln_likelihood = likelihood.ln_likelihood(&candidate)?;
            stats.likelihood_evaluations += 1;
            if ln_likelihood > threshold {
                return Ok(DrawOutcome::Accepted {
                    point: LivePoint::new(candidate, ln_likelihood, cluster),
                    stats,
                });
            }
        }
        Ok(DrawOutcome::Exhausted { stats })
    }
}

fn mean_of(points: &[LivePoint], indices: &[usize]) -> Option<Vec<f64>> {
    let first = indices.first()?;
    let mut mean = vec![0.0; points[*first].parameters.len()];
    for &idx in indices {
        for (m, x) in mean.iter_mut().zip(points[idx].parameters.iter()) {
            *m += x;
        }
    }
    let count = indices.len() as f64;
    mean.iter_mut().for_each(|m| *m /= count);
    Some(mean)
}
