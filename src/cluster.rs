//! X-means style clustering of the live points.
//!
//! For every candidate cluster count K in `[min_nclusters, max_nclusters]`,
//! K-means is restarted `ntrials` times from k-means++ seeds and the lowest
//! inertia solution is kept. Each solution is scored with the Bayesian
//! information criterion of an identical spherical Gaussian mixture
//! (Pelleg & Moore), and the K with the lowest score wins. Ties go to the
//! smaller K.

use std::f64::consts::PI;

use rand::{Rng, RngCore};

use crate::config::ClusteringConfig;
use crate::metric::Metric;

const MAX_KMEANS_ITERATIONS: usize = 100;

/// Cluster assignment of a point set.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    /// Cluster index of every point, in `0..nclusters`.
    pub assignments: Vec<usize>,
    pub nclusters: usize,
}

impl Partition {
    /// Every point in one cluster.
    pub fn single(npoints: usize) -> Self {
        Self {
            assignments: vec![0; npoints],
            nclusters: 1,
        }
    }

    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.nclusters];
        for &cluster in &self.assignments {
            sizes[cluster] += 1;
        }
        sizes
    }
}

pub trait Clusterer {
    /// Partitions `points`. Never fails; falls back to a single cluster.
    fn partition(&self, points: &[Vec<f64>], rng: &mut dyn RngCore) -> Partition;
}

pub struct KmeansClusterer<M> {
    metric: M,
    min_nclusters: usize,
    max_nclusters: usize,
    ntrials: usize,
    rel_tolerance: f64,
}

struct KmeansSolution {
    assignments: Vec<usize>,
    sizes: Vec<usize>,
    inertia: f64,
}

impl<M: Metric> KmeansClusterer<M> {
    pub fn new(
        metric: M,
        min_nclusters: usize,
        max_nclusters: usize,
        ntrials: usize,
        rel_tolerance: f64,
    ) -> Self {
        Self {
            metric,
            min_nclusters: min_nclusters.max(1),
            max_nclusters: max_nclusters.max(min_nclusters.max(1)),
            ntrials: ntrials.max(1),
            rel_tolerance,
        }
    }

    pub fn from_config(metric: M, config: &ClusteringConfig) -> Self {
        Self::new(
            metric,
            config.min_nclusters,
            config.max_nclusters,
            config.ntrials,
            config.rel_tolerance,
        )
    }

    /// Best of `ntrials` K-means runs, `None` if every trial left a cluster empty.
    fn best_kmeans(
        &self,
        points: &[Vec<f64>],
        nclusters: usize,
        rng: &mut dyn RngCore,
    ) -> Option<KmeansSolution> {
        (0..self.ntrials)
            .filter_map(|_| self.kmeans(points, nclusters, rng))
            .min_by(|a, b| a.inertia.total_cmp(&b.inertia))
    }

    fn kmeans(
        &self,
        points: &[Vec<f64>],
        nclusters: usize,
        rng: &mut dyn RngCore,
    ) -> Option<KmeansSolution> {
        let mut centroids = self.seed_centroids(points, nclusters, rng);
        let spread = spread(points).max(f64::MIN_POSITIVE);
        let mut assignments = vec![0; points.len()];
        for _ in 0..MAX_KMEANS_ITERATIONS {
            for (assignment, point) in assignments.iter_mut().zip(points.iter()) {
                *assignment = self.nearest(point, &centroids).0;
            }
            let updated = centroids_of(points, &assignments, nclusters)?;
            let movement = centroids
                .iter()
                .zip(updated.iter())
                .map(|(old, new)| self.metric.distance(old, new))
                .fold(0.0_f64, f64::max);
            centroids = updated;
            if movement / spread < self.rel_tolerance {
                break;
            }
        }
        let mut sizes = vec![0; nclusters];
        let mut inertia = 0.0;
        for (assignment, point) in assignments.iter_mut().zip(points.iter()) {
            let (nearest, distance_squared) = self.nearest(point, &centroids);
            *assignment = nearest;
            sizes[nearest] += 1;
            inertia += distance_squared;
        }
        if sizes.iter().any(|&size| size == 0) {
            return None;
        }
        Some(KmeansSolution {
            assignments,
            sizes,
            inertia,
        })
    }

    /// k-means++ seeding.
    fn seed_centroids(
        &self,
        points: &[Vec<f64>],
        nclusters: usize,
        rng: &mut dyn RngCore,
    ) -> Vec<Vec<f64>> {
        let mut centroids = vec![points[rng.gen_range(0..points.len())].clone()];
        let mut closest: Vec<f64> = points
            .iter()
            .map(|point| self.metric.distance_squared(point, &centroids[0]))
            .collect();
        while centroids.len() < nclusters {
            let total: f64 = closest.iter().sum();
            let chosen = if total > 0.0 {
                let mut target = rng.gen::<f64>() * total;
                closest
                    .iter()
                    .position(|&weight| {
                        target -= weight;
                        target <= 0.0 && weight > 0.0
                    })
                    .unwrap_or(points.len() - 1)
            } else {
                rng.gen_range(0..points.len())
            };
            let centroid = points[chosen].clone();
            for (distance, point) in closest.iter_mut().zip(points.iter()) {
                *distance = distance.min(self.metric.distance_squared(point, &centroid));
            }
            centroids.push(centroid);
        }
        centroids
    }

    fn nearest(&self, point: &[f64], centroids: &[Vec<f64>]) -> (usize, f64) {
        centroids
            .iter()
            .enumerate()
            .map(|(idx, centroid)| (idx, self.metric.distance_squared(point, centroid)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .unwrap_or((0, 0.0))
    }
}

impl<M: Metric> Clusterer for KmeansClusterer<M> {
    fn partition(&self, points: &[Vec<f64>], rng: &mut dyn RngCore) -> Partition {
        let npoints = points.len();
        if npoints < self.min_nclusters || npoints == 0 {
            return Partition::single(npoints);
        }
        let ndim = points[0].len();
        let mut best: Option<(f64, Partition)> = None;
        for nclusters in self.min_nclusters..=self.max_nclusters {
            // the variance estimate needs more points than clusters
            if nclusters >= npoints {
                break;
            }
            let Some(solution) = self.best_kmeans(points, nclusters, rng) else {
                continue;
            };
            let score = bic(&solution, npoints, ndim);
            if best.as_ref().map_or(true, |(current, _)| score < *current) {
                best = Some((
                    score,
                    Partition {
                        assignments: solution.assignments,
                        nclusters,
                    },
                ));
            }
        }
        best.map(|(_, partition)| partition)
            .unwrap_or_else(|| Partition::single(npoints))
    }
}

/// Bayesian information criterion of a hard K-means solution, lower is better.
fn bic(solution: &KmeansSolution, npoints: usize, ndim: usize) -> f64 {
    let n = npoints as f64;
    let d = ndim as f64;
    let k = solution.sizes.len() as f64;
    let variance = (solution.inertia / (d * (n - k))).max(f64::MIN_POSITIVE);
    let mixing: f64 = solution
        .sizes
        .iter()
        .map(|&size| {
            let size = size as f64;
            size * (size / n).ln()
        })
        .sum();
    let ln_likelihood =
        mixing - 0.5 * n * d * (2.0 * PI * variance).ln() - solution.inertia / (2.0 * variance);
    let nparameters = (k - 1.0) + k * d + 1.0;
    -2.0 * ln_likelihood + nparameters * n.ln()
}

/// Root mean squared distance of the points to their mean.
fn spread(points: &[Vec<f64>]) -> f64 {
    let Some(centroid) = centroids_of(points, &vec![0; points.len()], 1) else {
        return 0.0;
    };
    let total: f64 = points
        .iter()
        .map(|point| {
            point
                .iter()
                .zip(centroid[0].iter())
                .map(|(x, c)| (x - c).powi(2))
                .sum::<f64>()
        })
        .sum();
    (total / points.len() as f64).sqrt()
}

/// Mean of each cluster, `None` if one of them is empty.
fn centroids_of(
    points: &[Vec<f64>],
    assignments: &[usize],
    nclusters: usize,
) -> Option<Vec<Vec<f64>>> {
    let ndim = points.first()?.len();
    let mut sums = vec![vec![0.0; ndim]; nclusters];
    let mut counts = vec![0usize; nclusters];
    for (point, &cluster) in points.iter().zip(assignments.iter()) {
        counts[cluster] += 1;
        for (sum, x) in sums[cluster].iter_mut().zip(point.iter()) {
            *sum += x;
        }
    }
    if counts.iter().any(|&count| count == 0) {
        return None;
    }
    Some(
        sums.into_iter()
            .zip(counts)
            .map(|(sum, count)| sum.into_iter().map(|s| s / count as f64).collect())
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::EuclideanMetric;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn grid_blob(center: (f64, f64), side: usize, step: f64) -> Vec<Vec<f64>> {
        let mut points = Vec::new();
        for i in 0..side {
            for j in 0..side {
                points.push(vec![center.0 + i as f64 * step, center.1 + j as f64 * step]);
            }
        }
        points
    }

    #[test]
    fn fewer_points_than_min_clusters_gives_one_cluster() {
        let clusterer = KmeansClusterer::new(EuclideanMetric, 3, 5, 4, 0.01);
        let points = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(clusterer.partition(&points, &mut rng), Partition::single(2));
    }

    #[test]
    fn separated_grids_split_in_two() {
        let mut points = grid_blob((0.0, 0.0), 6, 0.1);
        points.extend(grid_blob((20.0, -5.0), 6, 0.1));
        let clusterer = KmeansClusterer::new(EuclideanMetric, 1, 4, 5, 0.01);
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let partition = clusterer.partition(&points, &mut rng);
        assert_eq!(partition.nclusters, 2);
        assert!(partition.assignments[..36].iter().all(|&c| c == partition.assignments[0]));
        assert!(partition.assignments[36..].iter().all(|&c| c == partition.assignments[36]));
        assert_ne!(partition.assignments[0], partition.assignments[36]);
        assert_eq!(partition.cluster_sizes(), vec![36, 36]);
    }

    #[test]
    fn identical_points_stay_together() {
        let points = vec![vec![1.0, 1.0]; 10];
        let clusterer = KmeansClusterer::new(EuclideanMetric, 1, 3, 3, 0.01);
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let partition = clusterer.partition(&points, &mut rng);
        assert_eq!(partition, Partition::single(10));
    }

    #[test]
    fn bic_prefers_fewer_clusters_on_equal_fit() {
        let one = KmeansSolution {
            assignments: vec![0; 10],
            sizes: vec![10],
            inertia: 5.0,
        };
        let two = KmeansSolution {
            assignments: vec![0, 1, 0, 1, 0, 1, 0, 1, 0, 1],
            sizes: vec![5, 5],
            inertia: 5.0,
        };
        assert!(bic(&one, 10, 2) < bic(&two, 10, 2));
    }
}
