//! Bounding ellipsoids fitted to clusters of live points.
//!
//! An ellipsoid is stored through the eigendecomposition of its scaled
//! covariance `C = V diag(a^2) V^T`, where `a` are the semi-axis lengths. A point
//! `x` is inside when `(x - c)^T C^-1 (x - c) <= 1`.

use std::f64::consts::{PI, SQRT_2};

use nalgebra::{DMatrix, DVector, SymmetricEigen};
use rand::Rng;
use statrs::function::{erf::erf_inv, gamma::ln_gamma};

use crate::error::GeometryError;

/// Eigenvalues are floored at this fraction of the largest one.
pub const RELATIVE_EIGENVALUE_FLOOR: f64 = 1e-10;
/// Absolute floor used when the covariance vanishes entirely.
pub const ABSOLUTE_EIGENVALUE_FLOOR: f64 = 1e-300;

// slack on the boundary test so points sampled on the surface stay inside
const CONTAINS_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone)]
pub struct Ellipsoid {
    centroid: DVector<f64>,
    eigenvectors: DMatrix<f64>,
    semi_axes: DVector<f64>,
    shape: DMatrix<f64>,
    enlargement_fraction: f64,
    ln_volume: f64,
    regularized: bool,
}

impl Ellipsoid {
    /// Fits the ellipsoid enclosing `points`, enlarged by `enlargement_fraction` per axis.
    ///
    /// The empirical covariance is rescaled so that the farthest member (in
    /// Mahalanobis distance) lies on the surface before the enlargement is
    /// applied. Near-singular covariances, common for small clusters, are
    /// regularised by flooring their eigenvalues.
    pub fn fit(points: &[&[f64]], enlargement_fraction: f64) -> Result<Self, GeometryError> {
        let first = points.first().ok_or(GeometryError::Empty)?;
        let ndim = first.len();
        if let Some((index, point)) = points
            .iter()
            .enumerate()
            .find(|(_, point)| point.len() != ndim)
        {
            return Err(GeometryError::DimensionMismatch {
                index,
                expected: ndim,
                found: point.len(),
            });
        }

        let npoints = points.len() as f64;
        let mut centroid = DVector::<f64>::zeros(ndim);
        for point in points {
            centroid += DVector::from_column_slice(point);
        }
        centroid /= npoints;

        let mut covariance = DMatrix::<f64>::zeros(ndim, ndim);
        for point in points {
            let delta = DVector::from_column_slice(point) - &centroid;
            covariance += &delta * delta.transpose();
        }
        covariance /= npoints;

        let (eigenvectors, eigenvalues, regularized) = floored_eigen(covariance);
        let inverse = inverse_from_eigen(&eigenvectors, &eigenvalues);
        let scale = points
            .iter()
            .map(|point| {
                let delta = DVector::from_column_slice(point) - &centroid;
                (delta.transpose() * &inverse * &delta)[(0, 0)]
            })
            .fold(0.0_f64, f64::max);
        // a single point (or all points at the centroid) carries no scale information
        let scale = if scale > 0.0 { scale } else { 1.0 };

        Ok(Self::from_eigen(
            centroid,
            eigenvectors,
            eigenvalues * scale,
            enlargement_fraction,
            regularized,
        ))
    }

    /// Builds the ellipsoid `(x - c)^T covariance^-1 (x - c) <= 1`, enlarged by
    /// `enlargement_fraction` per axis.
    pub fn from_covariance(
        centroid: Vec<f64>,
        covariance: DMatrix<f64>,
        enlargement_fraction: f64,
    ) -> Result<Self, GeometryError> {
        let ndim = centroid.len();
        if ndim == 0 {
            return Err(GeometryError::Empty);
        }
        if covariance.nrows() != ndim || covariance.ncols() != ndim {
            return Err(GeometryError::DimensionMismatch {
                index: 0,
                expected: ndim,
                found: covariance.nrows(),
            });
        }
        let symmetric = 0.5 * (&covariance + covariance.transpose());
        let (eigenvectors, eigenvalues, regularized) = floored_eigen(symmetric);
        Ok(Self::from_eigen(
            DVector::from_vec(centroid),
            eigenvectors,
            eigenvalues,
            enlargement_fraction,
            regularized,
        ))
    }

    fn from_eigen(
        centroid: DVector<f64>,
        eigenvectors: DMatrix<f64>,
        eigenvalues: DVector<f64>,
        enlargement_fraction: f64,
        regularized: bool,
    ) -> Self {
        let ndim = centroid.len();
        let enlarged = eigenvalues * (1.0 + enlargement_fraction).powi(2);
        let semi_axes = enlarged.map(f64::sqrt);
        let shape = inverse_from_eigen(&eigenvectors, &enlarged);
        let ln_volume = ln_unit_ball_volume(ndim) + semi_axes.iter().map(|a| a.ln()).sum::<f64>();
        Self {
            centroid,
            eigenvectors,
            semi_axes,
            shape,
            enlargement_fraction,
            ln_volume,
            regularized,
        }
    }

    pub fn ndim(&self) -> usize {
        self.centroid.len()
    }

    pub fn centroid(&self) -> &[f64] {
        self.centroid.as_slice()
    }

    pub fn semi_axes(&self) -> &[f64] {
        self.semi_axes.as_slice()
    }

    pub fn largest_semi_axis(&self) -> f64 {
        self.semi_axes.max()
    }

    /// Inverse of the enlarged covariance.
    pub fn shape_matrix(&self) -> &DMatrix<f64> {
        &self.shape
    }

    pub fn enlargement_fraction(&self) -> f64 {
        self.enlargement_fraction
    }

    pub fn ln_volume(&self) -> f64 {
        self.ln_volume
    }

    /// Whether the covariance needed eigenvalue flooring.
    pub fn is_regularized(&self) -> bool {
        self.regularized
    }

    pub fn mahalanobis_squared(&self, point: &[f64]) -> f64 {
        let delta = DVector::from_column_slice(point) - &self.centroid;
        (delta.transpose() * &self.shape * &delta)[(0, 0)]
    }

    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.ndim() && self.mahalanobis_squared(point) <= 1.0 + CONTAINS_TOLERANCE
    }

    /// Draws a point uniformly from the interior.
    ///
    /// A direction is drawn isotropically, the radius as `u^(1/d)`, and the
    /// resulting unit-ball point is mapped through the principal axes.
    pub fn sample_uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<f64> {
        let ndim = self.ndim();
        let direction = loop {
            let z = DVector::from_fn(ndim, |_, _| standard_normal(rng));
            let norm = z.norm();
            if norm > 0.0 {
                break z / norm;
            }
        };
        let radius = rng.gen::<f64>().powf(1.0 / ndim as f64);
        let local = direction.component_mul(&self.semi_axes) * radius;
        let point = &self.centroid + &self.eigenvectors * local;
        point.as_slice().to_vec()
    }
}

fn floored_eigen(covariance: DMatrix<f64>) -> (DMatrix<f64>, DVector<f64>, bool) {
    let eigen = SymmetricEigen::new(covariance);
    let largest = eigen.eigenvalues.iter().copied().fold(0.0_f64, f64::max);
    let floor = (largest * RELATIVE_EIGENVALUE_FLOOR).max(ABSOLUTE_EIGENVALUE_FLOOR);
    let mut regularized = false;
    let eigenvalues = eigen.eigenvalues.map(|value| {
        if value < floor || !value.is_finite() {
            regularized = true;
            floor
        } else {
            value
        }
    });
    (eigen.eigenvectors, eigenvalues, regularized)
}

fn inverse_from_eigen(eigenvectors: &DMatrix<f64>, eigenvalues: &DVector<f64>) -> DMatrix<f64> {
    let inverse_diagonal = DMatrix::from_diagonal(&eigenvalues.map(|value| 1.0 / value));
    eigenvectors * inverse_diagonal * eigenvectors.transpose()
}

/// `ln(pi^(d/2) / Gamma(d/2 + 1))`
pub fn ln_unit_ball_volume(ndim: usize) -> f64 {
    let half = ndim as f64 / 2.0;
    half * PI.ln() - ln_gamma(half + 1.0)
}

pub(crate) fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    loop {
        let u: f64 = rng.gen();
        if u > 0.0 {
            return SQRT_2 * erf_inv(2.0 * u - 1.0);
        }
    }
}
