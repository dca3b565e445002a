//! Nested sampling with multi-ellipsoidal bounds.
//!
//! Live points are partitioned with X-means clustering, each cluster is
//! bounded by an enlarged ellipsoid, and new points are drawn uniformly from
//! the union of the ellipsoids. A power-law rule shrinks the live set and
//! decides when to stop.

pub mod cluster;
pub mod config;
pub mod ellipsoid;
pub mod error;
pub mod evidence;
pub mod likelihood;
pub mod metric;
pub mod model;
pub mod nest;
pub mod point;
pub mod prior;
pub mod reducer;
pub mod results;
pub mod sampler;

pub use cluster::{Clusterer, KmeansClusterer, Partition};
pub use config::{ClusteringConfig, NestedSamplingConfig, ReducerConfig, SamplerConfig};
pub use ellipsoid::Ellipsoid;
pub use error::{ConfigError, GeometryError, LikelihoodError, ModelError, NsError};
pub use evidence::EvidenceAccumulator;
pub use likelihood::{Likelihood, NormalLikelihood};
pub use metric::{EuclideanMetric, Metric};
pub use model::{ForwardModel, LinearModel, RemoteModel, ReplayTransport, Transport};
pub use nest::NestedSampler;
pub use point::{ArchivedPoint, LivePoint};
pub use prior::{Prior, UniformPrior};
pub use reducer::PowerlawReducer;
pub use results::{SamplerResult, Summary, TerminationReason};
pub use sampler::EllipsoidSampler;

#[cfg(test)]
pub(crate) fn mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

#[cfg(test)]
pub(crate) fn variance(x: &[f64]) -> f64 {
    let m = mean(x);
    x.iter().map(|&x| (x - m).powf(2.0)).sum::<f64>() / x.len() as f64
}
