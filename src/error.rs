//! Error taxonomy for the sampler.
//!
//! Only configuration problems and breaching the live-point floor are fatal.
//! Draw exhaustion, degenerate ellipsoids and numerical drift are recovered
//! locally and only show up as counters in [`crate::results::Diagnostics`].

use thiserror::Error;

/// Malformed or out-of-range run configuration. Always reported before sampling starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be a positive integer")]
    ZeroCount { field: &'static str },
    #[error("{field} must be strictly positive, got {value}")]
    NonPositive { field: &'static str, value: f64 },
    #[error("minimum number of live points ({min}) cannot exceed the initial number ({initial})")]
    LivePointBounds { min: usize, initial: usize },
    #[error("minimum number of live points ({min}) must exceed the number of dimensions ({ndim})")]
    TooFewLivePoints { min: usize, ndim: usize },
    #[error("minimum number of clusters ({min}) cannot exceed the maximum number ({max})")]
    ClusterBounds { min: usize, max: usize },
    #[error(
        "tolerance * termination_factor must be below 1, got {tolerance} * {termination_factor}"
    )]
    TerminationThreshold {
        tolerance: f64,
        termination_factor: f64,
    },
    #[error("shrinking rate must lie in [0, 1], got {0}")]
    ShrinkingRate(f64),
    #[error("enlargement fraction must be >= 0, got {0}")]
    NegativeEnlargement(f64),
    #[error("prior bounds for dimension {dim} are invalid: [{min}, {max}]")]
    PriorBounds { dim: usize, min: f64, max: f64 },
    #[error("{what} has length {found}, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("uncertainty at index {index} must be strictly positive, got {value}")]
    Uncertainty { index: usize, value: f64 },
    #[error("could not parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("could not read configuration: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of a forward model to produce predictions.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model expects {expected} parameters, got {found}")]
    ParameterCount { expected: usize, found: usize },
    #[error("transport failed: {0}")]
    Transport(String),
    #[error("malformed response on line {line}: {reason}")]
    MalformedResponse { line: usize, reason: String },
    #[error("response holds {found} predictions for {expected} covariates")]
    PredictionCount { expected: usize, found: usize },
}

/// Failure to evaluate the log-likelihood of a parameter vector.
#[derive(Debug, Error)]
pub enum LikelihoodError {
    #[error("{what} has length {found}, expected {expected}")]
    LengthMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Ellipsoid fitting errors. Near-singular covariances are not errors; they are regularised.
#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("cannot fit an ellipsoid to an empty point set")]
    Empty,
    #[error("point {index} has dimension {found}, expected {expected}")]
    DimensionMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
}

/// Crate-level error returned by the sampler.
#[derive(Debug, Error)]
pub enum NsError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("likelihood evaluation failed: {0}")]
    Likelihood(#[from] LikelihoodError),
    #[error("ellipsoid fit failed: {0}")]
    Geometry(#[from] GeometryError),
    #[error(
        "no valid draw after {attempts} attempts at iteration {iteration} with {nobjects} live points, \
         the live-point floor has been reached"
    )]
    LivePointFloor {
        iteration: usize,
        nobjects: usize,
        attempts: usize,
    },
    #[error("the sampler has already terminated")]
    Terminated,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
