//! Error taxonomy for ensemble construction and evaluation.

use std::path::PathBuf;

use thiserror::Error;

/// Malformed ensemble configuration. Raised before any artefact is read.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("ensemble has {levels} pyramid levels but {members} member specs")]
    MemberCountMismatch { levels: usize, members: usize },
    #[error("scaling factor must be finite and greater than zero but was {factor}")]
    InvalidScalingFactor { factor: f64 },
    #[error("ensemble requires input_size > 0")]
    ZeroInputSize,
    #[error("ensemble requires num_classes > 0")]
    ZeroClasses,
    #[error("pyramid level {exponent} resolves to {size} pixels, below the 1 pixel minimum")]
    TargetTooSmall { exponent: i32, size: f64 },
    #[error("pyramid level {exponent} resolves to {size} pixels, beyond the addressable range")]
    TargetTooLarge { exponent: i32, size: f64 },
    #[error("pyramid depth {levels} exceeds the supported exponent range")]
    TooManyLevels { levels: usize },
    #[error("unsupported architecture \"{id}\"; expected one of resnet18, resnet34, resnet50")]
    UnsupportedArchitecture { id: String },
    #[error("failed to read ensemble configuration: {0}")]
    Load(#[source] Box<figment::Error>),
}

/// A member parameter artefact could not be turned into a classifier.
#[derive(Debug, Error)]
pub enum ParameterLoadError {
    #[error("failed to read parameters at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parameters at {path} expected SHA-256 {expected} but found {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    #[error("failed to decode parameters at {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("parameter {tensor} at {path} has shape {actual:?} but the architecture expects {expected:?}")]
    ShapeMismatch {
        path: PathBuf,
        tensor: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("failed to encode parameters for {path}: {reason}")]
    Encode { path: PathBuf, reason: String },
}

/// A member produced output that cannot be aggregated.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("member {member} produced output of shape {actual:?} but expected {expected:?}")]
pub struct ShapeMismatchError {
    pub member: usize,
    pub expected: [usize; 2],
    pub actual: [usize; 2],
}

/// Errors returned by [`Ensemble`](crate::Ensemble).
#[derive(Debug, Error)]
pub enum EnsembleError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("failed to load member {member}: {source}")]
    ParameterLoad {
        member: usize,
        #[source]
        source: ParameterLoadError,
    },
    #[error(transparent)]
    ShapeMismatch(#[from] ShapeMismatchError),
    #[error("ensemble requires at least one member")]
    EmptyEnsemble,
    #[error("failed to read tensor data: {0}")]
    TensorData(String),
}
