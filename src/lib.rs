//! Multi-scale pyramid ensembles of image classifiers.
//!
//! An [`Ensemble`] evaluates one member classifier per pyramid level on a
//! resized copy of the input and aggregates their scores. The ensemble is a
//! plain differentiable function of its input, so robustness evaluation can
//! attack it directly.

#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod dataset;
pub mod ensemble;
pub mod error;
pub mod evaluation;
pub mod member;
pub mod models;
pub mod schedule;

#[cfg(feature = "cli")]
pub use cli::GpeArgs;
pub use config::{EnsembleConfig, MemberSpec};
pub use dataset::{DatasetError, DatasetFormat, ImageSet};
pub use ensemble::{AggregationPolicy, Ensemble, EnsembleMember, ModelFn};
pub use error::{ConfigurationError, EnsembleError, ParameterLoadError, ShapeMismatchError};
pub use evaluation::{Attack, Baseline, EvaluationError, RobustnessReport, evaluate};
pub use member::{ParameterArtefact, load_member, save_member};
pub use models::{Architecture, Classifier};
pub use schedule::{Interpolation, InterpolationMode, ResizeTransform, build_schedule};

pub mod tests;
