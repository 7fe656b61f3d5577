//! CLI argument types and the driver behind the `gpe` binary.
//! Loads from CLI args, environment (prefix `GPE_`), and optional config
//! files.

use burn::backend::NdArray;
use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use ortho_config::OrthoError;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use tracing::info;

use crate::{
    config::EnsembleConfig,
    dataset::{DatasetError, DatasetFormat, ImageSet},
    ensemble::Ensemble,
    error::{ConfigurationError, EnsembleError},
    evaluation::{Baseline, EvaluationError, RobustnessReport, evaluate},
};

/// Backend used by the command-line driver.
pub type CpuBackend = NdArray<f32>;

/// Command-line arguments for the `gpe` binary.
///
/// # Examples
///
/// Parse flags directly:
/// ```
/// use gp_ensemble::cli::GpeArgs;
/// use ortho_config::OrthoConfig;
///
/// let args = GpeArgs::load_from_iter(["gpe", "--dry-run=true", "--batch-size", "8"])
///     .expect("load args from CLI iterator");
/// assert!(args.dry_run);
/// assert_eq!(args.batch_size, 8);
/// ```
///
/// Load from a configuration file:
/// ```
/// use gp_ensemble::cli::GpeArgs;
/// use ortho_config::OrthoConfig;
/// use std::io::Write;
/// use tempfile::NamedTempFile;
///
/// let mut file = NamedTempFile::new().expect("create temp file");
/// writeln!(file, "ensemble = \"ensemble.toml\"").expect("write config");
/// let path = file.path().to_str().expect("path str");
/// let args = GpeArgs::load_from_iter(["gpe", "--config-path", path])
///     .expect("load args from config path");
/// assert_eq!(args.ensemble.as_deref(), Some(std::path::Path::new("ensemble.toml")));
/// ```
#[derive(Debug, Deserialize, ortho_config::OrthoConfig)]
#[ortho_config(prefix = "GPE")]
pub struct GpeArgs {
    /// Ensemble configuration file.
    pub ensemble: Option<PathBuf>,

    /// Dataset to evaluate: a CIFAR-10 binary batch or an MNIST IDX image
    /// file.
    pub dataset: Option<PathBuf>,

    /// Layout of `dataset`: `cifar10` (default) or `mnist`.
    pub dataset_format: Option<DatasetFormat>,

    /// MNIST IDX label file paired with `dataset`.
    pub labels: Option<PathBuf>,

    /// Images per evaluation batch.
    #[ortho_config(default = 64)]
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Stop after this many batches.
    pub max_batches: Option<usize>,

    /// Build the ensemble and stop.
    #[ortho_config(default = false)]
    #[serde(default)]
    pub dry_run: bool,

    /// Optional path to a configuration file.
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

const fn default_batch_size() -> usize {
    64
}

impl GpeArgs {
    /// Load configuration solely from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if any variable cannot be parsed.
    pub fn load_from_env() -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Env::prefixed("GPE_"))
            .extract()
            .map_err(Into::into)
    }

    /// Load configuration from a file path.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if the file cannot be read or parsed.
    pub fn load_from_config(path: &str) -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(Into::into)
    }

    /// Load configuration from environment variables and a file path.
    ///
    /// # Errors
    ///
    /// Returns an [`OrthoError`] if either source contains invalid values.
    pub fn load_from_env_and_config(path: &str) -> Result<Self, OrthoError> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("GPE_"))
            .extract()
            .map_err(Into::into)
    }
}

#[derive(Debug, Error)]
pub enum CliError {
    #[error("--ensemble is required")]
    MissingEnsemble,
    #[error("--dataset is required unless --dry-run is set")]
    MissingDataset,
    #[error("--labels is required for MNIST datasets")]
    MissingLabels,
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
}

/// Builds the configured ensemble and, unless `dry_run` is set, evaluates it
/// against the baseline attack.
///
/// Returns `None` for dry runs.
///
/// # Errors
///
/// Returns a [`CliError`] when a required path is missing or any stage fails.
pub fn run(args: &GpeArgs) -> Result<Option<RobustnessReport>, CliError> {
    let path = args.ensemble.as_deref().ok_or(CliError::MissingEnsemble)?;
    let config = EnsembleConfig::load(path)?;
    let device = Default::default();
    let ensemble = Ensemble::<CpuBackend>::new(&config, &device)?;
    info!(
        members = ensemble.members().len(),
        aggregation = ?ensemble.aggregation(),
        "ensemble ready"
    );
    if args.dry_run {
        return Ok(None);
    }

    let dataset = args.dataset.as_deref().ok_or(CliError::MissingDataset)?;
    let images = match args.dataset_format.unwrap_or_default() {
        DatasetFormat::Cifar10 => ImageSet::from_cifar10_file(dataset)?,
        DatasetFormat::Mnist => {
            let labels = args.labels.as_deref().ok_or(CliError::MissingLabels)?;
            ImageSet::from_mnist_files(dataset, labels)?
        }
    };
    let batches = images.batches::<CpuBackend>(args.batch_size, &device)?;
    let report = evaluate(&ensemble, &Baseline, batches, args.max_batches)?;
    Ok(Some(report))
}
