//! Ensemble configuration types and their TOML/environment loading.

use std::path::{Path, PathBuf};

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use serde::{Deserialize, Serialize};

use crate::{
    ensemble::AggregationPolicy,
    error::ConfigurationError,
    member::ParameterArtefact,
    models::Architecture,
    schedule::{Interpolation, ResizeTransform, build_schedule, pyramid_levels},
};

/// Prefix for environment variables overriding scalar ensemble settings.
pub const ENV_PREFIX: &str = "GPE_ENSEMBLE_";

/// One ensemble member: a backbone and its trained parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemberSpec {
    /// Backbone architecture.
    pub architecture: Architecture,
    /// Parameter artefact, resolved against `model_dir` when relative.
    pub parameters: PathBuf,
    /// Optional SHA-256 checksum of the artefact as hexadecimal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Immutable description of a multi-scale ensemble.
///
/// `members[k]` is evaluated at pyramid exponent `k - down_samplers`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EnsembleConfig {
    /// Number of levels below the canonical resolution.
    #[serde(default)]
    pub down_samplers: usize,
    /// Number of levels above the canonical resolution.
    #[serde(default)]
    pub up_samplers: usize,
    /// Resolution ratio between adjacent levels; must be finite and positive.
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: f64,
    #[serde(default)]
    pub interpolation: Interpolation,
    /// Canonical (square) input resolution.
    pub input_size: usize,
    /// Output width of every member head.
    pub num_classes: usize,
    #[serde(default)]
    pub aggregation: AggregationPolicy,
    /// Base directory for relative parameter paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_dir: Option<PathBuf>,
    /// One member per pyramid level, most downscaled first.
    pub members: Vec<MemberSpec>,
}

const fn default_scaling_factor() -> f64 {
    2.0
}

impl EnsembleConfig {
    /// Reads a TOML file overlaid with `GPE_ENSEMBLE_*` environment
    /// variables, then validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Load`] when the file cannot be read or
    /// parsed, or any validation error from [`EnsembleConfig::validate`].
    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        Self::extract(
            Figment::new()
                .merge(Toml::file_exact(path))
                .merge(Env::prefixed(ENV_PREFIX)),
        )
    }

    /// Parses and validates an in-memory TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::Load`] for malformed documents, or any
    /// validation error from [`EnsembleConfig::validate`].
    ///
    /// # Examples
    ///
    /// ```
    /// use gp_ensemble::EnsembleConfig;
    ///
    /// let config = EnsembleConfig::from_toml_str(r#"
    ///     input_size = 32
    ///     num_classes = 10
    ///     [[members]]
    ///     architecture = "resnet18"
    ///     parameters = "resnet18_native.mpk"
    /// "#).unwrap();
    /// assert_eq!(config.pyramid_levels(), Some(1));
    /// ```
    pub fn from_toml_str(document: &str) -> Result<Self, ConfigurationError> {
        Self::extract(Figment::new().merge(Toml::string(document)))
    }

    fn extract(figment: Figment) -> Result<Self, ConfigurationError> {
        let config: Self = figment
            .extract()
            .map_err(|err| ConfigurationError::Load(Box::new(err)))?;
        config.validate()?;
        Ok(config)
    }

    /// Number of pyramid levels, or `None` on overflow.
    #[must_use]
    pub fn pyramid_levels(&self) -> Option<usize> {
        pyramid_levels(self.down_samplers, self.up_samplers)
    }

    /// Checks every invariant that can be decided without touching disk.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigurationError`] found.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        self.schedule().map(|_| ())
    }

    /// Validates the configuration and builds its resize schedule.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] when the class count is zero, the
    /// member count differs from the pyramid depth, or the schedule itself is
    /// invalid.
    pub fn schedule(&self) -> Result<Vec<ResizeTransform>, ConfigurationError> {
        if self.num_classes == 0 {
            return Err(ConfigurationError::ZeroClasses);
        }
        let levels = self
            .pyramid_levels()
            .ok_or(ConfigurationError::TooManyLevels { levels: usize::MAX })?;
        if levels != self.members.len() {
            return Err(ConfigurationError::MemberCountMismatch {
                levels,
                members: self.members.len(),
            });
        }
        build_schedule(
            self.input_size,
            self.down_samplers,
            self.up_samplers,
            self.scaling_factor,
            self.interpolation,
        )
    }

    /// Artefact descriptor for `member`, resolved against `model_dir`.
    #[must_use]
    pub fn artefact(&self, member: &MemberSpec) -> ParameterArtefact {
        let path = match &self.model_dir {
            Some(dir) if member.parameters.is_relative() => dir.join(&member.parameters),
            _ => member.parameters.clone(),
        };
        ParameterArtefact {
            path,
            sha256: member.sha256.clone(),
        }
    }
}
