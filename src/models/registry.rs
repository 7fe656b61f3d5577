//! Closed registry of supported backbone architectures.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use super::resnet::{BlockKind, ResNetConfig};
use crate::error::ConfigurationError;

/// Backbone architectures an ensemble member may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Architecture {
    ResNet18,
    ResNet34,
    ResNet50,
}

impl Architecture {
    /// Every supported architecture, in registry order.
    pub const ALL: [Self; 3] = [Self::ResNet18, Self::ResNet34, Self::ResNet50];

    /// Identifier used in configuration files.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::ResNet18 => "resnet18",
            Self::ResNet34 => "resnet34",
            Self::ResNet50 => "resnet50",
        }
    }

    /// Returns the constructor configuration with a head of `num_classes`
    /// outputs.
    ///
    /// # Examples
    ///
    /// ```
    /// use gp_ensemble::models::Architecture;
    ///
    /// let config = Architecture::ResNet50.config(10);
    /// assert_eq!(config.feature_width(), 2048);
    /// ```
    #[must_use]
    pub const fn config(self, num_classes: usize) -> ResNetConfig {
        let (block, stage_depths) = match self {
            Self::ResNet18 => (BlockKind::Basic, [2, 2, 2, 2]),
            Self::ResNet34 => (BlockKind::Basic, [3, 4, 6, 3]),
            Self::ResNet50 => (BlockKind::Bottleneck, [3, 4, 6, 3]),
        };
        ResNetConfig {
            block,
            stage_depths,
            num_classes,
        }
    }
}

impl FromStr for Architecture {
    type Err = ConfigurationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalised = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|architecture| architecture.id() == normalised)
            .ok_or_else(|| ConfigurationError::UnsupportedArchitecture {
                id: value.to_owned(),
            })
    }
}

impl TryFrom<String> for Architecture {
    type Error = ConfigurationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Architecture> for String {
    fn from(value: Architecture) -> Self {
        value.id().to_owned()
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}
