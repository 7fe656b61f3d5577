//! Pyramid resize schedule.
//!
//! Each pyramid level `i` in `[-down_samplers, up_samplers]` maps to a square
//! resolution of `round(input_size * scaling_factor^i)`. Transforms only touch
//! the spatial dimensions of a batch.

use burn::{
    nn::pool::AvgPool2dConfig,
    tensor::{
        Tensor,
        backend::Backend,
        module::interpolate,
        ops::{InterpolateMode, InterpolateOptions},
    },
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigurationError;

/// Resampling kernel used when resizing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMode {
    Nearest,
    #[default]
    Bilinear,
    Bicubic,
}

impl From<InterpolationMode> for InterpolateMode {
    fn from(value: InterpolationMode) -> Self {
        match value {
            InterpolationMode::Nearest => Self::Nearest,
            InterpolationMode::Bilinear => Self::Bilinear,
            InterpolationMode::Bicubic => Self::Bicubic,
        }
    }
}

/// Interpolation policy shared by every level of a schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Interpolation {
    /// Resampling kernel.
    #[serde(default)]
    pub mode: InterpolationMode,
    /// Box-filter integer downscales before resampling. Ignored for
    /// [`InterpolationMode::Nearest`].
    #[serde(default = "default_antialias")]
    pub antialias: bool,
}

const fn default_antialias() -> bool {
    true
}

impl Default for Interpolation {
    fn default() -> Self {
        Self {
            mode: InterpolationMode::default(),
            antialias: default_antialias(),
        }
    }
}

/// Resizes a batch to the resolution of one pyramid level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResizeTransform {
    exponent: i32,
    size: usize,
    interpolation: Interpolation,
}

impl ResizeTransform {
    /// Pyramid exponent this transform was built for.
    #[must_use]
    pub const fn exponent(&self) -> i32 {
        self.exponent
    }

    /// Target height and width in pixels.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub const fn interpolation(&self) -> Interpolation {
        self.interpolation
    }

    /// Resizes `(N, C, H, W)` to `(N, C, size, size)`.
    ///
    /// The transform always runs, including when the input already has the
    /// target resolution.
    pub fn apply<B: Backend>(&self, images: Tensor<B, 4>) -> Tensor<B, 4> {
        let [_, _, height, width] = images.dims();
        let images = if self.interpolation.antialias
            && self.interpolation.mode != InterpolationMode::Nearest
        {
            box_prefilter(images, height.min(width), self.size)
        } else {
            images
        };
        interpolate(
            images,
            [self.size, self.size],
            InterpolateOptions::new(self.interpolation.mode.into()),
        )
    }
}

fn box_prefilter<B: Backend>(images: Tensor<B, 4>, shortest: usize, size: usize) -> Tensor<B, 4> {
    let ratio = shortest / size;
    if ratio < 2 {
        return images;
    }
    AvgPool2dConfig::new([ratio, ratio])
        .with_strides([ratio, ratio])
        .init()
        .forward(images)
}

/// Number of pyramid levels for the given sampler counts.
#[must_use]
pub fn pyramid_levels(down_samplers: usize, up_samplers: usize) -> Option<usize> {
    down_samplers.checked_add(up_samplers)?.checked_add(1)
}

/// Resolution of pyramid level `exponent`.
///
/// # Errors
///
/// Returns [`ConfigurationError::TargetTooSmall`] when the rounded size is
/// below one pixel and [`ConfigurationError::TargetTooLarge`] when it is not
/// representable.
///
/// # Examples
///
/// ```
/// use gp_ensemble::schedule::target_size;
///
/// assert_eq!(target_size(32, -1, 2.0).ok(), Some(16));
/// assert_eq!(target_size(32, 1, 2.0).ok(), Some(64));
/// ```
pub fn target_size(
    input_size: usize,
    exponent: i32,
    scaling_factor: f64,
) -> Result<usize, ConfigurationError> {
    #[expect(
        clippy::cast_precision_loss,
        reason = "image sizes are far below f64 precision limits"
    )]
    let exact = input_size as f64 * scaling_factor.powi(exponent);
    let rounded = exact.round();
    if rounded < 1.0 {
        return Err(ConfigurationError::TargetTooSmall {
            exponent,
            size: exact,
        });
    }
    if !rounded.is_finite() || rounded > f64::from(u32::MAX) {
        return Err(ConfigurationError::TargetTooLarge {
            exponent,
            size: exact,
        });
    }
    #[expect(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "value is a positive integer bounded by u32::MAX"
    )]
    Ok(rounded as usize)
}

/// Builds one resize transform per pyramid level, most downscaled first.
///
/// # Errors
///
/// Returns a [`ConfigurationError`] when `input_size` is zero, the scaling
/// factor is not a finite positive number, or any level resolves to fewer
/// than one pixel.
///
/// # Examples
///
/// ```
/// use gp_ensemble::schedule::{Interpolation, build_schedule};
///
/// let schedule = build_schedule(32, 1, 1, 2.0, Interpolation::default()).unwrap();
/// let sizes: Vec<usize> = schedule.iter().map(|t| t.size()).collect();
/// assert_eq!(sizes, [16, 32, 64]);
/// ```
pub fn build_schedule(
    input_size: usize,
    down_samplers: usize,
    up_samplers: usize,
    scaling_factor: f64,
    interpolation: Interpolation,
) -> Result<Vec<ResizeTransform>, ConfigurationError> {
    if input_size == 0 {
        return Err(ConfigurationError::ZeroInputSize);
    }
    if !scaling_factor.is_finite() || scaling_factor <= 0.0 {
        return Err(ConfigurationError::InvalidScalingFactor {
            factor: scaling_factor,
        });
    }
    let levels = pyramid_levels(down_samplers, up_samplers).unwrap_or(usize::MAX);
    let too_many = || ConfigurationError::TooManyLevels { levels };
    let lowest = i32::try_from(down_samplers).map_err(|_| too_many())?;
    let highest = i32::try_from(up_samplers).map_err(|_| too_many())?;

    let schedule = (-lowest..=highest)
        .map(|exponent| {
            target_size(input_size, exponent, scaling_factor).map(|size| ResizeTransform {
                exponent,
                size,
                interpolation,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    debug!(
        sizes = ?schedule.iter().map(ResizeTransform::size).collect::<Vec<_>>(),
        "built resize schedule"
    );
    Ok(schedule)
}
