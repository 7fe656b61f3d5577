//! Member classifier loading with artefact verification.
//!
//! Parameter artefacts are burn named-MessagePack records at full precision.
//! The classification head is rebuilt for the configured class count before
//! the record is applied, and the record must agree with it exactly.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, NamedMpkBytesRecorder, Recorder},
    tensor::backend::Backend,
};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::{
    error::ParameterLoadError,
    models::{
        Architecture, ResNet,
        resnet::{ResNetRecord, record_depth},
    },
};

type ParameterRecorder = NamedMpkBytesRecorder<FullPrecisionSettings>;

/// File-based parameter artefact with an optional recorded checksum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterArtefact {
    /// Location of the artefact on disk.
    pub path: PathBuf,
    /// Expected SHA-256 checksum expressed as hexadecimal.
    pub sha256: Option<String>,
}

impl ParameterArtefact {
    /// Artefact without checksum verification.
    #[must_use]
    pub fn unverified(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sha256: None,
        }
    }

    /// Reads the artefact and verifies its checksum when one is recorded.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the file cannot be read and `ChecksumMismatch` when
    /// the computed digest differs from `sha256`.
    pub fn read_verified(&self) -> Result<Vec<u8>, ParameterLoadError> {
        let bytes = fs::read(&self.path).map_err(|source| ParameterLoadError::Io {
            path: self.path.clone(),
            source,
        })?;
        if let Some(expected) = &self.sha256 {
            let expected = normalise_hex(expected);
            let actual = sha256_hex(&bytes);
            if actual != expected {
                return Err(ParameterLoadError::ChecksumMismatch {
                    path: self.path.clone(),
                    expected,
                    actual,
                });
            }
        }
        Ok(bytes)
    }
}

/// Lowercase hexadecimal SHA-256 digest of `bytes`.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

fn normalise_hex(value: &str) -> String {
    value.trim().to_ascii_lowercase()
}

/// Builds `architecture` with a `num_classes` head and loads its trained
/// parameters.
///
/// The returned classifier normalises with running statistics and tracks no
/// parameter gradients.
///
/// # Errors
///
/// Returns [`ParameterLoadError`] when the artefact is missing, unreadable,
/// fails checksum verification, cannot be decoded, or was saved from a
/// backbone whose block count or any parameter shape differs from
/// `architecture` with a `num_classes` head.
pub fn load_member<B: Backend>(
    architecture: Architecture,
    artefact: &ParameterArtefact,
    num_classes: usize,
    device: &B::Device,
) -> Result<ResNet<B>, ParameterLoadError> {
    let config = architecture.config(num_classes);
    let bytes = artefact.read_verified()?;
    let record: ResNetRecord<B> =
        <ParameterRecorder as Recorder<B>>::load(&ParameterRecorder::new(), bytes, device)
            .map_err(|err| ParameterLoadError::Decode {
                path: artefact.path.clone(),
                reason: format!("{err:?}"),
            })?;

    let depth = record_depth(&record);
    if depth != config.depth() {
        return Err(ParameterLoadError::ShapeMismatch {
            path: artefact.path.clone(),
            tensor: "blocks".to_owned(),
            expected: vec![config.depth()],
            actual: vec![depth],
        });
    }

    let fresh = config.init::<B>(device);
    let expected = fresh.parameter_shapes();
    let model = fresh.load_record(record);
    if let Some((tensor, expected, actual)) = first_mismatch(&expected, &model.parameter_shapes()) {
        return Err(ParameterLoadError::ShapeMismatch {
            path: artefact.path.clone(),
            tensor,
            expected,
            actual,
        });
    }

    debug!(
        path = %artefact.path.display(),
        %architecture,
        num_classes,
        "decoded member parameters"
    );
    Ok(model.no_grad())
}

/// First tensor whose loaded shape differs from the constructed one. A
/// tensor missing from either side reports an empty shape there.
fn first_mismatch(
    expected: &[(String, Vec<usize>)],
    actual: &[(String, Vec<usize>)],
) -> Option<(String, Vec<usize>, Vec<usize>)> {
    let longest = expected.len().max(actual.len());
    (0..longest).find_map(|index| match (expected.get(index), actual.get(index)) {
        (Some(want), Some(got)) if want == got => None,
        (Some((name, want)), Some((_, got))) => Some((name.clone(), want.clone(), got.clone())),
        (Some((name, want)), None) => Some((name.clone(), want.clone(), Vec::new())),
        (None, Some((name, got))) => Some((name.clone(), Vec::new(), got.clone())),
        (None, None) => None,
    })
}

/// Writes `model` in the format read by [`load_member`] and returns the
/// artefact checksum.
///
/// # Errors
///
/// Returns `Encode` when the record cannot be serialised and `Io` when the
/// file cannot be written.
pub fn save_member<B: Backend>(model: ResNet<B>, path: &Path) -> Result<String, ParameterLoadError> {
    let bytes = <ParameterRecorder as Recorder<B>>::record(
        &ParameterRecorder::new(),
        model.into_record(),
        (),
    )
    .map_err(|err| ParameterLoadError::Encode {
        path: path.to_path_buf(),
        reason: format!("{err:?}"),
    })?;
    fs::write(path, &bytes).map_err(|source| ParameterLoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(sha256_hex(&bytes))
}
