//! Labelled image readers for CIFAR-10 and MNIST.
//!
//! CIFAR-10 binary batches hold records of one label byte followed by a
//! 32x32 image stored channel by channel (red, green, blue), row-major
//! within a channel. MNIST ships as a pair of big-endian IDX files; its
//! greyscale images are replicated to three channels so every backbone
//! stem accepts them.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use burn::tensor::{Tensor, TensorData, backend::Backend};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Side length of a CIFAR-10 image.
pub const IMAGE_SIZE: usize = 32;
/// Colour channels of every image handed to a model.
pub const CHANNELS: usize = 3;
/// Label space shared by CIFAR-10 and MNIST.
pub const NUM_CLASSES: usize = 10;

const CIFAR_PIXELS: usize = CHANNELS * IMAGE_SIZE * IMAGE_SIZE;
const RECORD_LEN: usize = 1 + CIFAR_PIXELS;
const IDX_IMAGES_MAGIC: u32 = 0x0000_0803;
const IDX_LABELS_MAGIC: u32 = 0x0000_0801;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read dataset at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset of {len} bytes is not a whole number of 3073-byte records")]
    Truncated { len: usize },
    #[error("record {index} has label {label}; labels must be below 10")]
    InvalidLabel { index: usize, label: u8 },
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("IDX file starts with magic {actual:#010x} but {expected:#010x} was expected")]
    BadMagic { expected: u32, actual: u32 },
    #[error("IDX file holds {actual} bytes but its header describes {expected}")]
    IdxLength { expected: usize, actual: usize },
    #[error("{images} images but {labels} labels")]
    CountMismatch { images: usize, labels: usize },
    #[error("unknown dataset format \"{name}\"; expected cifar10 or mnist")]
    UnknownFormat { name: String },
}

/// On-disk layout of an evaluation dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetFormat {
    /// One CIFAR-10 binary batch file.
    #[default]
    Cifar10,
    /// An IDX image file plus an IDX label file.
    Mnist,
}

impl FromStr for DatasetFormat {
    type Err = DatasetError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "cifar10" => Ok(Self::Cifar10),
            "mnist" => Ok(Self::Mnist),
            _ => Err(DatasetError::UnknownFormat {
                name: value.to_owned(),
            }),
        }
    }
}

/// Labelled square images held in host memory as `(3, size, size)` arrays
/// with pixels scaled to `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageSet {
    pixels: Vec<f32>,
    labels: Vec<usize>,
    height: usize,
    width: usize,
}

fn read(path: &Path) -> Result<Vec<u8>, DatasetError> {
    fs::read(path).map_err(|source| DatasetError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn scale(pixel: u8) -> f32 {
    f32::from(pixel) / 255.0
}

fn check_label(index: usize, label: u8) -> Result<usize, DatasetError> {
    let label_index = usize::from(label);
    if label_index >= NUM_CLASSES {
        return Err(DatasetError::InvalidLabel { index, label });
    }
    Ok(label_index)
}

/// Splits an IDX file into its dimensions and payload.
fn idx_payload(bytes: &[u8], magic: u32, rank: usize) -> Result<(Vec<usize>, &[u8]), DatasetError> {
    let header_len = 4 * (rank + 1);
    let too_short = || DatasetError::IdxLength {
        expected: header_len,
        actual: bytes.len(),
    };
    let header = bytes.get(..header_len).ok_or_else(too_short)?;
    let words: Vec<u32> = header
        .chunks_exact(4)
        .map(|word| word.try_into().map(u32::from_be_bytes))
        .collect::<Result<_, _>>()
        .map_err(|_| too_short())?;
    let Some((&actual, dims)) = words.split_first() else {
        return Err(too_short());
    };
    if actual != magic {
        return Err(DatasetError::BadMagic {
            expected: magic,
            actual,
        });
    }
    let dims: Vec<usize> = dims.iter().map(|&d| d as usize).collect();
    let payload = bytes.get(header_len..).unwrap_or_default();
    let expected = dims.iter().try_fold(1_usize, |acc, &d| acc.checked_mul(d));
    if expected != Some(payload.len()) {
        return Err(DatasetError::IdxLength {
            expected: expected.map_or(usize::MAX, |body| header_len.saturating_add(body)),
            actual: bytes.len(),
        });
    }
    Ok((dims, payload))
}

impl ImageSet {
    /// Reads a CIFAR-10 binary batch file such as `test_batch.bin`.
    ///
    /// # Errors
    ///
    /// Returns `Io` when the file cannot be read, otherwise any error from
    /// [`ImageSet::from_cifar10_bytes`].
    pub fn from_cifar10_file(path: &Path) -> Result<Self, DatasetError> {
        let set = Self::from_cifar10_bytes(&read(path)?)?;
        debug!(path = %path.display(), samples = set.len(), "read CIFAR-10 batch");
        Ok(set)
    }

    /// Decodes CIFAR-10 records from memory.
    ///
    /// # Errors
    ///
    /// Returns `Truncated` when the input ends mid-record and `InvalidLabel`
    /// for labels outside the ten CIFAR-10 classes.
    pub fn from_cifar10_bytes(bytes: &[u8]) -> Result<Self, DatasetError> {
        if bytes.len() % RECORD_LEN != 0 {
            return Err(DatasetError::Truncated { len: bytes.len() });
        }
        let records = bytes.len() / RECORD_LEN;
        let mut pixels = Vec::with_capacity(records * CIFAR_PIXELS);
        let mut labels = Vec::with_capacity(records);
        for (index, record) in bytes.chunks_exact(RECORD_LEN).enumerate() {
            let Some((&label, image)) = record.split_first() else {
                continue;
            };
            labels.push(check_label(index, label)?);
            pixels.extend(image.iter().copied().map(scale));
        }
        Ok(Self {
            pixels,
            labels,
            height: IMAGE_SIZE,
            width: IMAGE_SIZE,
        })
    }

    /// Reads an MNIST image/label IDX pair such as `t10k-images-idx3-ubyte`
    /// and `t10k-labels-idx1-ubyte`.
    ///
    /// # Errors
    ///
    /// Returns `Io` when either file cannot be read, otherwise any error from
    /// [`ImageSet::from_mnist_bytes`].
    pub fn from_mnist_files(images: &Path, labels: &Path) -> Result<Self, DatasetError> {
        let set = Self::from_mnist_bytes(&read(images)?, &read(labels)?)?;
        debug!(
            images = %images.display(),
            labels = %labels.display(),
            samples = set.len(),
            "read MNIST images"
        );
        Ok(set)
    }

    /// Decodes MNIST IDX images and labels from memory, replicating each
    /// greyscale image into three identical channels.
    ///
    /// # Errors
    ///
    /// Returns `BadMagic` or `IdxLength` for malformed IDX data,
    /// `CountMismatch` when the files disagree on the sample count, and
    /// `InvalidLabel` for labels above nine.
    pub fn from_mnist_bytes(images: &[u8], labels: &[u8]) -> Result<Self, DatasetError> {
        let (image_dims, image_bytes) = idx_payload(images, IDX_IMAGES_MAGIC, 3)?;
        let (label_dims, label_bytes) = idx_payload(labels, IDX_LABELS_MAGIC, 1)?;
        let [count, height, width] = image_dims[..] else {
            return Err(DatasetError::IdxLength {
                expected: 16,
                actual: images.len(),
            });
        };
        let label_count = label_dims.first().copied().unwrap_or_default();
        if count != label_count {
            return Err(DatasetError::CountMismatch {
                images: count,
                labels: label_count,
            });
        }

        let labels = label_bytes
            .iter()
            .enumerate()
            .map(|(index, &label)| check_label(index, label))
            .collect::<Result<Vec<_>, _>>()?;
        let plane = height * width;
        let mut pixels = Vec::with_capacity(count * CHANNELS * plane);
        for image in image_bytes.chunks_exact(plane.max(1)) {
            for _ in 0..CHANNELS {
                pixels.extend(image.iter().copied().map(scale));
            }
        }
        Ok(Self {
            pixels,
            labels,
            height,
            width,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Image height and width in pixels.
    #[must_use]
    pub const fn image_dims(&self) -> [usize; 2] {
        [self.height, self.width]
    }

    /// Iterates over `(images, labels)` batches in file order. The final
    /// batch may be smaller than `batch_size`.
    ///
    /// # Errors
    ///
    /// Returns `ZeroBatchSize` when `batch_size` is zero.
    pub fn batches<B: Backend>(
        &self,
        batch_size: usize,
        device: &B::Device,
    ) -> Result<Batches<'_, B>, DatasetError> {
        if batch_size == 0 {
            return Err(DatasetError::ZeroBatchSize);
        }
        let per_image = CHANNELS * self.height * self.width;
        Ok(Batches {
            pixels: self.pixels.chunks((batch_size * per_image).max(1)),
            labels: self.labels.chunks(batch_size),
            dims: [self.height, self.width],
            device: device.clone(),
        })
    }
}

/// Iterator returned by [`ImageSet::batches`].
pub struct Batches<'a, B: Backend> {
    pixels: std::slice::Chunks<'a, f32>,
    labels: std::slice::Chunks<'a, usize>,
    dims: [usize; 2],
    device: B::Device,
}

impl<B: Backend> Iterator for Batches<'_, B> {
    type Item = (Tensor<B, 4>, Vec<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        let labels = self.labels.next()?;
        let pixels = self.pixels.next()?;
        let [height, width] = self.dims;
        let shape = [labels.len(), CHANNELS, height, width];
        let data = TensorData::new(pixels.to_vec(), shape).convert::<B::FloatElem>();
        let images = Tensor::from_data(data, &self.device);
        Some((images, labels.to_vec()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.labels.size_hint()
    }
}
