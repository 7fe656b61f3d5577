#![allow(dead_code, reason = "each test crate uses a different subset")]

use std::path::{Path, PathBuf};

use burn::backend::NdArray;
pub use gp_ensemble::tests::support::approx_eq;
use gp_ensemble::{Architecture, save_member};

pub type TestBackend = NdArray<f32>;

/// Saves a freshly initialised ResNet-18 and returns its path and checksum.
pub fn save_resnet18(dir: &Path, name: &str, num_classes: usize) -> (PathBuf, String) {
    let path = dir.join(name);
    let model = Architecture::ResNet18
        .config(num_classes)
        .init::<TestBackend>(&Default::default());
    let sha = save_member(model, &path).unwrap_or_else(|e| panic!("save {name}: {e}"));
    (path, sha)
}

/// Ensemble TOML whose ResNet-18 members all share `parameters`.
pub fn ensemble_toml(
    down_samplers: usize,
    up_samplers: usize,
    members: usize,
    aggregation: &str,
    parameters: &Path,
) -> String {
    let mut toml = format!(
        "down_samplers = {down_samplers}\n\
         up_samplers = {up_samplers}\n\
         input_size = 32\n\
         num_classes = 10\n\
         aggregation = \"{aggregation}\"\n"
    );
    for _ in 0..members {
        toml.push_str(&format!(
            "\n[[members]]\narchitecture = \"resnet18\"\nparameters = {:?}\n",
            parameters.display().to_string()
        ));
    }
    toml
}

/// CIFAR-10 binary records of uniform grey images with the given labels.
pub fn cifar_records(labels: &[u8]) -> Vec<u8> {
    labels
        .iter()
        .flat_map(|&label| {
            std::iter::once(label).chain(std::iter::repeat_n(128_u8, 3 * 32 * 32))
        })
        .collect()
}

/// MNIST IDX image and label files of uniform grey 28x28 digits with the
/// given labels.
pub fn mnist_idx(labels: &[u8]) -> (Vec<u8>, Vec<u8>) {
    let count = u32::try_from(labels.len()).unwrap_or_else(|e| panic!("{e}"));
    let mut images: Vec<u8> = [0x0803_u32, count, 28, 28]
        .iter()
        .flat_map(|word| word.to_be_bytes())
        .collect();
    images.extend(std::iter::repeat_n(128_u8, labels.len() * 28 * 28));
    let mut label_file: Vec<u8> = [0x0801_u32, count]
        .iter()
        .flat_map(|word| word.to_be_bytes())
        .collect();
    label_file.extend_from_slice(labels);
    (images, label_file)
}
