//! Backbone classifiers and the architecture registry.

mod registry;
pub mod resnet;

pub use registry::Architecture;
pub use resnet::{BlockKind, ResNet, ResNetConfig};

use burn::tensor::{Tensor, backend::Backend};

/// Maps an image batch to per-class scores.
///
/// Implementors must preserve the batch dimension and emit one score per
/// class regardless of the spatial resolution they receive.
pub trait Classifier<B: Backend> {
    /// Scores an `(N, C, H, W)` batch, returning `(N, num_classes)`.
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

impl<B: Backend> Classifier<B> for ResNet<B> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        self.forward(images)
    }
}
