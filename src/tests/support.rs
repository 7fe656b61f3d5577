use burn::tensor::{Tensor, TensorData, backend::Backend};

use crate::models::Classifier;

#[must_use]
pub fn approx_eq(a: f32, b: f32, tol: f32) -> bool {
    (a - b).abs() < tol
}

/// Linear classifier over per-channel spatial means.
///
/// Its output depends only on channel averages, so it accepts any
/// resolution, and a constant image of value `v` scores `v * weights`.
#[derive(Debug, Clone)]
pub struct ChannelMeanClassifier<B: Backend> {
    weight: Tensor<B, 2>,
}

impl<B: Backend> ChannelMeanClassifier<B> {
    /// `weights` is a row-major `[channels, classes]` matrix.
    #[must_use]
    pub fn new(weights: &[f32], channels: usize, device: &B::Device) -> Self {
        let classes = weights.len() / channels.max(1);
        Self {
            weight: Tensor::from_data(
                TensorData::new(weights.to_vec(), [channels, classes]).convert::<B::FloatElem>(),
                device,
            ),
        }
    }
}

impl<B: Backend> Classifier<B> for ChannelMeanClassifier<B> {
    fn classify(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let [batch, channels, _, _] = images.dims();
        images
            .mean_dim(3)
            .mean_dim(2)
            .reshape([batch, channels])
            .matmul(self.weight.clone())
    }
}
