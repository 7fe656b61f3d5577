//! ResNet backbones in the torchvision layout.
//!
//! Batch normalisation is frozen: every layer normalises with its running
//! statistics, so a loaded backbone behaves identically under inference and
//! autodiff backends.

use burn::{
    module::{Module, Param},
    nn::{
        PaddingConfig2d,
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
    },
    tensor::{Distribution, Tensor, activation::relu, backend::Backend},
};

const STAGE_WIDTHS: [usize; 4] = [64, 128, 256, 512];
const STAGE_STRIDES: [usize; 4] = [1, 2, 2, 2];
const STEM_WIDTH: usize = 64;
const BATCH_NORM_EPSILON: f64 = 1e-5;

/// Residual block family used by a backbone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// Two 3x3 convolutions.
    Basic,
    /// 1x1 reduce, 3x3, 1x1 expand (stride on the 3x3 convolution).
    Bottleneck,
}

impl BlockKind {
    /// Channel multiplier applied to the stage width at the block output.
    #[must_use]
    pub const fn expansion(self) -> usize {
        match self {
            Self::Basic => 1,
            Self::Bottleneck => 4,
        }
    }
}

/// Structural description of a ResNet backbone with its classification head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResNetConfig {
    /// Residual block family.
    pub block: BlockKind,
    /// Number of blocks in each of the four stages.
    pub stage_depths: [usize; 4],
    /// Output width of the classification head.
    pub num_classes: usize,
}

impl ResNetConfig {
    /// Width of the pooled feature vector consumed by the head.
    #[must_use]
    pub const fn feature_width(&self) -> usize {
        512 * self.block.expansion()
    }

    /// Total number of residual blocks.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stage_depths.iter().sum()
    }

    /// Builds a backbone with freshly initialised parameters.
    #[must_use]
    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let mut in_channels = STEM_WIDTH;
        let mut blocks = Vec::new();
        for ((&width, &stride), &depth) in STAGE_WIDTHS
            .iter()
            .zip(STAGE_STRIDES.iter())
            .zip(self.stage_depths.iter())
        {
            for index in 0..depth {
                let block_stride = if index == 0 { stride } else { 1 };
                blocks.push(Residual::new(
                    self.block,
                    in_channels,
                    width,
                    block_stride,
                    device,
                ));
                in_channels = width * self.block.expansion();
            }
        }

        ResNet {
            stem: ConvBn::new(3, STEM_WIDTH, 7, 2, device),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            blocks,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
            head: ClassifierHead::new(self.feature_width(), self.num_classes, device),
        }
    }
}

/// Named parameter shapes in module traversal order.
pub type ParameterShapes = Vec<(String, Vec<usize>)>;

/// Batch normalisation pinned to its running statistics.
#[derive(Module, Debug)]
pub struct FrozenBatchNorm<B: Backend> {
    gamma: Param<Tensor<B, 1>>,
    beta: Param<Tensor<B, 1>>,
    running_mean: Param<Tensor<B, 1>>,
    running_var: Param<Tensor<B, 1>>,
    epsilon: f64,
}

impl<B: Backend> FrozenBatchNorm<B> {
    fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([channels], device)),
            beta: Param::from_tensor(Tensor::zeros([channels], device)),
            running_mean: Param::from_tensor(Tensor::zeros([channels], device)),
            running_var: Param::from_tensor(Tensor::ones([channels], device)),
            epsilon: BATCH_NORM_EPSILON,
        }
    }

    /// Normalises an `(N, C, H, W)` batch channel by channel.
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let [channels] = self.gamma.val().dims();
        let scale = self.gamma.val() / self.running_var.val().add_scalar(self.epsilon).sqrt();
        let shift = self.beta.val() - self.running_mean.val() * scale.clone();
        x * scale.reshape([1, channels, 1, 1]) + shift.reshape([1, channels, 1, 1])
    }

    fn collect_shapes(&self, prefix: &str, shapes: &mut ParameterShapes) {
        for (name, param) in [
            ("gamma", &self.gamma),
            ("beta", &self.beta),
            ("running_mean", &self.running_mean),
            ("running_var", &self.running_var),
        ] {
            shapes.push((format!("{prefix}.{name}"), param.val().dims().to_vec()));
        }
    }
}

/// Bias-free convolution followed by frozen batch normalisation.
#[derive(Module, Debug)]
pub struct ConvBn<B: Backend> {
    conv: Conv2d<B>,
    bn: FrozenBatchNorm<B>,
}

impl<B: Backend> ConvBn<B> {
    fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let padding = kernel / 2;
        let conv = Conv2dConfig::new([in_channels, out_channels], [kernel, kernel])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Explicit(padding, padding))
            .with_bias(false)
            .init(device);
        Self {
            conv,
            bn: FrozenBatchNorm::new(out_channels, device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }

    fn collect_shapes(&self, prefix: &str, shapes: &mut ParameterShapes) {
        shapes.push((
            format!("{prefix}.conv.weight"),
            self.conv.weight.val().dims().to_vec(),
        ));
        self.bn.collect_shapes(&format!("{prefix}.bn"), shapes);
    }
}

/// One residual block; `third` is present only for bottleneck blocks.
#[derive(Module, Debug)]
pub struct Residual<B: Backend> {
    first: ConvBn<B>,
    second: ConvBn<B>,
    third: Option<ConvBn<B>>,
    downsample: Option<ConvBn<B>>,
}

impl<B: Backend> Residual<B> {
    fn new(
        kind: BlockKind,
        in_channels: usize,
        width: usize,
        stride: usize,
        device: &B::Device,
    ) -> Self {
        let out_channels = width * kind.expansion();
        let (first, second, third) = match kind {
            BlockKind::Basic => (
                ConvBn::new(in_channels, width, 3, stride, device),
                ConvBn::new(width, width, 3, 1, device),
                None,
            ),
            BlockKind::Bottleneck => (
                ConvBn::new(in_channels, width, 1, 1, device),
                ConvBn::new(width, width, 3, stride, device),
                Some(ConvBn::new(width, out_channels, 1, 1, device)),
            ),
        };
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| ConvBn::new(in_channels, out_channels, 1, stride, device));
        Self {
            first,
            second,
            third,
            downsample,
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };
        let out = self.second.forward(relu(self.first.forward(x)));
        let out = match &self.third {
            Some(third) => third.forward(relu(out)),
            None => out,
        };
        relu(out + identity)
    }

    fn collect_shapes(&self, prefix: &str, shapes: &mut ParameterShapes) {
        self.first.collect_shapes(&format!("{prefix}.first"), shapes);
        self.second.collect_shapes(&format!("{prefix}.second"), shapes);
        if let Some(third) = &self.third {
            third.collect_shapes(&format!("{prefix}.third"), shapes);
        }
        if let Some(downsample) = &self.downsample {
            downsample.collect_shapes(&format!("{prefix}.downsample"), shapes);
        }
    }
}

/// Fully connected classification layer stored as `[features, classes]`.
#[derive(Module, Debug)]
pub struct ClassifierHead<B: Backend> {
    weight: Param<Tensor<B, 2>>,
    bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> ClassifierHead<B> {
    fn new(features: usize, classes: usize, device: &B::Device) -> Self {
        #[expect(
            clippy::cast_precision_loss,
            reason = "feature widths are far below f64 precision limits"
        )]
        let bound = 1.0 / (features as f64).sqrt();
        Self {
            weight: Param::from_tensor(Tensor::random(
                [features, classes],
                Distribution::Uniform(-bound, bound),
                device,
            )),
            bias: Param::from_tensor(Tensor::random(
                [classes],
                Distribution::Uniform(-bound, bound),
                device,
            )),
        }
    }

    fn forward(&self, features: Tensor<B, 2>) -> Tensor<B, 2> {
        features.matmul(self.weight.val()) + self.bias.val().unsqueeze::<2>()
    }
}

/// ResNet image classifier producing `(N, num_classes)` logits.
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    stem: ConvBn<B>,
    pool: MaxPool2d,
    blocks: Vec<Residual<B>>,
    avgpool: AdaptiveAvgPool2d,
    head: ClassifierHead<B>,
}

impl<B: Backend> ResNet<B> {
    /// Runs the backbone on an `(N, 3, H, W)` batch.
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.pool.forward(relu(self.stem.forward(images)));
        let x = self.blocks.iter().fold(x, |x, block| block.forward(x));
        let features: Tensor<B, 2> = self.avgpool.forward(x).flatten(1, 3);
        self.head.forward(features)
    }

    /// Shape of the head weight as `[features, classes]`.
    #[must_use]
    pub fn head_shape(&self) -> [usize; 2] {
        self.head.weight.val().dims()
    }

    /// Number of residual blocks across all stages.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    /// Every parameter tensor with its dotted path, e.g.
    /// `blocks.1.first.conv.weight`, stem first and head last.
    #[must_use]
    pub fn parameter_shapes(&self) -> ParameterShapes {
        let mut shapes = Vec::new();
        self.stem.collect_shapes("stem", &mut shapes);
        for (index, block) in self.blocks.iter().enumerate() {
            block.collect_shapes(&format!("blocks.{index}"), &mut shapes);
        }
        shapes.push(("head.weight".to_owned(), self.head.weight.val().dims().to_vec()));
        shapes.push(("head.bias".to_owned(), self.head.bias.val().dims().to_vec()));
        shapes
    }
}

/// Number of residual blocks stored in a decoded record.
#[must_use]
pub fn record_depth<B: Backend>(record: &ResNetRecord<B>) -> usize {
    record.blocks.len()
}
