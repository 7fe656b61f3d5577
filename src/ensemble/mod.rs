//! Multi-scale ensemble: one classifier per pyramid level over a shared input.
mod aggregation;

pub use aggregation::{AggregationPolicy, argmax, row_argmax};

use std::marker::PhantomData;

use burn::tensor::{Tensor, backend::Backend};
use tracing::info;

use crate::{
    config::EnsembleConfig,
    error::{ConfigurationError, EnsembleError, ShapeMismatchError},
    member::load_member,
    models::{Classifier, ResNet},
    schedule::ResizeTransform,
};

/// A classifier bound to the resize transform of its pyramid level.
#[derive(Debug, Clone)]
pub struct EnsembleMember<C> {
    classifier: C,
    transform: ResizeTransform,
}

impl<C> EnsembleMember<C> {
    #[must_use]
    pub const fn new(classifier: C, transform: ResizeTransform) -> Self {
        Self {
            classifier,
            transform,
        }
    }

    #[must_use]
    pub const fn classifier(&self) -> &C {
        &self.classifier
    }

    #[must_use]
    pub const fn transform(&self) -> &ResizeTransform {
        &self.transform
    }
}

/// Differentiable batch-to-scores function handed to attack routines.
pub trait ModelFn<B: Backend> {
    /// Scores an `(N, C, H, W)` batch, returning `(N, num_classes)`.
    ///
    /// # Errors
    ///
    /// Returns an [`EnsembleError`] when the model cannot produce scores.
    fn scores(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 2>, EnsembleError>;

    /// Predicted class per sample, ties going to the lowest class index.
    ///
    /// # Errors
    ///
    /// Propagates errors from [`ModelFn::scores`] and score readback.
    fn predict(&self, images: Tensor<B, 4>) -> Result<Vec<usize>, EnsembleError> {
        row_argmax(self.scores(images)?)
    }
}

/// Immutable ordered set of members plus the rule combining their outputs.
#[derive(Debug)]
pub struct Ensemble<B: Backend, C = ResNet<B>> {
    members: Vec<EnsembleMember<C>>,
    aggregation: AggregationPolicy,
    num_classes: usize,
    backend: PhantomData<B>,
}

impl<B: Backend> Ensemble<B> {
    /// Loads every member described by `config` onto `device`.
    ///
    /// The whole configuration is validated before any artefact is read, and
    /// the first load failure aborts construction.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` for invalid configurations and
    /// `ParameterLoad` naming the first member whose artefact fails to load.
    pub fn new(config: &EnsembleConfig, device: &B::Device) -> Result<Self, EnsembleError> {
        let schedule = config.schedule()?;
        let members = schedule
            .into_iter()
            .zip(&config.members)
            .enumerate()
            .map(|(index, (transform, spec))| {
                let artefact = config.artefact(spec);
                let classifier =
                    load_member(spec.architecture, &artefact, config.num_classes, device)
                        .map_err(|source| EnsembleError::ParameterLoad {
                            member: index,
                            source,
                        })?;
                info!(
                    member = index,
                    architecture = %spec.architecture,
                    exponent = transform.exponent(),
                    resolution = transform.size(),
                    "loaded ensemble member"
                );
                Ok(EnsembleMember::new(classifier, transform))
            })
            .collect::<Result<Vec<_>, EnsembleError>>()?;
        Self::from_members(members, config.aggregation, config.num_classes)
    }
}

impl<B: Backend, C: Classifier<B>> Ensemble<B, C> {
    /// Composes already-built members.
    ///
    /// # Errors
    ///
    /// Returns `EmptyEnsemble` without members and `ZeroClasses` when
    /// `num_classes` is zero.
    pub fn from_members(
        members: Vec<EnsembleMember<C>>,
        aggregation: AggregationPolicy,
        num_classes: usize,
    ) -> Result<Self, EnsembleError> {
        if members.is_empty() {
            return Err(EnsembleError::EmptyEnsemble);
        }
        if num_classes == 0 {
            return Err(ConfigurationError::ZeroClasses.into());
        }
        Ok(Self {
            members,
            aggregation,
            num_classes,
            backend: PhantomData,
        })
    }

    #[must_use]
    pub fn members(&self) -> &[EnsembleMember<C>] {
        &self.members
    }

    #[must_use]
    pub const fn aggregation(&self) -> AggregationPolicy {
        self.aggregation
    }

    #[must_use]
    pub const fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Evaluates every member on its own resized copy of `images`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` when a member output is not
    /// `(batch, num_classes)`.
    pub fn member_outputs(&self, images: &Tensor<B, 4>) -> Result<Vec<Tensor<B, 2>>, EnsembleError> {
        let [batch, _, _, _] = images.dims();
        let expected = [batch, self.num_classes];
        self.members
            .iter()
            .enumerate()
            .map(|(index, member)| {
                let output = member
                    .classifier
                    .classify(member.transform.apply(images.clone()));
                let actual = output.dims();
                if actual == expected {
                    Ok(output)
                } else {
                    Err(ShapeMismatchError {
                        member: index,
                        expected,
                        actual,
                    }
                    .into())
                }
            })
            .collect()
    }

    /// Aggregated `(batch, num_classes)` scores for `images`.
    ///
    /// # Errors
    ///
    /// Returns `ShapeMismatch` for malformed member outputs and `TensorData`
    /// when majority voting cannot read member scores.
    pub fn forward(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 2>, EnsembleError> {
        let outputs = self.member_outputs(&images)?;
        self.aggregation.aggregate(outputs)
    }
}

impl<B: Backend, C: Classifier<B>> ModelFn<B> for Ensemble<B, C> {
    fn scores(&self, images: Tensor<B, 4>) -> Result<Tensor<B, 2>, EnsembleError> {
        self.forward(images)
    }
}
