//! Robustness evaluation: clean versus perturbed accuracy of a model.

use std::convert::Infallible;

use burn::tensor::{Tensor, backend::Backend};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::{ensemble::ModelFn, error::EnsembleError};

/// Produces perturbed copies of a batch against a model.
///
/// Implementations may call [`ModelFn::scores`] any number of times and
/// differentiate through it on autodiff backends.
pub trait Attack<B: Backend> {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Name recorded in evaluation reports.
    fn name(&self) -> &str;

    /// Returns a batch with the same shape as `images`.
    ///
    /// # Errors
    ///
    /// Returns the attack's own error when no perturbation can be produced.
    fn perturb(
        &self,
        model: &dyn ModelFn<B>,
        images: Tensor<B, 4>,
        labels: &[usize],
    ) -> Result<Tensor<B, 4>, Self::Error>;
}

/// Identity attack measuring clean accuracy twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct Baseline;

impl<B: Backend> Attack<B> for Baseline {
    type Error = Infallible;

    fn name(&self) -> &str {
        "baseline"
    }

    fn perturb(
        &self,
        _model: &dyn ModelFn<B>,
        images: Tensor<B, 4>,
        _labels: &[usize],
    ) -> Result<Tensor<B, 4>, Self::Error> {
        Ok(images)
    }
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error(transparent)]
    Model(#[from] EnsembleError),
    #[error("attack {attack} failed: {source}")]
    Attack {
        attack: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("attack {attack} returned shape {actual:?} for a batch of shape {expected:?}")]
    PerturbationShape {
        attack: String,
        expected: [usize; 4],
        actual: [usize; 4],
    },
    #[error("batch holds {images} images but {labels} labels")]
    LabelCount { images: usize, labels: usize },
    #[error("failed to read tensor data: {0}")]
    TensorData(String),
}

/// Accuracy and perturbation size summary of one evaluation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobustnessReport {
    pub attack: String,
    pub samples: usize,
    pub clean_correct: usize,
    pub adversarial_correct: usize,
    pub max_l2: f32,
    pub mean_l2: f32,
    pub max_linf: f32,
    pub mean_linf: f32,
}

impl RobustnessReport {
    #[must_use]
    pub fn clean_accuracy(&self) -> f64 {
        ratio(self.clean_correct, self.samples)
    }

    #[must_use]
    pub fn adversarial_accuracy(&self) -> f64 {
        ratio(self.adversarial_correct, self.samples)
    }
}

#[expect(
    clippy::cast_precision_loss,
    reason = "sample counts are far below f64 precision limits"
)]
fn ratio(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[derive(Default)]
struct Tally {
    samples: usize,
    clean_correct: usize,
    adversarial_correct: usize,
    sum_l2: f64,
    sum_linf: f64,
    max_l2: f32,
    max_linf: f32,
}

impl Tally {
    fn add_norms(&mut self, difference: &[f32], per_sample: usize) {
        for sample in difference.chunks(per_sample.max(1)) {
            let l2 = sample.iter().map(|d| d * d).sum::<f32>().sqrt();
            let linf = sample.iter().fold(0.0_f32, |top, d| top.max(d.abs()));
            self.sum_l2 += f64::from(l2);
            self.sum_linf += f64::from(linf);
            self.max_l2 = self.max_l2.max(l2);
            self.max_linf = self.max_linf.max(linf);
        }
    }

    #[expect(
        clippy::cast_possible_truncation,
        reason = "means of f32 norms fit in f32"
    )]
    fn into_report(self, attack: String) -> RobustnessReport {
        let mean = |sum: f64| (ratio(1, self.samples) * sum) as f32;
        RobustnessReport {
            attack,
            samples: self.samples,
            clean_correct: self.clean_correct,
            adversarial_correct: self.adversarial_correct,
            max_l2: self.max_l2,
            mean_l2: mean(self.sum_l2),
            max_linf: self.max_linf,
            mean_linf: mean(self.sum_linf),
        }
    }
}

fn count_correct(predicted: &[usize], labels: &[usize]) -> usize {
    predicted
        .iter()
        .zip(labels)
        .filter(|(p, l)| p == l)
        .count()
}

/// Evaluates `model` on clean and attacked copies of every batch.
///
/// Stops after `max_batches` batches when given.
///
/// # Errors
///
/// Returns an [`EvaluationError`] when the model fails, the attack fails or
/// changes the batch shape, or a batch has mismatched labels.
pub fn evaluate<B, M, A, I>(
    model: &M,
    attack: &A,
    batches: I,
    max_batches: Option<usize>,
) -> Result<RobustnessReport, EvaluationError>
where
    B: Backend,
    M: ModelFn<B>,
    A: Attack<B>,
    I: IntoIterator<Item = (Tensor<B, 4>, Vec<usize>)>,
{
    let mut tally = Tally::default();
    let limit = max_batches.unwrap_or(usize::MAX);
    for (index, (images, labels)) in batches.into_iter().take(limit).enumerate() {
        let expected = images.dims();
        let [count, channels, height, width] = expected;
        if count != labels.len() {
            return Err(EvaluationError::LabelCount {
                images: count,
                labels: labels.len(),
            });
        }

        let clean = model.predict(images.clone())?;
        let perturbed = attack
            .perturb(model, images.clone(), &labels)
            .map_err(|err| EvaluationError::Attack {
                attack: attack.name().to_owned(),
                source: Box::new(err),
            })?;
        let actual = perturbed.dims();
        if actual != expected {
            return Err(EvaluationError::PerturbationShape {
                attack: attack.name().to_owned(),
                expected,
                actual,
            });
        }
        let adversarial = model.predict(perturbed.clone())?;

        let difference = (images - perturbed)
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|err| EvaluationError::TensorData(format!("{err:?}")))?;
        tally.add_norms(&difference, channels * height * width);

        let clean_correct = count_correct(&clean, &labels);
        let adversarial_correct = count_correct(&adversarial, &labels);
        tally.samples += count;
        tally.clean_correct += clean_correct;
        tally.adversarial_correct += adversarial_correct;
        info!(
            batch = index,
            samples = count,
            clean_correct,
            adversarial_correct,
            "evaluated batch"
        );
    }

    let report = tally.into_report(attack.name().to_owned());
    info!(
        attack = %report.attack,
        samples = report.samples,
        clean_accuracy = report.clean_accuracy(),
        adversarial_accuracy = report.adversarial_accuracy(),
        "evaluation finished"
    );
    Ok(report)
}
