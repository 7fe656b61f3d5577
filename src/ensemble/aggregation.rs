use burn::tensor::{Tensor, TensorData, backend::Backend};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigurationError, EnsembleError};

/// Rule for combining per-member scores into one ensemble output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationPolicy {
    /// Elementwise mean of member outputs. Differentiable.
    #[default]
    #[serde(rename = "simple_avg", alias = "simple_average")]
    SimpleAverage,
    /// Each member votes for its arg-max class; the output holds each class's
    /// share of the votes, so the ensemble arg-max is the majority class with
    /// ties going to the lowest index. Not differentiable.
    #[serde(rename = "majority_vote")]
    MajorityVote,
}

impl AggregationPolicy {
    /// Combines `(batch, classes)` member outputs of identical shape.
    ///
    /// # Errors
    ///
    /// Returns `EmptyEnsemble` when `outputs` is empty and `TensorData` when
    /// member scores cannot be read back for voting.
    pub fn aggregate<B: Backend>(
        self,
        outputs: Vec<Tensor<B, 2>>,
    ) -> Result<Tensor<B, 2>, EnsembleError> {
        match self {
            Self::SimpleAverage => average(outputs),
            Self::MajorityVote => vote(outputs),
        }
    }
}

fn average<B: Backend>(outputs: Vec<Tensor<B, 2>>) -> Result<Tensor<B, 2>, EnsembleError> {
    let count = outputs.len();
    let sum = outputs
        .into_iter()
        .reduce(|acc, output| acc + output)
        .ok_or(EnsembleError::EmptyEnsemble)?;
    #[expect(
        clippy::cast_precision_loss,
        reason = "member counts are far below f32 precision limits"
    )]
    Ok(sum.div_scalar(count as f32))
}

fn vote<B: Backend>(outputs: Vec<Tensor<B, 2>>) -> Result<Tensor<B, 2>, EnsembleError> {
    let first = outputs.first().ok_or(EnsembleError::EmptyEnsemble)?;
    let [batch, classes] = first.dims();
    if classes == 0 {
        return Err(ConfigurationError::ZeroClasses.into());
    }
    let device = first.device();
    let members = outputs.len();

    let mut votes = vec![0_u32; batch * classes];
    for output in outputs {
        for (row, class) in row_argmax(output)?.into_iter().enumerate() {
            if let Some(slot) = votes.get_mut(row * classes + class) {
                *slot += 1;
            }
        }
    }

    #[expect(
        clippy::cast_precision_loss,
        reason = "vote counts are far below f32 precision limits"
    )]
    let shares: Vec<f32> = votes
        .into_iter()
        .map(|count| count as f32 / members as f32)
        .collect();
    Ok(Tensor::from_data(
        TensorData::new(shares, [batch, classes]).convert::<B::FloatElem>(),
        &device,
    ))
}

/// Arg-max of every row of a `(batch, classes)` tensor.
///
/// # Errors
///
/// Returns `TensorData` when the scores cannot be read back.
pub fn row_argmax<B: Backend>(scores: Tensor<B, 2>) -> Result<Vec<usize>, EnsembleError> {
    let [_, classes] = scores.dims();
    if classes == 0 {
        return Err(ConfigurationError::ZeroClasses.into());
    }
    let values = scores
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|err| EnsembleError::TensorData(format!("{err:?}")))?;
    Ok(values
        .chunks(classes)
        .map(|row| argmax(row).unwrap_or(0))
        .collect())
}

/// Index of the largest score; ties go to the lowest index and NaN never wins.
///
/// # Examples
///
/// ```
/// use gp_ensemble::ensemble::argmax;
///
/// assert_eq!(argmax(&[0.2, 0.7, 0.7]), Some(1));
/// assert_eq!(argmax(&[]), None);
/// ```
#[must_use]
pub fn argmax(scores: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (index, &score) in scores.iter().enumerate() {
        if !score.is_nan() && best.is_none_or(|(_, top)| score > top) {
            best = Some((index, score));
        }
    }
    best.map(|(index, _)| index).or_else(|| (!scores.is_empty()).then_some(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::support::approx_eq;
    use burn::backend::NdArray;
    use rstest::rstest;

    type TestBackend = NdArray<f32>;

    fn scores(rows: &[&[f32]]) -> Tensor<TestBackend, 2> {
        let classes = rows.first().map_or(0, |row| row.len());
        let values: Vec<f32> = rows.iter().flat_map(|row| row.iter().copied()).collect();
        Tensor::from_data(
            TensorData::new(values, [rows.len(), classes]),
            &Default::default(),
        )
    }

    fn read(tensor: Tensor<TestBackend, 2>) -> Vec<f32> {
        tensor
            .into_data()
            .to_vec::<f32>()
            .unwrap_or_else(|e| panic!("read tensor: {e:?}"))
    }

    fn three_members() -> Vec<Tensor<TestBackend, 2>> {
        vec![
            scores(&[&[1.0, 0.0]]),
            scores(&[&[0.0, 1.0]]),
            scores(&[&[1.0, 0.0]]),
        ]
    }

    #[rstest]
    fn simple_average_of_three_members() {
        let aggregated = AggregationPolicy::SimpleAverage
            .aggregate(three_members())
            .unwrap_or_else(|e| panic!("aggregate: {e}"));
        let values = read(aggregated);
        assert_eq!(values.len(), 2);
        assert!(values.first().is_some_and(|v| approx_eq(*v, 0.667, 1e-3)));
        assert!(values.get(1).is_some_and(|v| approx_eq(*v, 0.333, 1e-3)));
    }

    #[rstest]
    fn majority_vote_of_three_members() {
        let aggregated = AggregationPolicy::MajorityVote
            .aggregate(three_members())
            .unwrap_or_else(|e| panic!("aggregate: {e}"));
        let predicted = row_argmax(aggregated).unwrap_or_else(|e| panic!("argmax: {e}"));
        assert_eq!(predicted, [0]);
    }

    #[rstest]
    fn majority_vote_emits_vote_shares() {
        let outputs = vec![
            scores(&[&[0.1, 0.5, 0.4], &[0.9, 0.0, 0.1]]),
            scores(&[&[0.6, 0.3, 0.1], &[0.2, 0.7, 0.1]]),
        ];
        let values = read(
            AggregationPolicy::MajorityVote
                .aggregate(outputs)
                .unwrap_or_else(|e| panic!("aggregate: {e}")),
        );
        let expected = [0.5, 0.5, 0.0, 0.5, 0.5, 0.0];
        for (actual, wanted) in values.iter().zip(expected) {
            assert!(approx_eq(*actual, wanted, 1e-6));
        }
    }

    #[rstest]
    fn tied_votes_go_to_lowest_class() {
        let outputs = vec![scores(&[&[0.0, 0.0, 1.0]]), scores(&[&[0.0, 1.0, 0.0]])];
        let aggregated = AggregationPolicy::MajorityVote
            .aggregate(outputs)
            .unwrap_or_else(|e| panic!("aggregate: {e}"));
        assert_eq!(row_argmax(aggregated).unwrap_or_else(|e| panic!("{e}")), [1]);
    }

    #[rstest]
    fn single_member_average_is_identity() {
        let values = read(
            AggregationPolicy::SimpleAverage
                .aggregate(vec![scores(&[&[0.25, -3.0, 7.5]])])
                .unwrap_or_else(|e| panic!("aggregate: {e}")),
        );
        for (actual, wanted) in values.iter().zip([0.25, -3.0, 7.5]) {
            assert!(approx_eq(*actual, wanted, 1e-6));
        }
    }

    #[rstest]
    #[case(AggregationPolicy::SimpleAverage)]
    #[case(AggregationPolicy::MajorityVote)]
    fn empty_outputs_are_rejected(#[case] policy: AggregationPolicy) {
        let result = policy.aggregate::<TestBackend>(Vec::new());
        assert!(matches!(result, Err(EnsembleError::EmptyEnsemble)));
    }

    #[rstest]
    #[case(&[1.0, 3.0, 2.0], Some(1))]
    #[case(&[2.0, 2.0], Some(0))]
    #[case(&[f32::NAN, 1.0], Some(1))]
    #[case(&[f32::NAN], Some(0))]
    #[case(&[], None)]
    fn argmax_cases(#[case] row: &[f32], #[case] expected: Option<usize>) {
        assert_eq!(argmax(row), expected);
    }

    #[rstest]
    fn double_precision_backends_vote_and_read_back() {
        type Wide = NdArray<f64>;
        let device = Default::default();
        let outputs = vec![
            Tensor::<Wide, 2>::from_data([[1.0, 0.0], [0.2, 0.9]], &device),
            Tensor::<Wide, 2>::from_data([[0.0, 1.0], [0.1, 0.3]], &device),
            Tensor::<Wide, 2>::from_data([[1.0, 0.0], [0.0, 2.0]], &device),
        ];
        let aggregated = AggregationPolicy::MajorityVote
            .aggregate(outputs)
            .unwrap_or_else(|e| panic!("aggregate: {e}"));
        assert_eq!(
            row_argmax(aggregated).unwrap_or_else(|e| panic!("argmax: {e}")),
            [0, 1]
        );
    }

    #[rstest]
    fn serde_names_follow_voting_methods() {
        #[expect(clippy::expect_used, reason = "test should fail loudly")]
        let json = serde_json::to_string(&AggregationPolicy::SimpleAverage).expect("serialise");
        assert_eq!(json, r#""simple_avg""#);
        #[expect(clippy::expect_used, reason = "test should fail loudly")]
        let parsed: AggregationPolicy =
            serde_json::from_str(r#""majority_vote""#).expect("deserialise");
        assert_eq!(parsed, AggregationPolicy::MajorityVote);
    }
}
