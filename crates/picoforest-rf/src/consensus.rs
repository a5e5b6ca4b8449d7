//! Vote tallying over all trees or over each sample's out-of-bag trees.

use rayon::iter::{IndexedParallelIterator, IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;

use crate::dataset::Dataset;
use crate::error::RfError;
use crate::forest::Forest;

/// Percentage of the forest that must be out-of-bag for a sample to be scored.
pub const OOB_MIN_VOTE_PERCENT: usize = 15;

/// Outcome of one vote over a set of trees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConsensusResult {
    /// Winning label, or `None` when no tree was eligible.
    pub predicted: Option<u8>,
    /// Votes cast for the winning label.
    pub votes: usize,
    /// Number of eligible trees.
    pub total_votes: usize,
    /// `votes / total_votes`, or 0.0 when nothing voted.
    pub consensus: f64,
}

impl ConsensusResult {
    fn unpredictable() -> Self {
        Self {
            predicted: None,
            votes: 0,
            total_votes: 0,
            consensus: 0.0,
        }
    }

    /// The predicted label if the consensus reaches `threshold`.
    #[must_use]
    pub fn accepted(&self, threshold: f64) -> Option<u8> {
        self.predicted.filter(|_| self.consensus >= threshold)
    }
}

/// A scored sample, kept only for the duration of one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EvaluationSample {
    /// True label.
    pub actual: u8,
    /// Winning label, `None` when no tree voted.
    pub predicted: Option<u8>,
    /// Votes for the winning label.
    pub votes: usize,
    /// Number of eligible trees.
    pub total_votes: usize,
    /// `votes / total_votes`.
    pub consensus: f64,
}

impl EvaluationSample {
    /// Pair a vote outcome with the sample's true label.
    #[must_use]
    pub fn new(actual: u8, result: ConsensusResult) -> Self {
        Self {
            actual,
            predicted: result.predicted,
            votes: result.votes,
            total_votes: result.total_votes,
            consensus: result.consensus,
        }
    }

    /// Return `true` if the winning label equals the true label.
    #[must_use]
    pub fn is_correct(&self) -> bool {
        self.predicted == Some(self.actual)
    }
}

/// Fewest out-of-bag trees a sample needs before it is scored.
#[must_use]
pub fn min_oob_votes(num_trees: usize) -> usize {
    num_trees.saturating_mul(OOB_MIN_VOTE_PERCENT).div_ceil(100).max(1)
}

/// Threshold used when no search result is available.
///
/// `1.25 / n_labels`, except `0.4` for two-feature data, capped at 1.0.
#[must_use]
pub fn default_consensus_threshold(n_labels: usize, n_features: usize) -> f64 {
    if n_features == 2 {
        0.4
    } else {
        (1.25 / n_labels.max(1) as f64).min(1.0)
    }
}

/// Return `threshold` if it lies in `[0.0, 1.0]`.
///
/// # Errors
///
/// Returns [`RfError::InvalidThreshold`] for values outside the range or NaN.
pub fn check_threshold(threshold: f64) -> Result<f64, RfError> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(threshold)
    } else {
        Err(RfError::InvalidThreshold { threshold })
    }
}

/// Count votes from `labels`, ties going to the label voted for first.
pub(crate) fn tally_votes(labels: impl IntoIterator<Item = u8>) -> ConsensusResult {
    let mut counts = [0usize; 256];
    let mut seen: Vec<u8> = Vec::new();
    let mut total_votes = 0usize;

    for label in labels {
        if counts[label as usize] == 0 {
            seen.push(label);
        }
        counts[label as usize] += 1;
        total_votes += 1;
    }

    let Some(&first) = seen.first() else {
        return ConsensusResult::unpredictable();
    };
    let mut best = first;
    for &label in &seen[1..] {
        if counts[label as usize] > counts[best as usize] {
            best = label;
        }
    }
    let votes = counts[best as usize];
    ConsensusResult {
        predicted: Some(best),
        votes,
        total_votes,
        consensus: votes as f64 / total_votes as f64,
    }
}

impl Forest {
    /// Tally the trees selected by `eligible` on one feature vector.
    ///
    /// Ties between labels go to the label that received a vote first,
    /// scanning trees in index order.
    pub(crate) fn tally(&self, features: &[u8], eligible: impl Fn(usize) -> bool) -> ConsensusResult {
        tally_votes(
            self.trees
                .iter()
                .enumerate()
                .filter(|(tree_index, _)| eligible(*tree_index))
                .map(|(_, tree)| tree.predict_unchecked(features)),
        )
    }

    fn check_features(&self, features: &[u8]) -> Result<(), RfError> {
        if features.len() != self.n_features {
            return Err(RfError::PredictionFeatureMismatch {
                expected: self.n_features,
                got: features.len(),
            });
        }
        Ok(())
    }

    /// Vote with every tree.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] on a feature-count mismatch.
    pub fn consensus(&self, features: &[u8]) -> Result<ConsensusResult, RfError> {
        self.check_features(features)?;
        Ok(self.tally(features, |_| true))
    }

    /// Vote with the trees that left training sample `sample` out of their bag.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] on a feature-count mismatch.
    pub fn oob_consensus(&self, sample: usize, features: &[u8]) -> Result<ConsensusResult, RfError> {
        self.check_features(features)?;
        Ok(self.tally(features, |t| self.is_out_of_bag(t, sample)))
    }

    /// Majority label over all trees.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] on a feature-count mismatch.
    pub fn predict(&self, features: &[u8]) -> Result<Option<u8>, RfError> {
        Ok(self.consensus(features)?.predicted)
    }

    /// Majority label, or `None` when its vote share is below `threshold`.
    ///
    /// # Errors
    ///
    /// | Variant                                | When                           |
    /// |----------------------------------------|--------------------------------|
    /// | [`RfError::InvalidThreshold`]          | `threshold` outside `[0, 1]`   |
    /// | [`RfError::PredictionFeatureMismatch`] | feature-count mismatch         |
    pub fn predict_with_threshold(
        &self,
        features: &[u8],
        threshold: f64,
    ) -> Result<Option<u8>, RfError> {
        let threshold = check_threshold(threshold)?;
        Ok(self.consensus(features)?.accepted(threshold))
    }
}

/// Score every training sample with its out-of-bag trees.
///
/// Samples with fewer than [`min_oob_votes`] eligible trees are left out.
/// `train` must be the dataset the forest was grown on.
#[must_use]
pub fn collect_oob_samples(forest: &Forest, train: &Dataset) -> Vec<EvaluationSample> {
    let min_votes = min_oob_votes(forest.n_trees());
    train
        .samples()
        .par_iter()
        .enumerate()
        .filter_map(|(i, sample)| {
            let result = forest.tally(sample.features(), |t| forest.is_out_of_bag(t, i));
            (result.total_votes >= min_votes).then(|| EvaluationSample::new(sample.label(), result))
        })
        .collect()
}

/// Score every sample of a held-out set with all trees.
#[must_use]
pub fn collect_validation_samples(forest: &Forest, data: &Dataset) -> Vec<EvaluationSample> {
    data.samples()
        .par_iter()
        .map(|sample| EvaluationSample::new(sample.label(), forest.tally(sample.features(), |_| true)))
        .collect()
}
