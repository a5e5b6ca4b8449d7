//! Confusion matrix, per-label metrics and the held-out test report.

use std::fmt;

use serde::Serialize;

use crate::consensus::EvaluationSample;
use crate::dataset::Dataset;
use crate::error::RfError;
use crate::forest::Forest;
use crate::metrics::{MetricFlags, MetricsSummary, metrics_at_threshold, objective_score};

/// A confusion matrix over accepted predictions.
///
/// Entry `matrix[true_label][predicted_label]` counts accepted predictions.
/// Samples that were rejected by the consensus threshold, or that no tree
/// voted on, are counted per true label in a separate column.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    matrix: Vec<Vec<usize>>,
    rejected: Vec<usize>,
    n_labels: usize,
}

/// Per-label precision, recall, and F1 score.
#[derive(Debug, Clone, Serialize)]
pub struct LabelMetrics {
    /// The label.
    pub label: usize,
    /// Precision: TP / (TP + FP). 0.0 if nothing was predicted as this label.
    pub precision: f64,
    /// Recall: TP / (TP + FN), rejected samples included in FN. 0.0 without support.
    pub recall: f64,
    /// F1: 2 * precision * recall / (precision + recall). 0.0 if both are zero.
    pub f1: f64,
    /// Number of true samples with this label.
    pub support: usize,
}

impl ConfusionMatrix {
    /// Build a confusion matrix from scored samples at `threshold`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`RfError::EmptyDataset`] | Zero samples provided |
    pub fn from_samples(
        samples: &[EvaluationSample],
        threshold: f64,
        n_labels: usize,
    ) -> Result<Self, RfError> {
        if samples.is_empty() {
            return Err(RfError::EmptyDataset);
        }
        let n_labels = samples
            .iter()
            .flat_map(|s| [Some(s.actual), s.predicted])
            .flatten()
            .map(|l| l as usize + 1)
            .max()
            .unwrap_or(0)
            .max(n_labels);

        let mut matrix = vec![vec![0usize; n_labels]; n_labels];
        let mut rejected = vec![0usize; n_labels];
        for s in samples {
            let actual = s.actual as usize;
            match s.predicted {
                Some(p) if s.total_votes > 0 && s.consensus >= threshold => {
                    matrix[actual][p as usize] += 1;
                }
                _ => rejected[actual] += 1,
            }
        }
        Ok(Self {
            matrix,
            rejected,
            n_labels,
        })
    }

    /// Overall accuracy: correct accepted predictions over all samples.
    #[must_use]
    pub fn accuracy(&self) -> f64 {
        let correct: usize = (0..self.n_labels).map(|i| self.matrix[i][i]).sum();
        let total = self.total();
        if total == 0 {
            0.0
        } else {
            correct as f64 / total as f64
        }
    }

    /// Number of samples in the matrix, rejected ones included.
    #[must_use]
    pub fn total(&self) -> usize {
        let accepted: usize = self.matrix.iter().flat_map(|row| row.iter()).sum();
        accepted + self.rejected.iter().sum::<usize>()
    }

    /// Per-label precision, recall, F1, and support.
    #[must_use]
    pub fn label_metrics(&self) -> Vec<LabelMetrics> {
        (0..self.n_labels)
            .map(|c| {
                let tp = self.matrix[c][c];
                let fp: usize = (0..self.n_labels)
                    .filter(|&i| i != c)
                    .map(|i| self.matrix[i][c])
                    .sum();
                let fn_: usize = (0..self.n_labels)
                    .filter(|&j| j != c)
                    .map(|j| self.matrix[c][j])
                    .sum::<usize>()
                    + self.rejected[c];
                let support = tp + fn_;
                let precision = if tp + fp == 0 {
                    0.0
                } else {
                    tp as f64 / (tp + fp) as f64
                };
                let recall = if support == 0 {
                    0.0
                } else {
                    tp as f64 / support as f64
                };
                let f1 = if precision + recall == 0.0 {
                    0.0
                } else {
                    2.0 * precision * recall / (precision + recall)
                };
                LabelMetrics {
                    label: c,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect()
    }

    /// Return the underlying matrix rows.
    #[must_use]
    pub fn as_rows(&self) -> &[Vec<usize>] {
        &self.matrix
    }

    /// Return the rejected count per true label.
    #[must_use]
    pub fn rejected(&self) -> &[usize] {
        &self.rejected
    }

    /// Return the number of labels.
    #[must_use]
    pub fn n_labels(&self) -> usize {
        self.n_labels
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>8}", "")?;
        for j in 0..self.n_labels {
            write!(f, " pred_{j:>3}")?;
        }
        writeln!(f, " rejected")?;

        for (i, row) in self.matrix.iter().enumerate() {
            write!(f, "true_{i:>3}")?;
            for val in row {
                write!(f, " {val:>7}")?;
            }
            writeln!(f, " {:>8}", self.rejected[i])?;
        }

        Ok(())
    }
}

/// Held-out test performance of a final forest.
#[derive(Debug, Clone)]
pub struct TestReport {
    /// Confusion matrix at the deployed threshold.
    pub confusion: ConfusionMatrix,
    /// Micro metrics at the deployed threshold.
    pub metrics: MetricsSummary,
    /// Objective score under the configured flags.
    pub score: f64,
}

impl TestReport {
    /// Score `test` with every tree of `forest` at `threshold`.
    ///
    /// Returns `Ok(None)` when `test` is empty.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::PredictionFeatureMismatch`] when `test` has a
    /// different feature count than the forest.
    pub fn evaluate(
        forest: &Forest,
        test: &Dataset,
        threshold: f64,
        flags: MetricFlags,
    ) -> Result<Option<Self>, RfError> {
        if test.is_empty() {
            return Ok(None);
        }
        let samples = test
            .samples()
            .iter()
            .map(|s| Ok(EvaluationSample::new(s.label(), forest.consensus(s.features())?)))
            .collect::<Result<Vec<_>, RfError>>()?;
        let metrics = metrics_at_threshold(&samples, threshold);
        let confusion = ConfusionMatrix::from_samples(&samples, threshold, forest.n_labels())?;
        Ok(Some(Self {
            confusion,
            metrics,
            score: objective_score(&metrics, flags),
        }))
    }
}
