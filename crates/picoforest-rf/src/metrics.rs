//! Acceptance-threshold metrics and the configurable objective.

use std::fmt;
use std::ops::BitOr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::consensus::EvaluationSample;
use crate::error::RfError;

/// Set of metrics combined into the training objective.
///
/// Parsed from expressions such as `"PRECISION | RECALL"`. An empty
/// expression means [`MetricFlags::ACCURACY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricFlags(u8);

impl MetricFlags {
    /// Fraction of scored samples that were accepted and correct.
    pub const ACCURACY: Self = Self(0x01);
    /// Micro-averaged precision.
    pub const PRECISION: Self = Self(0x02);
    /// Micro-averaged recall.
    pub const RECALL: Self = Self(0x04);
    /// Micro-averaged F1.
    pub const F1_SCORE: Self = Self(0x08);

    const NAMES: [(Self, &'static str); 4] = [
        (Self::ACCURACY, "ACCURACY"),
        (Self::PRECISION, "PRECISION"),
        (Self::RECALL, "RECALL"),
        (Self::F1_SCORE, "F1_SCORE"),
    ];

    /// The empty set.
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Rebuild from raw bits, dropping unknown ones.
    #[must_use]
    pub const fn from_bits_truncate(bits: u8) -> Self {
        Self(bits & 0x0f)
    }

    /// Return the raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Return `true` if every flag in `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Return `true` if no flag is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl Default for MetricFlags {
    fn default() -> Self {
        Self::ACCURACY
    }
}

impl BitOr for MetricFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl FromStr for MetricFlags {
    type Err = RfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = Self::empty();
        for token in s.split('|').map(str::trim).filter(|t| !t.is_empty()) {
            let upper = token.to_ascii_uppercase();
            let Some((flag, _)) = Self::NAMES.iter().find(|(_, name)| *name == upper) else {
                return Err(RfError::InvalidMetric {
                    token: token.to_string(),
                });
            };
            flags = flags | *flag;
        }
        if flags.is_empty() {
            Ok(Self::ACCURACY)
        } else {
            Ok(flags)
        }
    }
}

impl TryFrom<String> for MetricFlags {
    type Error = RfError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MetricFlags> for String {
    fn from(flags: MetricFlags) -> Self {
        flags.to_string()
    }
}

impl fmt::Display for MetricFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if names.is_empty() {
            write!(f, "ACCURACY")
        } else {
            write!(f, "{}", names.join(" | "))
        }
    }
}

/// Metrics of a set of scored samples at one acceptance threshold.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MetricsSummary {
    /// Acceptance threshold the metrics were computed at.
    pub threshold: f64,
    /// Accepted and correct over all scored samples.
    pub accuracy: f64,
    /// Micro-averaged precision.
    pub precision: f64,
    /// Micro-averaged recall.
    pub recall: f64,
    /// Harmonic mean of precision and recall.
    pub f1: f64,
    /// F-beta with beta 0.5.
    pub f0_5: f64,
    /// F-beta with beta 2.
    pub f2: f64,
    /// Accepted over all scored samples.
    pub coverage: f64,
    /// Samples with at least one vote.
    pub total: usize,
    /// Samples whose consensus reached the threshold.
    pub accepted: usize,
}

/// F-beta score; 0.0 when precision and recall are both zero.
#[must_use]
pub fn fbeta(precision: f64, recall: f64, beta: f64) -> f64 {
    let b2 = beta * beta;
    let denom = b2 * precision + recall;
    if denom <= 0.0 {
        0.0
    } else {
        (1.0 + b2) * precision * recall / denom
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}

/// Compute metrics treating samples with `consensus >= threshold` as accepted.
///
/// Samples nobody voted on are always rejected. A rejected sample counts
/// as a false negative for its true label; an accepted wrong prediction
/// counts as a false positive for the predicted label and a false negative
/// for the true one.
#[must_use]
pub fn metrics_at_threshold(samples: &[EvaluationSample], threshold: f64) -> MetricsSummary {
    let mut total = 0usize;
    let mut accepted = 0usize;
    let mut tp = 0usize;
    let mut fp = 0usize;
    let mut fn_ = 0usize;

    for s in samples {
        total += 1;
        if s.predicted.is_none() || s.total_votes == 0 || s.consensus < threshold {
            fn_ += 1;
            continue;
        }
        accepted += 1;
        if s.is_correct() {
            tp += 1;
        } else {
            fp += 1;
            fn_ += 1;
        }
    }

    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fn_);
    MetricsSummary {
        threshold,
        accuracy: ratio(tp, total),
        precision,
        recall,
        f1: fbeta(precision, recall, 1.0),
        f0_5: fbeta(precision, recall, 0.5),
        f2: fbeta(precision, recall, 2.0),
        coverage: ratio(accepted, total),
        total,
        accepted,
    }
}

/// Collapse a summary into one score according to `flags`.
///
/// | Flags                         | Score                         |
/// |-------------------------------|-------------------------------|
/// | `PRECISION` only              | F0.5                          |
/// | `RECALL` only                 | F2                            |
/// | `PRECISION \| RECALL`         | F1                            |
/// | none                          | accuracy                      |
/// | anything else                 | mean of the enabled metrics   |
#[must_use]
pub fn objective_score(summary: &MetricsSummary, flags: MetricFlags) -> f64 {
    use MetricFlags as M;

    if flags.is_empty() {
        return summary.accuracy;
    }
    if flags == M::PRECISION {
        return summary.f0_5;
    }
    if flags == M::RECALL {
        return summary.f2;
    }
    let has = |f| flags.contains(f);
    if has(M::PRECISION) && has(M::RECALL) && !has(M::F1_SCORE) {
        return summary.f1;
    }

    let enabled = [
        (M::ACCURACY, summary.accuracy),
        (M::PRECISION, summary.precision),
        (M::RECALL, summary.recall),
        (M::F1_SCORE, summary.f1),
    ];
    let (sum, count) = enabled
        .iter()
        .filter(|(flag, _)| has(*flag))
        .fold((0.0, 0usize), |(sum, count), (_, value)| (sum + value, count + 1));
    if count == 0 { summary.accuracy } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(actual: u8, predicted: u8, consensus: f64) -> EvaluationSample {
        EvaluationSample {
            actual,
            predicted: Some(predicted),
            votes: (consensus * 10.0).round() as usize,
            total_votes: 10,
            consensus,
        }
    }

    // --- MetricFlags ---

    #[test]
    fn parse_combined_flags() {
        let flags: MetricFlags = "PRECISION | recall".parse().unwrap();
        assert!(flags.contains(MetricFlags::PRECISION));
        assert!(flags.contains(MetricFlags::RECALL));
        assert!(!flags.contains(MetricFlags::ACCURACY));
        assert_eq!(flags.to_string(), "PRECISION | RECALL");
    }

    #[test]
    fn empty_expression_is_accuracy() {
        assert_eq!("".parse::<MetricFlags>().unwrap(), MetricFlags::ACCURACY);
        assert_eq!(" | ".parse::<MetricFlags>().unwrap(), MetricFlags::ACCURACY);
    }

    #[test]
    fn unknown_metric_rejected() {
        let err = "ACCURACY | AUC".parse::<MetricFlags>().unwrap_err();
        assert!(matches!(err, RfError::InvalidMetric { token } if token == "AUC"));
    }

    #[test]
    fn flags_serde_as_string() {
        let flags = MetricFlags::RECALL | MetricFlags::F1_SCORE;
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(json, "\"RECALL | F1_SCORE\"");
        let back: MetricFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, flags);
    }

    // --- metrics_at_threshold ---

    #[test]
    fn rejected_samples_are_false_negatives() {
        let samples = [sample(0, 0, 0.9), sample(1, 1, 0.4), sample(1, 0, 0.8)];
        let m = metrics_at_threshold(&samples, 0.5);
        // tp 1, fp 1, fn 2
        assert_eq!((m.total, m.accepted), (3, 2));
        assert!((m.precision - 0.5).abs() < 1e-12);
        assert!((m.recall - 1.0 / 3.0).abs() < 1e-12);
        assert!((m.accuracy - 1.0 / 3.0).abs() < 1e-12);
        assert!((m.coverage - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn unvoted_samples_are_rejected() {
        let mut silent = sample(0, 0, 0.0);
        silent.predicted = None;
        silent.total_votes = 0;
        let m = metrics_at_threshold(&[silent, sample(1, 1, 1.0)], 0.5);
        assert_eq!((m.total, m.accepted), (2, 1));
        assert!((m.coverage - 0.5).abs() < 1e-12);
        assert!((m.recall - 0.5).abs() < 1e-12);
        assert!((m.accuracy - 0.5).abs() < 1e-12);
        assert!((m.precision - 1.0).abs() < 1e-12);

        // Even a zero threshold never accepts an unvoted sample.
        let m = metrics_at_threshold(&[silent, sample(1, 1, 1.0)], 0.0);
        assert_eq!((m.total, m.accepted), (2, 1));
    }

    #[test]
    fn agrees_with_confusion_matrix_on_unvoted() {
        let mut silent = sample(1, 1, 0.0);
        silent.predicted = None;
        silent.total_votes = 0;
        let samples = [silent, sample(0, 0, 1.0), sample(1, 0, 0.9)];
        let m = metrics_at_threshold(&samples, 0.0);
        let cm = crate::confusion::ConfusionMatrix::from_samples(&samples, 0.0, 2).unwrap();
        assert_eq!(m.total, cm.total());
        assert!((m.accuracy - cm.accuracy()).abs() < 1e-12);
    }

    #[test]
    fn empty_input_is_all_zero() {
        let m = metrics_at_threshold(&[], 0.5);
        assert_eq!(m.total, 0);
        assert_eq!(m.accuracy, 0.0);
        assert_eq!(m.coverage, 0.0);
    }

    // --- fbeta ---

    #[test]
    fn fbeta_values() {
        assert!((fbeta(0.5, 0.5, 1.0) - 0.5).abs() < 1e-12);
        assert_eq!(fbeta(0.0, 0.0, 2.0), 0.0);
        // Beta < 1 leans toward precision.
        assert!(fbeta(0.9, 0.3, 0.5) > fbeta(0.9, 0.3, 2.0));
    }

    // --- objective_score ---

    #[test]
    fn objective_selection() {
        let m = MetricsSummary {
            accuracy: 0.8,
            precision: 0.6,
            recall: 0.4,
            f1: 0.48,
            f0_5: 0.55,
            f2: 0.43,
            ..MetricsSummary::default()
        };
        assert_eq!(objective_score(&m, MetricFlags::PRECISION), 0.55);
        assert_eq!(objective_score(&m, MetricFlags::RECALL), 0.43);
        assert_eq!(objective_score(&m, MetricFlags::PRECISION | MetricFlags::RECALL), 0.48);
        assert_eq!(objective_score(&m, MetricFlags::empty()), 0.8);
        let mean = objective_score(&m, MetricFlags::ACCURACY | MetricFlags::F1_SCORE);
        assert!((mean - 0.64).abs() < 1e-12);
    }
}
