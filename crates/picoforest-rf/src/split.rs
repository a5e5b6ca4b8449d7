use crate::dataset::Dataset;
use crate::node::{FeatureIndex, Impurity};

/// Criterion for measuring the quality of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SplitCriterion {
    /// Gini impurity: 1 - Σ(p_i²)
    #[default]
    Gini,
    /// Information entropy in bits: -Σ(p_i · log2(p_i))
    Entropy,
}

impl SplitCriterion {
    /// Compute the impurity of a node from its label counts.
    ///
    /// Returns [`Impurity::new(0.0)`] when `n_samples` is zero.
    #[must_use]
    pub fn impurity(&self, label_counts: &[usize], n_samples: usize) -> Impurity {
        if n_samples == 0 {
            return Impurity::new(0.0);
        }
        let n = n_samples as f64;
        let value = match self {
            SplitCriterion::Gini => {
                let sum_sq: f64 = label_counts
                    .iter()
                    .map(|&c| {
                        let p = c as f64 / n;
                        p * p
                    })
                    .sum();
                1.0 - sum_sq
            }
            SplitCriterion::Entropy => {
                -label_counts
                    .iter()
                    .filter(|&&c| c > 0)
                    .map(|&c| {
                        let p = c as f64 / n;
                        p * p.log2()
                    })
                    .sum::<f64>()
            }
        };
        Impurity::new(value)
    }

    /// Lowercase name used in configuration documents.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SplitCriterion::Gini => "gini",
            SplitCriterion::Entropy => "entropy",
        }
    }
}

/// Best split found for a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SplitCandidate {
    pub(crate) feature: FeatureIndex,
    pub(crate) threshold: u8,
    /// Parent impurity minus size-weighted child impurity.
    pub(crate) gain: f64,
    pub(crate) n_left: usize,
    pub(crate) n_right: usize,
}

/// Search `features` for the split `value <= threshold` with the highest gain.
///
/// Every quantized threshold is tried. Candidates that leave either side
/// empty are skipped. Ties keep the first candidate in feature order, then
/// threshold order. With 1-bit quantization only threshold 0 exists, so
/// the scan reduces to a zero/non-zero count per feature.
///
/// `indices` are rows of `data`; `label_counts` is their label histogram.
pub(crate) fn find_best_split(
    data: &Dataset,
    indices: &[usize],
    label_counts: &[usize],
    features: &[usize],
    criterion: SplitCriterion,
) -> Option<SplitCandidate> {
    let n_samples = indices.len();
    if n_samples < 2 || features.is_empty() {
        return None;
    }
    let n_labels = label_counts.len();
    let parent = criterion.impurity(label_counts, n_samples).value();
    let n = n_samples as f64;

    let mut best: Option<SplitCandidate> = None;
    let mut consider = |feature: usize, threshold: u8, left: &[usize], n_left: usize, right: &mut [usize]| {
        let n_right = n_samples - n_left;
        if n_left == 0 || n_right == 0 {
            return;
        }
        for (r, (&total, &l)) in right.iter_mut().zip(label_counts.iter().zip(left)) {
            *r = total - l;
        }
        let weighted = (n_left as f64 / n) * criterion.impurity(left, n_left).value()
            + (n_right as f64 / n) * criterion.impurity(right, n_right).value();
        let gain = parent - weighted;
        if best.is_none_or(|b| gain > b.gain) {
            best = Some(SplitCandidate {
                feature: FeatureIndex::new(feature),
                threshold,
                gain,
                n_left,
                n_right,
            });
        }
    };

    let mut left = vec![0usize; n_labels];
    let mut right = vec![0usize; n_labels];

    if data.quant_bits().bits() == 1 {
        for &feature in features {
            left.iter_mut().for_each(|c| *c = 0);
            let mut n_left = 0usize;
            for &row in indices {
                let sample = data.sample(row);
                if sample.features()[feature] == 0 {
                    left[sample.label() as usize] += 1;
                    n_left += 1;
                }
            }
            consider(feature, 0, &left, n_left, &mut right);
        }
        return best;
    }

    let n_values = data.quant_bits().n_values();
    let mut histogram = vec![0usize; n_values * n_labels];
    for &feature in features {
        histogram.iter_mut().for_each(|c| *c = 0);
        for &row in indices {
            let sample = data.sample(row);
            let value = sample.features()[feature] as usize;
            histogram[value * n_labels + sample.label() as usize] += 1;
        }

        left.iter_mut().for_each(|c| *c = 0);
        let mut n_left = 0usize;
        // The top value would put everything on the left.
        for threshold in 0..n_values - 1 {
            let row = &histogram[threshold * n_labels..(threshold + 1) * n_labels];
            for (l, &h) in left.iter_mut().zip(row) {
                *l += h;
                n_left += h;
            }
            consider(feature, threshold as u8, &left, n_left, &mut right);
        }
    }

    best
}

#[cfg(test)]
mod tests {
    use super::{SplitCriterion, find_best_split};
    use crate::dataset::{Dataset, QuantBits, Sample};

    fn dataset(rows: &[(u8, &[u8])], bits: u8) -> Dataset {
        let samples = rows.iter().map(|(l, f)| Sample::new(*l, f.to_vec())).collect();
        Dataset::new(samples, QuantBits::new(bits).unwrap()).unwrap()
    }

    // --- Impurity ---

    #[test]
    fn gini_pure() {
        let imp = SplitCriterion::Gini.impurity(&[10, 0, 0], 10);
        assert!((imp.value() - 0.0).abs() < f64::EPSILON);
    }

    #[test]
    fn gini_binary_balanced() {
        let imp = SplitCriterion::Gini.impurity(&[5, 5], 10);
        assert!((imp.value() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn entropy_binary_balanced_is_one_bit() {
        let imp = SplitCriterion::Entropy.impurity(&[5, 5], 10);
        assert!((imp.value() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn entropy_four_uniform_is_two_bits() {
        let imp = SplitCriterion::Entropy.impurity(&[3, 3, 3, 3], 12);
        assert!((imp.value() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn empty_node_has_zero_impurity() {
        assert_eq!(SplitCriterion::Entropy.impurity(&[0, 0], 0).value(), 0.0);
    }

    // --- find_best_split ---

    #[test]
    fn separable_feature_found() {
        // Feature 1 separates perfectly at threshold 1; feature 0 is noise.
        let ds = dataset(
            &[(0, &[2, 0]), (0, &[1, 1]), (1, &[2, 2]), (1, &[1, 3])],
            2,
        );
        let rows: Vec<usize> = (0..4).collect();
        let split = find_best_split(&ds, &rows, &[2, 2], &[0, 1], SplitCriterion::Gini)
            .expect("split exists");
        assert_eq!(split.feature.index(), 1);
        assert_eq!(split.threshold, 1);
        assert_eq!((split.n_left, split.n_right), (2, 2));
        assert!((split.gain - 0.5).abs() < 1e-12);
    }

    #[test]
    fn constant_feature_has_no_split() {
        let ds = dataset(&[(0, &[2]), (1, &[2]), (0, &[2])], 2);
        let rows: Vec<usize> = (0..3).collect();
        assert!(find_best_split(&ds, &rows, &[2, 1], &[0], SplitCriterion::Gini).is_none());
    }

    #[test]
    fn one_bit_fast_path() {
        let ds = dataset(&[(0, &[0, 1]), (0, &[0, 0]), (1, &[1, 1]), (1, &[1, 0])], 1);
        let rows: Vec<usize> = (0..4).collect();
        let split = find_best_split(&ds, &rows, &[2, 2], &[0, 1], SplitCriterion::Entropy)
            .expect("split exists");
        assert_eq!(split.feature.index(), 0);
        assert_eq!(split.threshold, 0);
        assert!((split.gain - 1.0).abs() < 1e-12);
    }

    #[test]
    fn only_listed_features_considered() {
        let ds = dataset(
            &[(0, &[2, 0]), (0, &[1, 1]), (1, &[2, 2]), (1, &[1, 3])],
            2,
        );
        let rows: Vec<usize> = (0..4).collect();
        let split = find_best_split(&ds, &rows, &[2, 2], &[0], SplitCriterion::Gini)
            .expect("feature 0 still splits");
        assert_eq!(split.feature.index(), 0);
        assert!(split.gain.abs() < 1e-12);
    }

    #[test]
    fn subset_of_rows_respected() {
        let ds = dataset(&[(0, &[0]), (1, &[3]), (0, &[0]), (1, &[3])], 2);
        let split = find_best_split(&ds, &[0, 1], &[1, 1], &[0], SplitCriterion::Gini)
            .expect("split exists");
        assert_eq!((split.n_left, split.n_right), (1, 1));
    }
}
