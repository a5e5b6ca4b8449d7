//! Quantized samples and datasets.

use std::fmt;

use crate::error::RfError;

/// Number of bits each quantized feature value occupies, in `1..=8`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
    serde::Serialize, serde::Deserialize,
)]
pub struct QuantBits(u8);

impl QuantBits {
    /// Create a bit width, rejecting values outside `1..=8`.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidQuantBits`] when `bits` is 0 or above 8.
    pub fn new(bits: u8) -> Result<Self, RfError> {
        if !(1..=8).contains(&bits) {
            return Err(RfError::InvalidQuantBits { bits });
        }
        Ok(Self(bits))
    }

    /// Clamp an arbitrary integer into `1..=8`.
    #[must_use]
    pub fn sanitized(bits: i64) -> Self {
        Self(bits.clamp(1, 8) as u8)
    }

    /// Smallest bit width able to represent `value`.
    #[must_use]
    pub fn required_for(value: u8) -> Self {
        let bits = (u8::BITS - value.leading_zeros()).max(1);
        Self(bits as u8)
    }

    /// Return the raw bit width.
    #[must_use]
    pub fn bits(self) -> u8 {
        self.0
    }

    /// Largest representable feature value.
    #[must_use]
    pub fn max_value(self) -> u8 {
        ((1u16 << self.0) - 1) as u8
    }

    /// Size of the feature alphabet, `2^bits`.
    #[must_use]
    pub fn n_values(self) -> usize {
        1usize << self.0
    }
}

impl Default for QuantBits {
    fn default() -> Self {
        Self(2)
    }
}

impl fmt::Display for QuantBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One labelled row of quantized features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    label: u8,
    features: Vec<u8>,
}

impl Sample {
    /// Create a sample from its label and quantized feature values.
    #[must_use]
    pub fn new(label: u8, features: Vec<u8>) -> Self {
        Self { label, features }
    }

    /// Return the class label.
    #[must_use]
    pub fn label(&self) -> u8 {
        self.label
    }

    /// Return the quantized feature values.
    #[must_use]
    pub fn features(&self) -> &[u8] {
        &self.features
    }
}

/// An ordered, validated collection of samples sharing one feature layout.
///
/// Derived partitions keep the label count of the dataset they were cut
/// from, so histograms stay aligned across train, test and validation.
#[derive(Debug, Clone)]
pub struct Dataset {
    samples: Vec<Sample>,
    n_features: usize,
    n_labels: usize,
    quant_bits: QuantBits,
}

impl Dataset {
    /// Validate `samples` and wrap them into a dataset.
    ///
    /// # Errors
    ///
    /// | Variant                             | When                                     |
    /// |-------------------------------------|------------------------------------------|
    /// | [`RfError::EmptyDataset`]           | `samples` is empty                       |
    /// | [`RfError::ZeroFeatures`]           | samples have zero feature columns        |
    /// | [`RfError::FeatureCountMismatch`]   | samples have inconsistent lengths        |
    /// | [`RfError::FeatureValueOutOfRange`] | a value exceeds `quant_bits.max_value()` |
    pub fn new(samples: Vec<Sample>, quant_bits: QuantBits) -> Result<Self, RfError> {
        let first = samples.first().ok_or(RfError::EmptyDataset)?;
        let n_features = first.features.len();
        if n_features == 0 {
            return Err(RfError::ZeroFeatures);
        }

        let max = quant_bits.max_value();
        for (sample_index, sample) in samples.iter().enumerate() {
            if sample.features.len() != n_features {
                return Err(RfError::FeatureCountMismatch {
                    expected: n_features,
                    got: sample.features.len(),
                    sample_index,
                });
            }
            if let Some((feature_index, &value)) =
                sample.features.iter().enumerate().find(|&(_, &v)| v > max)
            {
                return Err(RfError::FeatureValueOutOfRange {
                    sample_index,
                    feature_index,
                    value,
                    max,
                });
            }
        }

        let n_labels = samples.iter().map(|s| s.label as usize).max().unwrap_or(0) + 1;
        Ok(Self {
            samples,
            n_features,
            n_labels,
            quant_bits,
        })
    }

    /// Copy the samples at `indices`, in the given order.
    ///
    /// The label count and bit width carry over from `self`.
    #[must_use]
    pub fn subset(&self, indices: &[usize]) -> Self {
        Self {
            samples: indices.iter().map(|&i| self.samples[i].clone()).collect(),
            n_features: self.n_features,
            n_labels: self.n_labels,
            quant_bits: self.quant_bits,
        }
    }

    /// Return all samples.
    #[must_use]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Return the sample at `index`.
    #[must_use]
    pub fn sample(&self, index: usize) -> &Sample {
        &self.samples[index]
    }

    /// Return the number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Return `true` if the dataset holds no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Return the number of feature columns.
    #[must_use]
    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Return the number of label slots (largest label + 1).
    #[must_use]
    pub fn n_labels(&self) -> usize {
        self.n_labels
    }

    /// Return the quantization bit width.
    #[must_use]
    pub fn quant_bits(&self) -> QuantBits {
        self.quant_bits
    }

    /// Count samples per label.
    #[must_use]
    pub fn label_counts(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_labels];
        for sample in &self.samples {
            counts[sample.label as usize] += 1;
        }
        counts
    }

    /// Summarize the dataset shape for automatic parameter ranges.
    #[must_use]
    pub fn profile(&self) -> DatasetProfile {
        DatasetProfile {
            n_samples: self.len(),
            n_features: self.n_features,
            label_counts: self.label_counts(),
        }
    }
}

/// Shape and label distribution of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetProfile {
    /// Number of samples.
    pub n_samples: usize,
    /// Number of feature columns.
    pub n_features: usize,
    /// Samples per label slot, including empty slots.
    pub label_counts: Vec<usize>,
}

impl DatasetProfile {
    /// Number of labels that actually occur.
    #[must_use]
    pub fn n_present_labels(&self) -> usize {
        self.label_counts.iter().filter(|&&c| c > 0).count()
    }

    /// Share of the rarest present label, in percent.
    #[must_use]
    pub fn lowest_share_pct(&self) -> f64 {
        if self.n_samples == 0 {
            return 0.0;
        }
        self.label_counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| c as f64 / self.n_samples as f64 * 100.0)
            .fold(100.0, f64::min)
    }

    /// Majority count over minority count among present labels; 0 when there are none.
    #[must_use]
    pub fn imbalance_ratio(&self) -> f64 {
        let present = self.label_counts.iter().filter(|&&c| c > 0);
        let max = present.clone().max().copied().unwrap_or(0);
        let min = present.min().copied().unwrap_or(0);
        if min == 0 {
            0.0
        } else {
            max as f64 / min as f64
        }
    }
}
