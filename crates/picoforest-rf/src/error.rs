use std::path::PathBuf;

/// Errors from forest training, evaluation and compact encoding.
#[derive(Debug, thiserror::Error)]
pub enum RfError {
    /// Returned when the tree count is zero.
    #[error("num_trees must be at least 1, got {num_trees}")]
    InvalidTreeCount {
        /// The invalid tree count provided.
        num_trees: usize,
    },

    /// Returned when quantization bits fall outside 1..=8.
    #[error("quantization bits must be in [1, 8], got {bits}")]
    InvalidQuantBits {
        /// The invalid bit width provided.
        bits: u8,
    },

    /// Returned when a partition ratio is negative, non-finite, or all ratios sum to zero.
    #[error("invalid {name} ratio {value}")]
    InvalidRatio {
        /// Which ratio was rejected.
        name: &'static str,
        /// The offending value.
        value: f64,
    },

    /// Returned when the bootstrap ratio is not in (0.0, 1.0].
    #[error("bootstrap_ratio must be in (0.0, 1.0], got {ratio}")]
    InvalidBootstrapRatio {
        /// The invalid ratio provided.
        ratio: f64,
    },

    /// Returned when k-fold evaluation asks for fewer than 2 folds.
    #[error("k_folds must be at least 2, got {k_folds}")]
    InvalidFoldCount {
        /// The invalid fold count provided.
        k_folds: usize,
    },

    /// Returned when a hyperparameter range is empty or has a zero step.
    #[error("invalid {name} range: min {min}, max {max}, step {step}")]
    InvalidParamRange {
        /// Hyperparameter name.
        name: &'static str,
        /// Lower bound.
        min: u16,
        /// Upper bound.
        max: u16,
        /// Step size.
        step: u16,
    },

    /// Returned when the resolved parameter grid has no combinations.
    #[error("parameter grid is empty")]
    EmptyGrid,

    /// Returned when a hyperparameter value is below its minimum.
    #[error("{name} must be at least {minimum}, got {value}")]
    ParamTooSmall {
        /// Hyperparameter name.
        name: &'static str,
        /// Smallest accepted value.
        minimum: u16,
        /// The value provided.
        value: u16,
    },

    /// Returned when a metric expression names an unknown metric.
    #[error("unknown metric {token:?}, expected ACCURACY, PRECISION, RECALL or F1_SCORE")]
    InvalidMetric {
        /// The unrecognized token.
        token: String,
    },

    /// Returned when a consensus threshold is outside [0.0, 1.0].
    #[error("consensus threshold must be in [0.0, 1.0], got {threshold}")]
    InvalidThreshold {
        /// The invalid threshold provided.
        threshold: f64,
    },

    /// Returned when a dataset has zero samples.
    #[error("dataset has zero samples")]
    EmptyDataset,

    /// Returned when samples have zero feature columns.
    #[error("dataset has zero feature columns")]
    ZeroFeatures,

    /// Returned when a sample has a different number of features than expected.
    #[error("sample {sample_index} has {got} features, expected {expected}")]
    FeatureCountMismatch {
        /// The expected number of features.
        expected: usize,
        /// The actual number of features in the sample.
        got: usize,
        /// The zero-based index of the offending sample.
        sample_index: usize,
    },

    /// Returned when a quantized value exceeds the alphabet of the configured bit width.
    #[error("sample {sample_index}, feature {feature_index}: value {value} exceeds {max}")]
    FeatureValueOutOfRange {
        /// The zero-based index of the offending sample.
        sample_index: usize,
        /// The zero-based index of the offending feature column.
        feature_index: usize,
        /// The value found.
        value: u8,
        /// The largest value representable with the current bit width.
        max: u8,
    },

    /// Returned when partitioning leaves a required split empty.
    #[error("{partition} partition is empty")]
    EmptyPartition {
        /// Name of the empty partition.
        partition: &'static str,
    },

    /// Returned when prediction input has the wrong number of features.
    #[error("prediction input has {got} features, expected {expected}")]
    PredictionFeatureMismatch {
        /// The expected number of features.
        expected: usize,
        /// The actual number of features in the prediction input.
        got: usize,
    },

    /// Returned when encoding a forest with zero trees.
    #[error("forest has no trees")]
    EmptyForest,

    /// Returned when encoding a tree with zero nodes.
    #[error("tree {tree} has no nodes")]
    EmptyTree {
        /// Index of the empty tree.
        tree: usize,
    },

    /// Returned when the forest has more trees than the compact header can count.
    #[error("compact format holds at most {max} trees, got {count}")]
    TooManyTrees {
        /// Number of trees in the forest.
        count: usize,
        /// Largest count the header can hold.
        max: usize,
    },

    /// Returned when a value does not fit in its allotted bit width.
    #[error("tree {tree}: {field} value {value} does not fit in {width} bits")]
    FieldOverflow {
        /// Index of the tree being encoded.
        tree: usize,
        /// Name of the overflowing field.
        field: &'static str,
        /// The value that overflowed.
        value: u64,
        /// The width it had to fit in.
        width: u8,
    },

    /// Returned when writing the compact forest file fails.
    #[error("failed to write forest to {path}")]
    WriteForest {
        /// Path to the file that could not be written.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when reading the compact forest file fails.
    #[error("failed to read forest from {path}")]
    ReadForest {
        /// Path to the file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the file does not start with the forest magic number.
    #[error("bad magic 0x{found:08x} in forest file, expected 0x{expected:08x}")]
    BadMagic {
        /// The magic number this build expects.
        expected: u32,
        /// The value found in the file.
        found: u32,
    },

    /// Returned when decoding a forest with an unknown format version.
    #[error("incompatible forest version: expected {expected}, found {found}")]
    IncompatibleFormatVersion {
        /// The format version this build expects.
        expected: u8,
        /// The format version found in the file.
        found: u8,
    },

    /// Returned when a compact forest is truncated or internally inconsistent.
    #[error("malformed compact forest: {reason}")]
    MalformedForest {
        /// Human-readable description of the inconsistency.
        reason: String,
    },
}
