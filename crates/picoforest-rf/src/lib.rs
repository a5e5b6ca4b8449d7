//! Quantized random forests for microcontrollers: train, tune, encode.
//!
//! Features are small unsigned integers of a configured bit width. Trees are
//! grown breadth-first with CART splits over bootstrap or subsample bags,
//! tuned over a hyperparameter grid with out-of-bag, validation or k-fold
//! scoring, and finally packed into a compact bit-level format whose field
//! widths are the minimum the forest needs.

mod bag;
mod bits;
mod compact;
mod config;
mod confusion;
mod consensus;
mod dataset;
mod error;
mod eval;
mod forest;
mod grid;
mod metrics;
mod node;
mod random;
mod sampler;
mod split;
mod threshold;
mod tree;

pub use bag::{Bag, MAX_MULTIPLICITY};
pub use bits::{BitReader, BitWriter, bits_for};
pub use compact::{
    BitWidths, CompactForest, FORMAT_VERSION, MAGIC, MAX_TREES, TREE_DESCRIPTOR_BYTES,
    write_compact,
};
pub use config::{EvalStrategy, ForestConfig, ParamGrid, ParamRange, TrainingParams};
pub use confusion::{ConfusionMatrix, LabelMetrics, TestReport};
pub use consensus::{
    ConsensusResult, EvaluationSample, OOB_MIN_VOTE_PERCENT, check_threshold, collect_oob_samples,
    collect_validation_samples, default_consensus_threshold, min_oob_votes,
};
pub use dataset::{Dataset, DatasetProfile, QuantBits, Sample};
pub use error::RfError;
pub use eval::{CrossValidation, CrossValidationResult};
pub use forest::{Forest, ForestStats, QueuePeak, build_forest};
pub use grid::{CandidateRecord, CandidateSink, Evaluation, GridSearch, TrainingOutcome};
pub use metrics::{MetricFlags, MetricsSummary, fbeta, metrics_at_threshold, objective_score};
pub use node::{FeatureIndex, Impurity, Node, NodeIndex};
pub use sampler::{
    BagSampler, BagStrategy, DrawnBag, MAX_BAG_RETRIES, Partitions, SplitRatios, partition,
};
pub use split::SplitCriterion;
pub use threshold::{ThresholdSearch, find_best_threshold};
pub use tree::{BuiltTree, Tree, TreeParams, build_tree};
