//! Training configuration, hyperparameter ranges and per-candidate parameters.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{DatasetProfile, QuantBits};
use crate::error::RfError;
use crate::metrics::MetricFlags;
use crate::sampler::{BagStrategy, SplitRatios};
use crate::split::SplitCriterion;
use crate::tree::TreeParams;

/// Smallest `min_split` that can still produce two children.
const MIN_SPLIT_FLOOR: u16 = 2;

/// A hyperparameter that is either pinned or searched over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamRange {
    /// A single value; the grid does not vary it.
    Fixed(u16),
    /// `min, min + step, ...` up to and including `max`.
    Span {
        /// First value.
        min: u16,
        /// Last value; always included.
        max: u16,
        /// Increment between values.
        step: u16,
    },
}

impl ParamRange {
    /// Create a validated span.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidParamRange`] if `step` is zero or `min > max`.
    pub fn span(name: &'static str, min: u16, max: u16, step: u16) -> Result<Self, RfError> {
        let range = Self::Span { min, max, step };
        range.validate(name)?;
        Ok(range)
    }

    fn validate(&self, name: &'static str) -> Result<(), RfError> {
        if let Self::Span { min, max, step } = *self
            && (step == 0 || min > max)
        {
            return Err(RfError::InvalidParamRange { name, min, max, step });
        }
        Ok(())
    }

    /// Smallest value in the range.
    #[must_use]
    pub fn min(&self) -> u16 {
        match *self {
            Self::Fixed(v) => v,
            Self::Span { min, .. } => min,
        }
    }

    /// Expand into the list of values to try.
    ///
    /// The upper bound is appended when the step skips over it.
    #[must_use]
    pub fn values(&self) -> Vec<u16> {
        match *self {
            Self::Fixed(v) => vec![v],
            Self::Span { min, max, step } => {
                let mut values: Vec<u16> = (min..=max).step_by(step.max(1) as usize).collect();
                if values.last().is_none_or(|&last| last < max) {
                    values.push(max);
                }
                values
            }
        }
    }
}

/// How candidate forests are scored during the grid search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvalStrategy {
    /// Each training sample is scored by the trees that did not draw it.
    #[default]
    #[serde(rename = "oob")]
    OutOfBag,
    /// The held-out validation partition is scored by all trees.
    #[serde(rename = "valid")]
    Validation,
    /// K-fold cross-validation over the training partition.
    #[serde(rename = "k_fold")]
    KFold,
}

impl EvalStrategy {
    /// Return `true` if the strategy needs a validation partition.
    #[must_use]
    pub fn needs_validation(self) -> bool {
        matches!(self, Self::Validation)
    }

    /// Name used in configuration documents.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OutOfBag => "oob",
            Self::Validation => "valid",
            Self::KFold => "k_fold",
        }
    }
}

/// Configuration for a training run.
///
/// Construct via [`ForestConfig::new`], then chain `with_*` methods.
/// Unset hyperparameter ranges are derived from the training data by
/// [`ParamGrid::resolve`].
///
/// A single-tree forest always trains on the full training set: bootstrap
/// is disabled, the bootstrap ratio reads as 1.0, and every node sees all
/// features.
///
/// # Defaults
///
/// | Parameter             | Default            |
/// |-----------------------|--------------------|
/// | `quant_bits`          | 2                  |
/// | `split_ratios`        | 0.7 / 0.15 / 0.15  |
/// | `min_split`           | auto               |
/// | `min_leaf`            | auto               |
/// | `max_depth`           | auto               |
/// | `max_nodes`           | `u32::MAX`         |
/// | `use_bootstrap`       | `true`             |
/// | `bootstrap_ratio`     | 0.632              |
/// | `criterion`           | `Gini`             |
/// | `impurity_threshold`  | 0.01               |
/// | `strategy`            | `OutOfBag`         |
/// | `k_folds`             | 4                  |
/// | `metric`              | `ACCURACY`         |
/// | `seed`                | 42                 |
#[derive(Debug, Clone, PartialEq)]
pub struct ForestConfig {
    pub(crate) num_trees: usize,
    pub(crate) quant_bits: QuantBits,
    pub(crate) split_ratios: SplitRatios,
    pub(crate) min_split: Option<ParamRange>,
    pub(crate) min_leaf: Option<ParamRange>,
    pub(crate) max_depth: Option<ParamRange>,
    pub(crate) max_nodes: usize,
    pub(crate) use_bootstrap: bool,
    pub(crate) bootstrap_ratio: f64,
    pub(crate) criterion: SplitCriterion,
    pub(crate) impurity_threshold: f64,
    pub(crate) strategy: EvalStrategy,
    pub(crate) k_folds: usize,
    pub(crate) metric: MetricFlags,
    pub(crate) seed: u64,
}

impl ForestConfig {
    /// Create a new config with the given number of trees.
    ///
    /// # Errors
    ///
    /// Returns [`RfError::InvalidTreeCount`] if `num_trees` is zero.
    pub fn new(num_trees: usize) -> Result<Self, RfError> {
        if num_trees == 0 {
            return Err(RfError::InvalidTreeCount { num_trees });
        }
        Ok(Self {
            num_trees,
            quant_bits: QuantBits::default(),
            split_ratios: SplitRatios::default(),
            min_split: None,
            min_leaf: None,
            max_depth: None,
            max_nodes: u32::MAX as usize,
            use_bootstrap: true,
            bootstrap_ratio: 0.632,
            criterion: SplitCriterion::Gini,
            impurity_threshold: 0.01,
            strategy: EvalStrategy::OutOfBag,
            k_folds: 4,
            metric: MetricFlags::ACCURACY,
            seed: 42,
        })
    }

    // --- Setters ---

    /// Set the quantization bit width of the feature values.
    #[must_use]
    pub fn with_quant_bits(mut self, quant_bits: QuantBits) -> Self {
        self.quant_bits = quant_bits;
        self
    }

    /// Set the train/test/validation ratios.
    #[must_use]
    pub fn with_split_ratios(mut self, split_ratios: SplitRatios) -> Self {
        self.split_ratios = split_ratios;
        self
    }

    /// Pin or range `min_split`. `None` derives it from the data.
    #[must_use]
    pub fn with_min_split(mut self, range: Option<ParamRange>) -> Self {
        self.min_split = range;
        self
    }

    /// Pin or range `min_leaf`. `None` derives it from the data.
    #[must_use]
    pub fn with_min_leaf(mut self, range: Option<ParamRange>) -> Self {
        self.min_leaf = range;
        self
    }

    /// Pin or range `max_depth`. `None` derives it from the data.
    #[must_use]
    pub fn with_max_depth(mut self, range: Option<ParamRange>) -> Self {
        self.max_depth = range;
        self
    }

    /// Set the per-tree node budget.
    #[must_use]
    pub fn with_max_nodes(mut self, max_nodes: usize) -> Self {
        self.max_nodes = max_nodes;
        self
    }

    /// Choose between bootstrap and subsample bags.
    #[must_use]
    pub fn with_use_bootstrap(mut self, use_bootstrap: bool) -> Self {
        self.use_bootstrap = use_bootstrap;
        self
    }

    /// Set the fraction of the training set drawn by subsample bags.
    #[must_use]
    pub fn with_bootstrap_ratio(mut self, bootstrap_ratio: f64) -> Self {
        self.bootstrap_ratio = bootstrap_ratio;
        self
    }

    /// Set the split quality criterion.
    #[must_use]
    pub fn with_criterion(mut self, criterion: SplitCriterion) -> Self {
        self.criterion = criterion;
        self
    }

    /// Set the minimum gain threshold before size scaling.
    #[must_use]
    pub fn with_impurity_threshold(mut self, impurity_threshold: f64) -> Self {
        self.impurity_threshold = impurity_threshold;
        self
    }

    /// Set the evaluation strategy used to score candidates.
    #[must_use]
    pub fn with_strategy(mut self, strategy: EvalStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Set the number of folds for [`EvalStrategy::KFold`].
    #[must_use]
    pub fn with_k_folds(mut self, k_folds: usize) -> Self {
        self.k_folds = k_folds;
        self
    }

    /// Set the metrics that make up the objective.
    #[must_use]
    pub fn with_metric(mut self, metric: MetricFlags) -> Self {
        self.metric = metric;
        self
    }

    /// Set the random seed for reproducibility.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    // --- Getters ---

    /// Return the number of trees.
    #[must_use]
    pub fn num_trees(&self) -> usize {
        self.num_trees
    }

    /// Return the quantization bit width.
    #[must_use]
    pub fn quant_bits(&self) -> QuantBits {
        self.quant_bits
    }

    /// Return the partition ratios.
    #[must_use]
    pub fn split_ratios(&self) -> SplitRatios {
        self.split_ratios
    }

    /// Return the configured `min_split` range, if any.
    #[must_use]
    pub fn min_split(&self) -> Option<ParamRange> {
        self.min_split
    }

    /// Return the configured `min_leaf` range, if any.
    #[must_use]
    pub fn min_leaf(&self) -> Option<ParamRange> {
        self.min_leaf
    }

    /// Return the configured `max_depth` range, if any.
    #[must_use]
    pub fn max_depth(&self) -> Option<ParamRange> {
        self.max_depth
    }

    /// Return the per-tree node budget.
    #[must_use]
    pub fn max_nodes(&self) -> usize {
        self.max_nodes
    }

    /// Return `true` if bags are drawn with replacement. Always `false` for one tree.
    #[must_use]
    pub fn use_bootstrap(&self) -> bool {
        self.use_bootstrap && !self.is_single_tree()
    }

    /// Return the subsample ratio. Always 1.0 for one tree.
    #[must_use]
    pub fn bootstrap_ratio(&self) -> f64 {
        if self.is_single_tree() {
            1.0
        } else {
            self.bootstrap_ratio
        }
    }

    /// Return the split criterion.
    #[must_use]
    pub fn criterion(&self) -> SplitCriterion {
        self.criterion
    }

    /// Return the impurity threshold.
    #[must_use]
    pub fn impurity_threshold(&self) -> f64 {
        self.impurity_threshold
    }

    /// Return the evaluation strategy.
    #[must_use]
    pub fn strategy(&self) -> EvalStrategy {
        self.strategy
    }

    /// Return the fold count for k-fold evaluation.
    #[must_use]
    pub fn k_folds(&self) -> usize {
        self.k_folds
    }

    /// Return the objective metrics.
    #[must_use]
    pub fn metric(&self) -> MetricFlags {
        self.metric
    }

    /// Return the random seed.
    #[must_use]
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Return `true` when the forest is a single decision tree.
    #[must_use]
    pub fn is_single_tree(&self) -> bool {
        self.num_trees == 1
    }

    /// Bag strategy implied by `use_bootstrap` and `bootstrap_ratio`.
    #[must_use]
    pub fn bag_strategy(&self) -> BagStrategy {
        if self.use_bootstrap() {
            BagStrategy::Bootstrap
        } else {
            BagStrategy::Subsample {
                ratio: self.bootstrap_ratio(),
            }
        }
    }

    /// Features sampled per node: all of them for one tree, else `round(sqrt(n))`.
    #[must_use]
    pub fn features_per_node(&self, n_features: usize) -> usize {
        if self.is_single_tree() {
            n_features.max(1)
        } else {
            ((n_features as f64).sqrt().round() as usize).max(1)
        }
    }

    /// Check value ranges that the setters accept unchecked.
    ///
    /// # Errors
    ///
    /// | Variant                            | When                                       |
    /// |------------------------------------|--------------------------------------------|
    /// | [`RfError::InvalidBootstrapRatio`] | ratio outside (0.0, 1.0]                   |
    /// | [`RfError::InvalidFoldCount`]      | k-fold strategy with fewer than 2 folds    |
    /// | [`RfError::InvalidRatio`]          | impurity threshold negative or non-finite  |
    /// | [`RfError::InvalidParamRange`]     | a span has zero step or `min > max`        |
    /// | [`RfError::ParamTooSmall`]         | `min_split` below 2 or `min_leaf`/`max_depth` below 1 |
    pub fn validate(&self) -> Result<(), RfError> {
        let ratio = self.bootstrap_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(RfError::InvalidBootstrapRatio { ratio });
        }
        if self.strategy == EvalStrategy::KFold && self.k_folds < 2 {
            return Err(RfError::InvalidFoldCount {
                k_folds: self.k_folds,
            });
        }
        if !self.impurity_threshold.is_finite() || self.impurity_threshold < 0.0 {
            return Err(RfError::InvalidRatio {
                name: "impurity_threshold",
                value: self.impurity_threshold,
            });
        }
        for (name, range, minimum) in [
            ("min_split", self.min_split, MIN_SPLIT_FLOOR),
            ("min_leaf", self.min_leaf, 1),
            ("max_depth", self.max_depth, 1),
        ] {
            let Some(range) = range else { continue };
            range.validate(name)?;
            if range.min() < minimum {
                return Err(RfError::ParamTooSmall {
                    name,
                    minimum,
                    value: range.min(),
                });
            }
        }
        Ok(())
    }
}

/// Parameters for building and scoring one forest.
///
/// The grid search clones one of these per candidate; the configuration
/// it was derived from is never modified.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingParams {
    /// Trees per forest.
    pub num_trees: usize,
    /// Minimum node size eligible for splitting.
    pub min_split: u16,
    /// Minimum child size.
    pub min_leaf: u16,
    /// Depth limit.
    pub max_depth: u16,
    /// Per-tree node budget.
    pub max_nodes: usize,
    /// Gain threshold before size scaling.
    pub impurity_threshold: f64,
    /// Split quality criterion.
    pub criterion: SplitCriterion,
    /// Features sampled per node.
    pub features_per_node: usize,
    /// How bags are drawn.
    pub bag_strategy: BagStrategy,
    /// Base seed for bags and feature subsets.
    pub seed: u64,
}

impl TrainingParams {
    /// Derive parameters from `config` with explicit grid values.
    #[must_use]
    pub fn from_config(
        config: &ForestConfig,
        n_features: usize,
        min_split: u16,
        min_leaf: u16,
        max_depth: u16,
    ) -> Self {
        Self {
            num_trees: config.num_trees,
            min_split,
            min_leaf,
            max_depth,
            max_nodes: config.max_nodes,
            impurity_threshold: config.impurity_threshold,
            criterion: config.criterion,
            features_per_node: config.features_per_node(n_features),
            bag_strategy: config.bag_strategy(),
            seed: config.seed,
        }
    }

    /// Tree-level view of these parameters.
    #[must_use]
    pub fn tree_params(&self) -> TreeParams {
        TreeParams::new()
            .with_min_split(self.min_split as usize)
            .with_min_leaf(self.min_leaf as usize)
            .with_max_depth(self.max_depth as usize)
            .with_max_nodes(self.max_nodes)
            .with_impurity_threshold(self.impurity_threshold)
            .with_criterion(self.criterion)
            .with_max_features(Some(self.features_per_node))
    }
}

/// Resolved value lists for the three searched hyperparameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamGrid {
    /// `min_split` values, outermost loop.
    pub min_split: Vec<u16>,
    /// `min_leaf` values, middle loop.
    pub min_leaf: Vec<u16>,
    /// `max_depth` values, innermost loop.
    pub max_depth: Vec<u16>,
}

/// Step for auto ranges: coarser as `samples * features` grows.
fn size_step(profile: &DatasetProfile) -> u16 {
    let total = profile.n_samples.saturating_mul(profile.n_features);
    if total < 50_000 {
        1
    } else if total < 1_000_000 {
        2
    } else {
        3
    }
}

impl ParamGrid {
    /// Combine configured ranges with ranges derived from `profile`.
    ///
    /// Derived ranges:
    ///
    /// - `min_split`: 2 to 6, step 1/2/3 by dataset size (1 if `min_leaf` is pinned).
    /// - `min_leaf`: fractions of the `min_split` bounds, scaled by samples per
    ///   label and by how far the rarest label falls below an even share.
    /// - `max_depth`: up to `max(8, floor(log2 n + log2 f) + 1)`, starting 2, 4
    ///   or 6 below it (or at 4), always including the upper bound.
    #[must_use]
    pub fn resolve(config: &ForestConfig, profile: &DatasetProfile) -> Self {
        let step = size_step(profile);
        let n = profile.n_samples.max(1);
        let f = profile.n_features.max(1);

        // The grid floor is 2 regardless of size; larger sets only widen the step.
        let split_min = MIN_SPLIT_FLOOR;
        let split_max = split_min + 4;

        let min_split = match config.min_split {
            Some(range) => range.values(),
            None => {
                let step = if config.min_leaf.is_some() { 1 } else { step };
                ParamRange::Span {
                    min: split_min,
                    max: split_max,
                    step,
                }
                .values()
            }
        };

        let min_leaf = match config.min_leaf {
            Some(range) => range.values(),
            None => {
                let (min, max) = auto_leaf_bounds(profile, split_min, split_max);
                ParamRange::Span { min, max, step: 1 }.values()
            }
        };

        let max_depth = match config.max_depth {
            Some(range) => range.values(),
            None => {
                let base = ((n as f64).log2() + (f as f64).log2()).floor() as u16 + 1;
                let max = base.max(8);
                let min = match max {
                    m if m > 18 => m - 6,
                    m if m > 12 => m - 4,
                    m if m > 8 => m - 2,
                    _ => 4,
                };
                ParamRange::Span { min, max, step }.values()
            }
        };

        let grid = Self {
            min_split,
            min_leaf,
            max_depth,
        };
        debug!(
            min_split = ?grid.min_split,
            min_leaf = ?grid.min_leaf,
            max_depth = ?grid.max_depth,
            "parameter grid resolved"
        );
        grid
    }

    /// Number of combinations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.min_split.len() * self.min_leaf.len() * self.max_depth.len()
    }

    /// Return `true` if any list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All `(min_split, min_leaf, max_depth)` combinations, `max_depth` varying fastest.
    pub fn combinations(&self) -> impl Iterator<Item = (u16, u16, u16)> + '_ {
        self.min_split.iter().flat_map(move |&split| {
            self.min_leaf.iter().flat_map(move |&leaf| {
                self.max_depth.iter().map(move |&depth| (split, leaf, depth))
            })
        })
    }

    /// Middle of each list, used when the search is skipped.
    #[must_use]
    pub fn midpoint(&self) -> (u16, u16, u16) {
        let mid = |values: &[u16]| values.get(values.len() / 2).copied().unwrap_or(1);
        (
            mid(&self.min_split).max(MIN_SPLIT_FLOOR),
            mid(&self.min_leaf).max(1),
            mid(&self.max_depth).max(1),
        )
    }
}

fn auto_leaf_bounds(profile: &DatasetProfile, split_min: u16, split_max: u16) -> (u16, u16) {
    let n_labels = profile.n_present_labels().max(1) as f64;
    let samples_per_label = profile.n_samples as f64 / n_labels;
    let density = (samples_per_label / 600.0).clamp(0.3, 3.0);
    let expected_pct = 100.0 / n_labels;
    let deficit = (expected_pct - profile.lowest_share_pct()).max(0.0);
    let imbalance = 1.0 - (deficit / expected_pct).min(0.5);

    let min_ratio = (0.12 + 0.05 * density * imbalance).clamp(0.1, 0.35);
    let max_ratio = (min_ratio + 0.12 + 0.04 * density).clamp(min_ratio + 0.1, 0.6);

    let cap = split_max.saturating_sub(1).max(1);
    let min_leaf = ((f64::from(split_min) * min_ratio).floor() as u16).min(cap).max(1);
    let max_leaf = ((f64::from(split_max) * max_ratio).ceil() as u16)
        .min(cap)
        .max(min_leaf);
    (min_leaf, max_leaf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(n_samples: usize, n_features: usize, label_counts: Vec<usize>) -> DatasetProfile {
        DatasetProfile {
            n_samples,
            n_features,
            label_counts,
        }
    }

    // --- ParamRange ---

    #[test]
    fn span_values_include_max() {
        let r = ParamRange::span("max_depth", 4, 9, 2).unwrap();
        assert_eq!(r.values(), vec![4, 6, 8, 9]);
        assert_eq!(ParamRange::Fixed(7).values(), vec![7]);
    }

    #[test]
    fn invalid_span_rejected() {
        assert!(matches!(
            ParamRange::span("min_leaf", 3, 2, 1).unwrap_err(),
            RfError::InvalidParamRange { name: "min_leaf", .. }
        ));
        assert!(ParamRange::span("min_leaf", 1, 2, 0).is_err());
    }

    #[test]
    fn param_range_deserializes_both_forms() {
        let fixed: ParamRange = serde_json::from_str("5").unwrap();
        assert_eq!(fixed, ParamRange::Fixed(5));
        let span: ParamRange = serde_json::from_str(r#"{"min":2,"max":8,"step":3}"#).unwrap();
        assert_eq!(span, ParamRange::Span { min: 2, max: 8, step: 3 });
    }

    // --- ForestConfig ---

    #[test]
    fn zero_trees_rejected() {
        assert!(matches!(
            ForestConfig::new(0).unwrap_err(),
            RfError::InvalidTreeCount { num_trees: 0 }
        ));
    }

    #[test]
    fn single_tree_disables_bootstrap() {
        let config = ForestConfig::new(1)
            .unwrap()
            .with_use_bootstrap(true)
            .with_bootstrap_ratio(0.5);
        assert!(!config.use_bootstrap());
        assert_eq!(config.bootstrap_ratio(), 1.0);
        assert_eq!(config.bag_strategy(), BagStrategy::Subsample { ratio: 1.0 });
        assert_eq!(config.features_per_node(9), 9);
    }

    #[test]
    fn features_per_node_is_rounded_sqrt() {
        let config = ForestConfig::new(10).unwrap();
        assert_eq!(config.features_per_node(10), 3);
        assert_eq!(config.features_per_node(7), 3);
        assert_eq!(config.features_per_node(1), 1);
    }

    #[test]
    fn validate_catches_bad_values() {
        let base = ForestConfig::new(5).unwrap();
        assert!(base.clone().validate().is_ok());
        assert!(base.clone().with_bootstrap_ratio(0.0).validate().is_err());
        assert!(
            base.clone()
                .with_strategy(EvalStrategy::KFold)
                .with_k_folds(1)
                .validate()
                .is_err()
        );
        assert!(matches!(
            base.clone()
                .with_min_split(Some(ParamRange::Fixed(1)))
                .validate()
                .unwrap_err(),
            RfError::ParamTooSmall { name: "min_split", .. }
        ));
        assert!(base.with_impurity_threshold(-0.1).validate().is_err());
    }

    // --- ParamGrid ---

    #[test]
    fn small_dataset_auto_grid() {
        let config = ForestConfig::new(10).unwrap();
        let grid = ParamGrid::resolve(&config, &profile(300, 8, vec![100, 100, 100]));
        assert_eq!(grid.min_split, vec![2, 3, 4, 5, 6]);
        // log2(300) + log2(8) = 11.2 -> base 12 -> 12 > 8 -> min 10
        assert_eq!(grid.max_depth, vec![10, 11, 12]);
        assert!(!grid.min_leaf.is_empty());
        assert!(grid.min_leaf.iter().all(|&l| (1..=5).contains(&l)));
    }

    #[test]
    fn large_dataset_coarser_steps() {
        let config = ForestConfig::new(10).unwrap();
        let grid = ParamGrid::resolve(&config, &profile(20_000, 10, vec![10_000, 10_000]));
        assert_eq!(grid.min_split, vec![2, 4, 6]);
        // log2(20000) + log2(10) = 17.6 -> base 18 -> min 14, step 2
        assert_eq!(grid.max_depth, vec![14, 16, 18]);
    }

    #[test]
    fn split_window_is_four_wide_at_every_size() {
        let config = ForestConfig::new(10).unwrap();
        let grid = ParamGrid::resolve(&config, &profile(200_000, 10, vec![100_000, 100_000]));
        // Step 3 over 2..=6 still ends on the upper bound.
        assert_eq!(grid.min_split, vec![2, 5, 6]);
    }

    #[test]
    fn pinned_leaf_forces_unit_split_step() {
        let config = ForestConfig::new(10)
            .unwrap()
            .with_min_leaf(Some(ParamRange::Fixed(2)));
        let grid = ParamGrid::resolve(&config, &profile(20_000, 10, vec![10_000, 10_000]));
        assert_eq!(grid.min_split, vec![2, 3, 4, 5, 6]);
        assert_eq!(grid.min_leaf, vec![2]);
    }

    #[test]
    fn fixed_overrides_collapse() {
        let config = ForestConfig::new(10)
            .unwrap()
            .with_min_split(Some(ParamRange::Fixed(4)))
            .with_min_leaf(Some(ParamRange::Fixed(2)))
            .with_max_depth(Some(ParamRange::Fixed(6)));
        let grid = ParamGrid::resolve(&config, &profile(100, 4, vec![50, 50]));
        assert_eq!(grid.len(), 1);
        assert_eq!(grid.combinations().collect::<Vec<_>>(), vec![(4, 2, 6)]);
    }

    #[test]
    fn combinations_nest_split_leaf_depth() {
        let grid = ParamGrid {
            min_split: vec![2, 3],
            min_leaf: vec![1],
            max_depth: vec![5, 6],
        };
        let combos: Vec<_> = grid.combinations().collect();
        assert_eq!(combos, vec![(2, 1, 5), (2, 1, 6), (3, 1, 5), (3, 1, 6)]);
        assert_eq!(grid.midpoint(), (3, 1, 6));
    }

    #[test]
    fn imbalance_narrows_leaf_ratio() {
        let balanced = auto_leaf_bounds(&profile(1200, 4, vec![600, 600]), 2, 6);
        let skewed = auto_leaf_bounds(&profile(1200, 4, vec![1150, 50]), 2, 6);
        assert!(skewed.0 <= balanced.0);
        assert!(balanced.1 <= 5 && skewed.1 <= 5);
    }

    // --- TrainingParams ---

    #[test]
    fn training_params_carry_grid_values() {
        let config = ForestConfig::new(8).unwrap().with_max_nodes(500);
        let params = TrainingParams::from_config(&config, 16, 3, 2, 7);
        let tree = params.tree_params();
        assert_eq!(tree.min_split, 3);
        assert_eq!(tree.min_leaf, 2);
        assert_eq!(tree.max_depth, 7);
        assert_eq!(tree.max_nodes, 500);
        assert_eq!(tree.max_features, Some(4));
    }
}
