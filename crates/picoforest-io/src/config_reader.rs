//! JSON configuration document.
//!
//! Every key is optional. Values may be written plainly (`"num_trees": 20`)
//! or wrapped the way the upstream tooling writes them
//! (`"num_trees": {"value": 20}`). Searched hyperparameters also accept a
//! `{min, max, step}` range, or a `{"status": ..., "value": ...}` toggle
//! where only `enabled`, `overwrite` and `stacked` pin the value.

use std::path::{Path, PathBuf};

use picoforest_rf::{
    DatasetProfile, EvalStrategy, ForestConfig, MetricFlags, ParamRange, QuantBits,
    SplitCriterion, SplitRatios,
};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::IoError;

/// Fold count used when the document asks for fewer than two.
pub const DEFAULT_K_FOLDS: usize = 4;

/// A value written plainly or wrapped in `{"value": ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Setting<T> {
    /// `"key": value`
    Plain(T),
    /// `"key": {"value": value, ...}`
    Wrapped {
        /// The wrapped value.
        value: T,
    },
}

impl<T: Clone> Setting<T> {
    fn get(&self) -> T {
        match self {
            Self::Plain(v) | Self::Wrapped { value: v } => v.clone(),
        }
    }
}

/// A searched hyperparameter as written in the document.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RangeSetting {
    /// A fixed value or a `{min, max, step}` span.
    Range(ParamRange),
    /// `{"status": "enabled", "value": 3}`; other statuses leave it automatic.
    Toggle {
        /// `enabled`, `overwrite`, `stacked` or anything else for automatic.
        status: String,
        /// Value pinned when the status enables it.
        value: Option<u16>,
    },
}

impl RangeSetting {
    fn resolve(&self) -> Option<ParamRange> {
        match self {
            Self::Range(range) => Some(*range),
            Self::Toggle { status, value } => {
                let enabled = matches!(status.as_str(), "enabled" | "overwrite" | "stacked");
                value.filter(|_| enabled).map(ParamRange::Fixed)
            }
        }
    }
}

/// Nested `split_ratio` block.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct SplitRatioBlock {
    /// Training share.
    pub train_ratio: f64,
    /// Test share.
    pub test_ratio: f64,
    /// Validation share.
    #[serde(default)]
    pub valid_ratio: f64,
}

/// The training configuration document as written on disk.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ConfigDocument {
    /// Trees per forest.
    #[serde(default, alias = "numTrees")]
    pub num_trees: Option<Setting<usize>>,
    /// Base seed.
    #[serde(default, alias = "randomSeed")]
    pub random_seed: Option<Setting<u64>>,
    /// Bits per feature value, clamped to 1..=8.
    #[serde(default)]
    pub quantization_coefficient: Option<Setting<i64>>,
    /// `min_split` override or range.
    #[serde(default, alias = "minSplit")]
    pub min_split: Option<RangeSetting>,
    /// `min_leaf` override or range.
    #[serde(default, alias = "minLeaf")]
    pub min_leaf: Option<RangeSetting>,
    /// `max_depth` override or range.
    #[serde(default, alias = "maxDepth")]
    pub max_depth: Option<RangeSetting>,
    /// Per-tree node budget.
    #[serde(default, alias = "maxNodes")]
    pub max_nodes: Option<Setting<usize>>,
    /// Bootstrap (with replacement) or subsample bags.
    #[serde(default, alias = "useBootstrap")]
    pub use_bootstrap: Option<Setting<bool>>,
    /// Subsample fraction.
    #[serde(default, alias = "boostrapRatio", alias = "bootstrapRatio")]
    pub bootstrap_ratio: Option<Setting<f64>>,
    /// `gini` or `entropy`.
    #[serde(default)]
    pub criterion: Option<Setting<SplitCriterion>>,
    /// Minimum split gain before size scaling.
    #[serde(default, alias = "impurityThreshold")]
    pub impurity_threshold: Option<Setting<f64>>,
    /// Training share, overridden by `split_ratio`.
    #[serde(default)]
    pub train_ratio: Option<Setting<f64>>,
    /// Test share, overridden by `split_ratio`.
    #[serde(default)]
    pub test_ratio: Option<Setting<f64>>,
    /// Validation share, overridden by `split_ratio`.
    #[serde(default)]
    pub valid_ratio: Option<Setting<f64>>,
    /// All three shares at once.
    #[serde(default)]
    pub split_ratio: Option<SplitRatioBlock>,
    /// `oob`, `valid` or `k_fold`.
    #[serde(default, alias = "trainingScore")]
    pub training_score: Option<Setting<EvalStrategy>>,
    /// Folds for `k_fold`.
    #[serde(default)]
    pub k_folds: Option<Setting<usize>>,
    /// Objective, e.g. `"PRECISION | RECALL"`. Derived from the data when absent.
    #[serde(default)]
    pub metric_score: Option<Setting<MetricFlags>>,
    /// Row limit for the dataset; 0 means unlimited.
    #[serde(default)]
    pub max_samples: Option<Setting<usize>>,
    /// Data file, overridden by the command line.
    #[serde(default)]
    pub data_path: Option<Setting<PathBuf>>,
    /// Whether the deployed model may retrain on device. Carried through only.
    #[serde(default, alias = "enableRetrain")]
    pub enable_retrain: Option<Setting<bool>>,
}

impl ConfigDocument {
    /// Read and parse a document from `path`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
    /// | [`IoError::ConfigParse`] | Not valid JSON for this document |
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn from_path(path: &Path) -> Result<Self, IoError> {
        let text = std::fs::read_to_string(path).map_err(|e| IoError::FileNotFound {
            path: path.to_path_buf(),
            source: e,
        })?;
        let doc: Self = serde_json::from_str(&text).map_err(|e| IoError::ConfigParse {
            path: path.to_path_buf(),
            source: e,
        })?;
        debug!("configuration document parsed");
        Ok(doc)
    }

    /// Configured bit width, or the default when absent.
    #[must_use]
    pub fn quant_bits(&self) -> QuantBits {
        self.quantization_coefficient
            .as_ref()
            .map_or_else(QuantBits::default, |s| QuantBits::sanitized(s.get()))
    }

    /// Row limit; `None` when absent or zero.
    #[must_use]
    pub fn max_samples(&self) -> Option<usize> {
        self.max_samples.as_ref().map(Setting::get).filter(|&n| n > 0)
    }

    /// Data file named by the document.
    #[must_use]
    pub fn data_path(&self) -> Option<PathBuf> {
        self.data_path.as_ref().map(Setting::get)
    }

    /// On-device retraining flag, `false` when absent.
    #[must_use]
    pub fn enable_retrain(&self) -> bool {
        self.enable_retrain.as_ref().is_some_and(Setting::get)
    }

    /// Build the training configuration for a dataset with `profile`.
    ///
    /// `quant_bits` is the width the dataset was loaded with. A fold count
    /// below two is replaced by [`DEFAULT_K_FOLDS`]; a missing objective is
    /// chosen by [`auto_metric`].
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::Forest`] | A value is rejected by [`ForestConfig`] |
    pub fn forest_config(
        &self,
        quant_bits: QuantBits,
        profile: &DatasetProfile,
    ) -> Result<ForestConfig, IoError> {
        let num_trees = self.num_trees.as_ref().map_or(20, Setting::get);
        let mut config = ForestConfig::new(num_trees)?.with_quant_bits(quant_bits);

        if let Some(seed) = &self.random_seed {
            config = config.with_seed(seed.get());
        }
        config = config
            .with_min_split(self.min_split.as_ref().and_then(RangeSetting::resolve))
            .with_min_leaf(self.min_leaf.as_ref().and_then(RangeSetting::resolve))
            .with_max_depth(self.max_depth.as_ref().and_then(RangeSetting::resolve));
        if let Some(max_nodes) = &self.max_nodes {
            config = config.with_max_nodes(max_nodes.get());
        }
        if let Some(use_bootstrap) = &self.use_bootstrap {
            config = config.with_use_bootstrap(use_bootstrap.get());
        }
        if let Some(ratio) = &self.bootstrap_ratio {
            config = config.with_bootstrap_ratio(ratio.get());
        }
        if let Some(criterion) = &self.criterion {
            config = config.with_criterion(criterion.get());
        }
        if let Some(threshold) = &self.impurity_threshold {
            config = config.with_impurity_threshold(threshold.get());
        }
        if let Some(ratios) = self.split_ratios()? {
            config = config.with_split_ratios(ratios);
        }
        if let Some(strategy) = &self.training_score {
            config = config.with_strategy(strategy.get());
        }
        if let Some(k) = &self.k_folds {
            let k = k.get();
            if k < 2 {
                warn!(k_folds = k, default = DEFAULT_K_FOLDS, "k_folds below 2, using default");
                config = config.with_k_folds(DEFAULT_K_FOLDS);
            } else {
                config = config.with_k_folds(k);
            }
        }
        let metric = match &self.metric_score {
            Some(metric) => metric.get(),
            None => {
                let metric = auto_metric(profile);
                info!(
                    imbalance_ratio = profile.imbalance_ratio(),
                    metric = %metric,
                    "objective chosen from label balance"
                );
                metric
            }
        };
        config = config.with_metric(metric);

        config.validate()?;
        Ok(config)
    }

    fn split_ratios(&self) -> Result<Option<SplitRatios>, IoError> {
        let defaults = SplitRatios::default();
        let (train, test, valid) = match self.split_ratio {
            Some(block) => (block.train_ratio, block.test_ratio, block.valid_ratio),
            None if self.train_ratio.is_none()
                && self.test_ratio.is_none()
                && self.valid_ratio.is_none() =>
            {
                return Ok(None);
            }
            None => (
                self.train_ratio.as_ref().map_or(defaults.train(), Setting::get),
                self.test_ratio.as_ref().map_or(defaults.test(), Setting::get),
                self.valid_ratio.as_ref().map_or(defaults.valid(), Setting::get),
            ),
        };
        Ok(Some(SplitRatios::new(train, test, valid)?))
    }
}

/// Objective for a dataset whose majority/minority ratio is `profile.imbalance_ratio()`.
///
/// | Ratio       | Objective   |
/// |-------------|-------------|
/// | above 10    | `RECALL`    |
/// | above 3     | `F1_SCORE`  |
/// | above 1.5   | `PRECISION` |
/// | otherwise   | `ACCURACY`  |
#[must_use]
pub fn auto_metric(profile: &DatasetProfile) -> MetricFlags {
    let ratio = profile.imbalance_ratio();
    if ratio > 10.0 {
        MetricFlags::RECALL
    } else if ratio > 3.0 {
        MetricFlags::F1_SCORE
    } else if ratio > 1.5 {
        MetricFlags::PRECISION
    } else {
        MetricFlags::ACCURACY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(label_counts: Vec<usize>) -> DatasetProfile {
        DatasetProfile {
            n_samples: label_counts.iter().sum(),
            n_features: 4,
            label_counts,
        }
    }

    fn parse(json: &str) -> ConfigDocument {
        serde_json::from_str(json).unwrap()
    }

    fn bits(n: u8) -> QuantBits {
        QuantBits::new(n).unwrap()
    }

    // --- Parsing ---

    #[test]
    fn empty_document_uses_defaults() {
        let config = parse("{}").forest_config(bits(2), &profile(vec![50, 50])).unwrap();
        assert_eq!(config.num_trees(), 20);
        assert_eq!(config.strategy(), EvalStrategy::OutOfBag);
        assert_eq!(config.metric(), MetricFlags::ACCURACY);
        assert_eq!(config.min_split(), None);
        assert_eq!(config.quant_bits(), bits(2));
    }

    #[test]
    fn plain_and_wrapped_values() {
        let doc = parse(
            r#"{
                "num_trees": {"value": 12, "description": "trees"},
                "random_seed": 7,
                "criterion": {"value": "entropy"},
                "training_score": "k_fold",
                "k_folds": {"value": 5},
                "metric_score": "PRECISION | RECALL",
                "use_bootstrap": false,
                "bootstrap_ratio": 0.8
            }"#,
        );
        let config = doc.forest_config(bits(3), &profile(vec![10, 10])).unwrap();
        assert_eq!(config.num_trees(), 12);
        assert_eq!(config.seed(), 7);
        assert_eq!(config.criterion(), SplitCriterion::Entropy);
        assert_eq!(config.strategy(), EvalStrategy::KFold);
        assert_eq!(config.k_folds(), 5);
        assert_eq!(config.metric(), MetricFlags::PRECISION | MetricFlags::RECALL);
        assert!(!config.use_bootstrap());
        assert!((config.bootstrap_ratio() - 0.8).abs() < 1e-12);
    }

    #[test]
    fn camel_case_aliases() {
        let doc = parse(r#"{"numTrees": 3, "randomSeed": 9, "minSplit": 4, "boostrapRatio": 0.5}"#);
        let config = doc.forest_config(bits(2), &profile(vec![5, 5])).unwrap();
        assert_eq!(config.num_trees(), 3);
        assert_eq!(config.seed(), 9);
        assert_eq!(config.min_split(), Some(ParamRange::Fixed(4)));
        assert!((config.bootstrap_ratio() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn range_forms() {
        let doc = parse(
            r#"{
                "min_split": {"min": 2, "max": 8, "step": 3},
                "min_leaf": {"status": "enabled", "value": 2},
                "max_depth": {"status": "disabled", "value": 9}
            }"#,
        );
        let config = doc.forest_config(bits(2), &profile(vec![5, 5])).unwrap();
        assert_eq!(
            config.min_split(),
            Some(ParamRange::Span { min: 2, max: 8, step: 3 })
        );
        assert_eq!(config.min_leaf(), Some(ParamRange::Fixed(2)));
        assert_eq!(config.max_depth(), None);
    }

    #[test]
    fn split_ratio_block_wins() {
        let doc = parse(
            r#"{"train_ratio": 0.5, "split_ratio": {"train_ratio": 0.6, "test_ratio": 0.2, "valid_ratio": 0.2}}"#,
        );
        let config = doc.forest_config(bits(2), &profile(vec![5, 5])).unwrap();
        assert!((config.split_ratios().train() - 0.6).abs() < 1e-9);
        assert!((config.split_ratios().valid() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn document_level_values() {
        let doc = parse(
            r#"{"quantization_coefficient": 11, "max_samples": 0, "data_path": "d_nml.csv", "enableRetrain": true}"#,
        );
        assert_eq!(doc.quant_bits(), bits(8));
        assert_eq!(doc.max_samples(), None);
        assert_eq!(doc.data_path(), Some(PathBuf::from("d_nml.csv")));
        assert!(doc.enable_retrain());
        assert_eq!(parse(r#"{"max_samples": 500}"#).max_samples(), Some(500));
    }

    // --- Corrections and errors ---

    #[test]
    fn small_fold_count_replaced() {
        let doc = parse(r#"{"training_score": "k_fold", "k_folds": 1}"#);
        let config = doc.forest_config(bits(2), &profile(vec![5, 5])).unwrap();
        assert_eq!(config.k_folds(), DEFAULT_K_FOLDS);
    }

    #[test]
    fn unknown_metric_rejected() {
        let err = serde_json::from_str::<ConfigDocument>(r#"{"metric_score": "AUC"}"#).unwrap_err();
        assert!(err.to_string().contains("AUC") || err.is_data());
    }

    #[test]
    fn invalid_bootstrap_ratio_rejected() {
        let doc = parse(r#"{"bootstrap_ratio": 1.5}"#);
        let err = doc.forest_config(bits(2), &profile(vec![5, 5])).unwrap_err();
        assert!(matches!(err, IoError::Forest(picoforest_rf::RfError::InvalidBootstrapRatio { .. })));
    }

    #[test]
    fn zero_trees_rejected() {
        let err = parse(r#"{"num_trees": 0}"#)
            .forest_config(bits(2), &profile(vec![5, 5]))
            .unwrap_err();
        assert!(matches!(err, IoError::Forest(picoforest_rf::RfError::InvalidTreeCount { .. })));
    }

    #[test]
    fn from_path_reports_parse_errors() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ConfigDocument::from_path(&path),
            Err(IoError::ConfigParse { .. })
        ));
    }

    // --- Automatic metric ---

    #[test]
    fn metric_follows_imbalance() {
        assert_eq!(auto_metric(&profile(vec![100, 100])), MetricFlags::ACCURACY);
        assert_eq!(auto_metric(&profile(vec![160, 100])), MetricFlags::PRECISION);
        assert_eq!(auto_metric(&profile(vec![400, 100])), MetricFlags::F1_SCORE);
        assert_eq!(auto_metric(&profile(vec![1100, 100])), MetricFlags::RECALL);
        // Empty label slots do not count as a minority.
        assert_eq!(auto_metric(&profile(vec![100, 0, 100])), MetricFlags::ACCURACY);
    }

    #[test]
    fn explicit_metric_not_overridden() {
        let doc = parse(r#"{"metric_score": "ACCURACY"}"#);
        let config = doc.forest_config(bits(2), &profile(vec![1000, 10])).unwrap();
        assert_eq!(config.metric(), MetricFlags::ACCURACY);
    }
}
