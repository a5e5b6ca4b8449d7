//! Model artifact writer: compact forest, configuration and node log.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use picoforest_rf::{
    CandidateRecord, CandidateSink, CompactForest, Forest, ForestConfig, TrainingOutcome,
    write_compact,
};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::IoError;
use crate::domain::ModelName;

/// Values carried into the configuration artifact that training does not produce.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelExtras {
    /// Row limit the dataset was loaded with.
    pub max_samples: Option<usize>,
    /// On-device retraining flag.
    pub enable_retrain: bool,
    /// Objective score on the held-out test partition, if it was scored.
    pub test_score: Option<f64>,
}

/// Writes the deployable model artifacts.
///
/// Creates the output directory on construction if it does not exist.
/// Output files are named `{model}_forest.bin`, `{model}_config.json` and
/// `{model}_node_log.csv`.
pub struct ResultWriter {
    output_dir: PathBuf,
    model: ModelName,
}

impl ResultWriter {
    /// Create a new writer targeting the given directory and model name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::OutputDirCreate`] if the directory cannot be created.
    #[instrument(skip_all, fields(dir = %output_dir.display(), model = %model))]
    pub fn new(output_dir: &Path, model: ModelName) -> Result<Self, IoError> {
        fs::create_dir_all(output_dir).map_err(|e| IoError::OutputDirCreate {
            path: output_dir.to_path_buf(),
            source: e,
        })?;
        debug!("output directory ready");
        Ok(Self {
            output_dir: output_dir.to_path_buf(),
            model,
        })
    }

    fn artifact_path(&self, suffix: &str) -> PathBuf {
        self.output_dir
            .join(format!("{}_{suffix}", self.model.as_str()))
    }

    /// Path of the compact forest file.
    #[must_use]
    pub fn forest_path(&self) -> PathBuf {
        self.artifact_path("forest.bin")
    }

    /// Path of the configuration artifact.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.artifact_path("config.json")
    }

    /// Path of the per-candidate node log.
    #[must_use]
    pub fn node_log_path(&self) -> PathBuf {
        self.artifact_path("node_log.csv")
    }

    fn staged_forest_path(&self) -> PathBuf {
        self.artifact_path("forest.bin.part")
    }

    /// Encode `forest` into `{model}_forest.bin`.
    ///
    /// On failure no forest file is left behind.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::Forest`] if encoding or writing fails.
    #[instrument(skip_all)]
    pub fn write_forest(&self, forest: &Forest) -> Result<CompactForest, IoError> {
        let path = self.forest_path();
        let compact = write_compact(forest, &path)?;
        info!(path = %path.display(), resident_bytes = compact.resident_bytes(), "forest written");
        Ok(compact)
    }

    /// Write the finalized hyperparameters to `{model}_config.json`.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::Serialize`] | JSON encoding failed |
    /// | [`IoError::WriteFile`] | File write failed |
    #[instrument(skip_all)]
    pub fn write_config(
        &self,
        config: &ForestConfig,
        outcome: &TrainingOutcome,
        compact: &CompactForest,
        extras: ModelExtras,
    ) -> Result<(), IoError> {
        let path = self.config_path();
        let ratios = config.split_ratios();
        let widths = compact.widths();
        let artifact = ConfigArtifact {
            num_trees: outcome.params.num_trees,
            random_seed: outcome.params.seed,
            quantization_coefficient: config.quant_bits().bits(),
            train_ratio: ratios.train(),
            test_ratio: ratios.test(),
            valid_ratio: ratios.valid(),
            min_split: outcome.params.min_split,
            min_leaf: outcome.params.min_leaf,
            max_depth: outcome.params.max_depth,
            max_nodes: outcome.evaluation.stats.max_nodes,
            use_bootstrap: config.use_bootstrap(),
            bootstrap_ratio: config.bootstrap_ratio(),
            criterion: outcome.params.criterion.as_str(),
            training_score: config.strategy().as_str(),
            k_folds: config.k_folds(),
            impurity_threshold: outcome.params.impurity_threshold,
            metric_score: config.metric().to_string(),
            result_score: outcome.score(),
            test_score: extras.test_score,
            consensus_threshold: outcome.consensus_threshold,
            threshold_bits: widths.threshold,
            feature_bits: widths.feature,
            label_bits: widths.label,
            child_bits: widths.child,
            enable_retrain: extras.enable_retrain,
            max_samples: extras.max_samples.unwrap_or(0),
            resident_bytes: compact.resident_bytes(),
        };

        let json = serde_json::to_string_pretty(&artifact).map_err(|e| IoError::Serialize {
            artifact: "config",
            source: e,
        })?;
        fs::write(&path, &json).map_err(|e| IoError::WriteFile {
            path: path.clone(),
            source: e,
        })?;

        info!(path = %path.display(), "configuration written");
        Ok(())
    }

    /// Start `{model}_node_log.csv` and return a grid-search sink.
    ///
    /// The sink appends one row per candidate and stages the best forest
    /// so far; [`CandidateSink::finish`] promotes it to the forest path.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::CsvWrite`] if the log cannot be created.
    pub fn node_log(&self) -> Result<NodeLog<'_>, IoError> {
        let path = self.node_log_path();
        let mut csv = csv::Writer::from_path(&path).map_err(|e| IoError::CsvWrite {
            path: path.clone(),
            source: e,
        })?;
        csv.write_record(["min_split", "min_leaf", "max_depth", "max_nodes"])
            .map_err(|e| IoError::CsvWrite {
                path: path.clone(),
                source: e,
            })?;
        Ok(NodeLog {
            writer: self,
            path,
            csv,
            staged: false,
            rows: 0,
        })
    }
}

/// Grid-search sink writing the node log and staging the best forest.
pub struct NodeLog<'a> {
    writer: &'a ResultWriter,
    path: PathBuf,
    csv: csv::Writer<File>,
    staged: bool,
    rows: usize,
}

impl NodeLog<'_> {
    /// Rows written so far.
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    fn csv_error(&self, source: csv::Error) -> IoError {
        IoError::CsvWrite {
            path: self.path.clone(),
            source,
        }
    }
}

impl CandidateSink for NodeLog<'_> {
    type Error = IoError;

    fn record(
        &mut self,
        record: &CandidateRecord,
        forest: &Forest,
        improved: bool,
    ) -> Result<(), IoError> {
        let row = [
            record.min_split.to_string(),
            record.min_leaf.to_string(),
            record.max_depth.to_string(),
            record.max_nodes.to_string(),
        ];
        self.csv.write_record(&row).map_err(|e| self.csv_error(e))?;
        self.csv
            .flush()
            .map_err(|e| self.csv_error(csv::Error::from(e)))?;
        self.rows += 1;

        if improved {
            write_compact(forest, self.writer.staged_forest_path())?;
            self.staged = true;
            debug!(score = record.score, "best forest staged");
        }
        Ok(())
    }

    fn finish(&mut self, best: &CandidateRecord) -> Result<(), IoError> {
        self.csv
            .flush()
            .map_err(|e| self.csv_error(csv::Error::from(e)))?;
        if self.staged {
            let from = self.writer.staged_forest_path();
            let to = self.writer.forest_path();
            fs::rename(&from, &to).map_err(|e| IoError::WriteFile {
                path: to.clone(),
                source: e,
            })?;
            info!(
                path = %to.display(),
                min_split = best.min_split,
                min_leaf = best.min_leaf,
                max_depth = best.max_depth,
                "best forest promoted"
            );
        }
        info!(path = %self.path.display(), rows = self.rows, "node log written");
        Ok(())
    }
}

// --- Shadow struct for JSON serialization ---

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigArtifact {
    num_trees: usize,
    random_seed: u64,
    #[serde(rename = "quantization_coefficient")]
    quantization_coefficient: u8,
    #[serde(rename = "train_ratio")]
    train_ratio: f64,
    #[serde(rename = "test_ratio")]
    test_ratio: f64,
    #[serde(rename = "valid_ratio")]
    valid_ratio: f64,
    min_split: u16,
    min_leaf: u16,
    max_depth: u16,
    max_nodes: usize,
    use_bootstrap: bool,
    #[serde(rename = "boostrapRatio")]
    bootstrap_ratio: f64,
    criterion: &'static str,
    training_score: &'static str,
    #[serde(rename = "k_folds")]
    k_folds: usize,
    impurity_threshold: f64,
    #[serde(rename = "metric_score")]
    metric_score: String,
    result_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    test_score: Option<f64>,
    consensus_threshold: f64,
    #[serde(rename = "threshold_bits")]
    threshold_bits: u8,
    #[serde(rename = "feature_bits")]
    feature_bits: u8,
    #[serde(rename = "label_bits")]
    label_bits: u8,
    #[serde(rename = "child_bits")]
    child_bits: u8,
    enable_retrain: bool,
    #[serde(rename = "max_samples")]
    max_samples: usize,
    #[serde(rename = "Estimated RAM (bytes)")]
    resident_bytes: usize,
}
