//! I/O error types for picoforest-io.

use std::path::PathBuf;

use picoforest_rf::RfError;

/// Errors from dataset loading, configuration parsing and artifact writing.
#[derive(Debug, thiserror::Error)]
pub enum IoError {
    /// Returned when an input file does not exist or is unreadable.
    #[error("file not found: {path}")]
    FileNotFound {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when the CSV reader fails below the record level.
    #[error("CSV error in {path} at byte offset {offset}")]
    CsvParse {
        /// Path to the CSV file.
        path: PathBuf,
        /// Byte offset where the error occurred.
        offset: u64,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when no row of the dataset file could be used.
    #[error("empty dataset (no valid rows) in {path}, {skipped} rows skipped")]
    EmptyDataset {
        /// Path to the CSV file.
        path: PathBuf,
        /// Rows rejected as malformed.
        skipped: usize,
    },

    /// Returned when the configuration document is not valid JSON for the expected shape.
    #[error("invalid configuration document {path}")]
    ConfigParse {
        /// Path to the JSON file.
        path: PathBuf,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Returned when the model name contains characters outside `[a-zA-Z0-9_-]`.
    #[error("invalid model name \"{name}\": must match [a-zA-Z0-9_-]+")]
    InvalidModelName {
        /// The invalid name.
        name: String,
    },

    /// Returned when the output directory cannot be created.
    #[error("cannot create output directory {path}")]
    OutputDirCreate {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a result file cannot be written.
    #[error("cannot write file {path}")]
    WriteFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Returned when a CSV artifact cannot be written.
    #[error("cannot write CSV {path}")]
    CsvWrite {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying CSV error.
        source: csv::Error,
    },

    /// Returned when an artifact cannot be serialized to JSON.
    #[error("cannot serialize {artifact}")]
    Serialize {
        /// Artifact name.
        artifact: &'static str,
        /// Underlying JSON error.
        source: serde_json::Error,
    },

    /// Returned when training, evaluation or encoding fails.
    #[error(transparent)]
    Forest(#[from] RfError),
}
