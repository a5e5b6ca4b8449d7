//! File I/O for the picoforest pipeline: datasets, metadata, configuration
//! documents and model artifacts.

mod config_reader;
mod domain;
mod error;
mod metadata;
mod reader;
mod writer;

pub use config_reader::{
    ConfigDocument, DEFAULT_K_FOLDS, RangeSetting, Setting, SplitRatioBlock, auto_metric,
};
pub use domain::{LoadedDataset, ModelName};
pub use error::IoError;
pub use metadata::{DatasetMetadata, QUANTIZATION_KEY, resolve_quant_bits};
pub use reader::DatasetReader;
pub use writer::{ModelExtras, NodeLog, ResultWriter};
