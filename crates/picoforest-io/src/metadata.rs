//! Upstream dataset metadata (`<model>_dp.csv`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use picoforest_rf::QuantBits;
use tracing::{debug, instrument, warn};

use crate::IoError;
use crate::domain::ModelName;

/// Key carrying the upstream quantization bit width.
pub const QUANTIZATION_KEY: &str = "quantization_coefficient";

/// `key,value` pairs written by the quantization pipeline.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetMetadata {
    entries: BTreeMap<String, String>,
}

impl DatasetMetadata {
    /// Conventional metadata path next to the data file.
    #[must_use]
    pub fn path_for(data_path: &Path, model: &ModelName) -> PathBuf {
        let dir = data_path.parent().unwrap_or_else(|| Path::new(""));
        dir.join(format!("{}_dp.csv", model.as_str()))
    }

    /// Read every `key,value` line. A `parameter,value` header and lines
    /// without two fields are ignored.
    ///
    /// # Errors
    ///
    /// | Variant | Condition |
    /// |---|---|
    /// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
    /// | [`IoError::CsvParse`] | Underlying read failure |
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn read(path: &Path) -> Result<Self, IoError> {
        let file = std::fs::File::open(path).map_err(|e| IoError::FileNotFound {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut entries = BTreeMap::new();
        for result in rdr.records() {
            let record = result.map_err(|e| IoError::CsvParse {
                path: path.to_path_buf(),
                offset: e.position().map_or(0, |p| p.byte()),
                source: e,
            })?;
            let (Some(key), Some(value)) = (record.get(0), record.get(1)) else {
                continue;
            };
            if key.is_empty() || key == "parameter" {
                continue;
            }
            entries.insert(key.to_string(), value.to_string());
        }
        debug!(n_entries = entries.len(), "metadata read");
        Ok(Self { entries })
    }

    /// Raw value of `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Upstream bit width, clamped to `1..=8`. `None` if absent or not an integer.
    #[must_use]
    pub fn quant_bits(&self) -> Option<QuantBits> {
        self.get(QUANTIZATION_KEY)?
            .parse::<i64>()
            .ok()
            .map(QuantBits::sanitized)
    }
}

/// Bit width from the metadata file at `path`, or `fallback` with a warning.
#[must_use]
pub fn resolve_quant_bits(path: &Path, fallback: QuantBits) -> QuantBits {
    match DatasetMetadata::read(path) {
        Ok(meta) => match meta.quant_bits() {
            Some(bits) => {
                debug!(bits = bits.bits(), "quantization bits from metadata");
                bits
            }
            None => {
                warn!(
                    path = %path.display(),
                    fallback = fallback.bits(),
                    "metadata has no usable {QUANTIZATION_KEY}, using configured bits"
                );
                fallback
            }
        },
        Err(e) => {
            warn!(
                path = %path.display(),
                error = %e,
                fallback = fallback.bits(),
                "metadata unavailable, using configured bits"
            );
            fallback
        }
    }
}
