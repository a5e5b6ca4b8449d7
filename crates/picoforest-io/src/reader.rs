//! Normalized dataset reader.

use std::path::{Path, PathBuf};

use picoforest_rf::{Dataset, QuantBits, Sample};
use tracing::{debug, info, instrument, warn};

use crate::IoError;
use crate::domain::LoadedDataset;

/// Reads a normalized, quantized dataset from CSV.
///
/// Expected format:
/// - No header row
/// - `label,f0,f1,...,fn`, every value an unsigned integer below 256
/// - Blank lines are ignored
///
/// The first usable row fixes the feature count. Rows that fail to parse
/// or have a different number of columns are skipped and counted, never
/// fatal. When the data holds values above the configured bit width, the
/// width is raised to the smallest one that fits.
///
/// # Errors
///
/// | Variant | Condition |
/// |---|---|
/// | [`IoError::FileNotFound`] | File doesn't exist or is unreadable |
/// | [`IoError::CsvParse`] | Underlying read failure |
/// | [`IoError::EmptyDataset`] | No usable row |
pub struct DatasetReader {
    path: PathBuf,
    quant_bits: QuantBits,
    max_samples: Option<usize>,
}

impl DatasetReader {
    /// Create a new reader for the given CSV file path.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            quant_bits: QuantBits::default(),
            max_samples: None,
        }
    }

    /// Set the expected bit width of the feature values.
    #[must_use]
    pub fn with_quant_bits(mut self, quant_bits: QuantBits) -> Self {
        self.quant_bits = quant_bits;
        self
    }

    /// Stop after this many valid rows. `None` or `Some(0)` reads everything.
    #[must_use]
    pub fn with_max_samples(mut self, max_samples: Option<usize>) -> Self {
        self.max_samples = max_samples.filter(|&n| n > 0);
        self
    }

    /// Read the CSV file, returning the valid samples.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub fn read(&self) -> Result<LoadedDataset, IoError> {
        let file = std::fs::File::open(&self.path).map_err(|e| IoError::FileNotFound {
            path: self.path.clone(),
            source: e,
        })?;

        // flexible(true) so short rows reach the per-row check instead of failing the read.
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(file);

        let mut samples: Vec<Sample> = Vec::new();
        let mut n_features: Option<usize> = None;
        let mut skipped = 0usize;
        let mut highest = 0u8;

        for (row_index, result) in rdr.records().enumerate() {
            if self.max_samples.is_some_and(|max| samples.len() >= max) {
                debug!(max_samples = samples.len(), "sample limit reached");
                break;
            }
            let record = match result {
                Ok(record) => record,
                Err(e) if e.is_io_error() => {
                    return Err(IoError::CsvParse {
                        path: self.path.clone(),
                        offset: e.position().map_or(0, |p| p.byte()),
                        source: e,
                    });
                }
                Err(e) => {
                    debug!(row_index, error = %e, "unreadable row");
                    skipped += 1;
                    continue;
                }
            };
            if record.iter().all(str::is_empty) {
                continue;
            }

            let values: Option<Vec<u8>> = record.iter().map(|raw| raw.parse::<u8>().ok()).collect();
            let Some(values) = values else {
                debug!(row_index, "row has a non-integer or out-of-range value");
                skipped += 1;
                continue;
            };
            let Some((&label, features)) = values.split_first() else {
                skipped += 1;
                continue;
            };
            if features.is_empty() {
                debug!(row_index, "row has no features");
                skipped += 1;
                continue;
            }
            let expected = *n_features.get_or_insert(features.len());
            if features.len() != expected {
                debug!(row_index, expected, got = features.len(), "row length mismatch");
                skipped += 1;
                continue;
            }

            highest = features.iter().copied().fold(highest, u8::max);
            samples.push(Sample::new(label, features.to_vec()));
        }

        if skipped > 0 {
            warn!(skipped, "malformed rows skipped");
        }
        if samples.is_empty() {
            return Err(IoError::EmptyDataset {
                path: self.path.clone(),
                skipped,
            });
        }

        let required = QuantBits::required_for(highest);
        let bits_raised = required > self.quant_bits;
        let quant_bits = if bits_raised {
            info!(
                configured = self.quant_bits.bits(),
                required = required.bits(),
                max_value = highest,
                "quantization bits raised to fit the data"
            );
            required
        } else {
            self.quant_bits
        };

        let dataset = Dataset::new(samples, quant_bits)?;
        let profile = dataset.profile();
        info!(
            n_samples = profile.n_samples,
            n_features = profile.n_features,
            n_labels = profile.n_present_labels(),
            quant_bits = quant_bits.bits(),
            lowest_share_pct = profile.lowest_share_pct(),
            "dataset loaded"
        );
        debug!(label_counts = ?profile.label_counts, "label distribution");

        Ok(LoadedDataset {
            dataset,
            skipped_rows: skipped,
            bits_raised,
        })
    }
}
