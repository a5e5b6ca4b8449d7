//! Domain types for picoforest-io.

use std::fmt;
use std::path::Path;

use picoforest_rf::Dataset;

use crate::IoError;

/// A validated model name for output file naming.
///
/// Must match `[a-zA-Z0-9_-]+`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelName(String);

impl ModelName {
    /// Parse and validate a model name.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidModelName`] if the name is empty or
    /// contains characters outside `[a-zA-Z0-9_-]`.
    pub fn new(name: String) -> Result<Self, IoError> {
        if name.is_empty()
            || !name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(IoError::InvalidModelName { name });
        }
        Ok(Self(name))
    }

    /// Derive the model name from a normalized data file.
    ///
    /// `digit_data_nml.csv` yields `digit_data`. A stem without `_nml` is
    /// used whole.
    ///
    /// # Errors
    ///
    /// Returns [`IoError::InvalidModelName`] if the derived name is invalid.
    pub fn from_data_path(path: &Path) -> Result<Self, IoError> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match stem.find("_nml") {
            Some(end) => stem[..end].to_string(),
            None => stem,
        };
        Self::new(name)
    }

    /// Return the model name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ModelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A dataset read from CSV together with what the reader had to reject.
#[derive(Debug)]
pub struct LoadedDataset {
    /// Valid samples in file order.
    pub dataset: Dataset,
    /// Rows skipped as malformed, short or out of range.
    pub skipped_rows: usize,
    /// `true` when the bit width had to be raised to fit the data.
    pub bits_raised: bool,
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    #[test]
    fn model_name_valid() {
        let name = ModelName::new("digit_data-01".to_string());
        assert!(name.is_ok());
        assert_eq!(name.unwrap().as_str(), "digit_data-01");
    }

    #[test]
    fn model_name_rejects_empty() {
        let name = ModelName::new(String::new());
        assert!(matches!(name, Err(IoError::InvalidModelName { .. })));
    }

    #[test]
    fn model_name_rejects_special_chars() {
        let name = ModelName::new("my model!".to_string());
        assert!(matches!(name, Err(IoError::InvalidModelName { .. })));
    }

    #[test]
    fn model_name_from_normalized_file() {
        let name = ModelName::from_data_path(&PathBuf::from("/data/digit_data_nml.csv")).unwrap();
        assert_eq!(name.as_str(), "digit_data");
    }

    #[test]
    fn model_name_without_suffix_uses_stem() {
        let name = ModelName::from_data_path(&PathBuf::from("iris.csv")).unwrap();
        assert_eq!(name.as_str(), "iris");
    }
}
