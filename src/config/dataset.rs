//! Per-dataset source descriptors

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A constant key/value pair injected into every record of a dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstantField {
    pub key: String,
    pub value: String,
}

/// Configuration for a single source dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Dataset identifier, e.g. `org/corpus`
    pub name: String,

    pub text_column_name: String,

    pub audio_column_name: String,

    #[serde(default)]
    pub speaker_column_name: Option<String>,

    /// Constant fields added to every record
    #[serde(default)]
    pub add_constant: Option<Vec<ConstantField>>,

    #[serde(default = "default_split")]
    pub split: String,

    /// Dataset subset/configuration name
    #[serde(default)]
    pub sub_name: Option<String>,

    /// Explicit location of the split, overriding name-based resolution
    #[serde(default)]
    pub path: Option<PathBuf>,
}

fn default_split() -> String {
    "train".to_string()
}

impl DatasetConfig {
    /// Create a dataset config with the given column mapping
    pub fn new(
        name: impl Into<String>,
        text_column_name: impl Into<String>,
        audio_column_name: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            text_column_name: text_column_name.into(),
            audio_column_name: audio_column_name.into(),
            speaker_column_name: None,
            add_constant: None,
            split: default_split(),
            sub_name: None,
            path: None,
        }
    }

    /// Builder method to set the speaker column
    pub fn with_speaker_column(mut self, column: impl Into<String>) -> Self {
        self.speaker_column_name = Some(column.into());
        self
    }

    /// Builder method to add a constant field
    pub fn with_constant(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.add_constant
            .get_or_insert_with(Vec::new)
            .push(ConstantField {
                key: key.into(),
                value: value.into(),
            });
        self
    }

    /// Builder method to set an explicit source path
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Output namespace: the last path segment of the name
    pub fn dataset_prefix(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Constant fields as a map
    pub fn constant_columns(&self) -> BTreeMap<String, String> {
        self.add_constant
            .iter()
            .flatten()
            .map(|c| (c.key.clone(), c.value.clone()))
            .collect()
    }

    /// Human-readable description for log lines, e.g. `org/corpus (clean) [train]`
    pub fn describe(&self) -> String {
        match &self.sub_name {
            Some(sub) => format!("{} ({}) [{}]", self.name, sub, self.split),
            None => format!("{} [{}]", self.name, self.split),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dataset_prefix() {
        let ds = DatasetConfig::new("org/sub/corpus", "text", "audio");
        assert_eq!(ds.dataset_prefix(), "corpus");
        let ds = DatasetConfig::new("plain", "text", "audio");
        assert_eq!(ds.dataset_prefix(), "plain");
    }

    #[test]
    fn test_constant_columns() {
        let ds = DatasetConfig::new("a/b", "text", "audio")
            .with_constant("lang", "en")
            .with_constant("source", "b");
        let cols = ds.constant_columns();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols["lang"], "en");

        let empty = DatasetConfig::new("a/c", "text", "audio");
        assert!(empty.constant_columns().is_empty());
    }

    #[test]
    fn test_describe() {
        let mut ds = DatasetConfig::new("a/b", "text", "audio");
        assert_eq!(ds.describe(), "a/b [train]");
        ds.sub_name = Some("clean".to_string());
        assert_eq!(ds.describe(), "a/b (clean) [train]");
    }
}
