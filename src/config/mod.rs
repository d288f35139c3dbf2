//! Configuration module for the codec pipeline
//!
//! The pipeline reads one TOML document at startup:
//!
//! ```toml
//! [base_settings]
//! model_id = "nvidia/nemo-nano-codec-22khz-0.6kbps-12.5fps"
//! num_readers = 4
//! qsize = 256
//! out_dir = "output"
//! gzip_level = 6
//! buffer_size = 1048576
//! lines_per_file = 10000
//! load_dataset_num_proc = 5
//!
//! [save_settings]
//! local = "final_dataset"
//! remote = "org/encoded-corpus"
//!
//! [encoder]
//! backend = "command"
//! command = ["python", "encode_server.py"]
//! devices = 2
//!
//! [[datasets]]
//! name = "org/corpus"
//! text_column_name = "text"
//! audio_column_name = "audio"
//! speaker_column_name = "speaker_id"
//! add_constant = [{ key = "lang", value = "en" }]
//! ```
//!
//! The legacy key names `audio_codec`, `OUT_DIR`, `hf_upload` and
//! `hf_datasets` are accepted as aliases.
//!
//! Every config object is immutable after [`PipelineConfig::validate`] and is
//! cloned into the threads that need it.

pub mod dataset;
pub mod settings;

pub use dataset::*;
pub use settings::*;

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub base_settings: BaseSettings,

    #[serde(default)]
    pub save_settings: SaveSettings,

    #[serde(default)]
    pub encoder: EncoderConfig,

    #[serde(default, alias = "hf_datasets")]
    pub datasets: Vec<DatasetConfig>,
}

impl PipelineConfig {
    /// Create a configuration with default settings and no datasets
    pub fn new(base_settings: BaseSettings) -> Self {
        Self {
            base_settings,
            save_settings: SaveSettings::default(),
            encoder: EncoderConfig::default(),
            datasets: Vec::new(),
        }
    }

    /// Load a configuration file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::from_toml_str(&content).map_err(|e| {
            e.with_context(format!("Failed to parse config file {:?}", path))
        })
    }

    /// Parse a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Add a dataset
    pub fn add_dataset(&mut self, dataset: DatasetConfig) {
        self.datasets.push(dataset);
    }

    /// Validate that all datasets declare the same constant columns.
    ///
    /// The merged output must have one schema, so if any dataset adds a
    /// constant column every dataset has to add it.
    pub fn validate_datasets(&self) -> Result<()> {
        if self.datasets.is_empty() {
            return Err(PipelineError::Config(
                "No datasets specified in configuration".to_string(),
            ));
        }

        let all_keys: BTreeSet<String> = self
            .datasets
            .iter()
            .flat_map(|ds| ds.constant_columns().into_keys())
            .collect();

        for ds in &self.datasets {
            let keys: BTreeSet<String> = ds.constant_columns().into_keys().collect();
            let missing: Vec<&String> = all_keys.difference(&keys).collect();
            if !missing.is_empty() {
                return Err(PipelineError::Config(format!(
                    "Dataset '{}' is missing constant columns: {:?}. \
                     All datasets must have the same constant columns for merging.",
                    ds.name, missing
                )));
            }

            for key in &keys {
                let reserved = crate::types::EncodedRecord::BASE_COLUMNS.contains(&key.as_str())
                    || key == crate::types::EncodedRecord::SPEAKER_COLUMN;
                if reserved {
                    return Err(PipelineError::Config(format!(
                        "Dataset '{}' uses reserved column name '{}' as a constant",
                        ds.name, key
                    )));
                }
            }
        }

        let mut prefixes = HashSet::new();
        for ds in &self.datasets {
            let prefix = ds.dataset_prefix();
            if prefix.is_empty() {
                return Err(PipelineError::Config(format!(
                    "Dataset name '{}' has an empty output prefix",
                    ds.name
                )));
            }
            if !prefixes.insert(prefix) {
                return Err(PipelineError::Config(format!(
                    "Datasets share the output prefix '{}'; output files would collide",
                    prefix
                )));
            }
        }

        tracing::info!(
            "Dataset validation passed: {} dataset(s) with constant columns {:?}",
            self.datasets.len(),
            all_keys
        );
        Ok(())
    }

    /// Validate settings, encoder and datasets
    pub fn validate(&self) -> Result<()> {
        self.base_settings.validate()?;
        self.encoder.validate()?;
        self.validate_datasets()
    }
}

/// Helper to format bytes as human-readable size
pub fn format_file_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
