//! Core data types for the codec pipeline
//!
//! - [`WorkItem`] - one audio+text record in flight between a reader and an encoder
//! - [`EncodedRecord`] - one output line written to a compressed shard
//! - [`ReaderReport`] / [`WorkerReport`] / [`DatasetStats`] - per-run statistics

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Number of token layers produced by the codec model
pub const LAYER_COUNT: usize = 4;

/// A prepared record travelling through the work queue.
///
/// Moved into the queue by a reader and moved out by exactly one encoder
/// worker; never shared.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    /// Transcript text
    pub text: String,
    /// Mono samples at the model sample rate
    pub waveform: Vec<f32>,
    /// Speaker id, when the dataset declares a speaker column
    pub speaker: Option<String>,
    /// Constant fields copied from the dataset configuration
    pub constants: BTreeMap<String, String>,
}

impl WorkItem {
    /// Create a work item without speaker or constant fields
    pub fn new(text: impl Into<String>, waveform: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            waveform,
            speaker: None,
            constants: BTreeMap::new(),
        }
    }

    /// Builder method to set the speaker
    pub fn with_speaker(mut self, speaker: impl Into<String>) -> Self {
        self.speaker = Some(speaker.into());
        self
    }

    /// Builder method to add a constant field
    pub fn with_constant(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.constants.insert(key.into(), value.into());
        self
    }

    /// Short prefix of the text for log lines
    pub fn text_preview(&self) -> String {
        const PREVIEW_CHARS: usize = 30;
        let mut preview: String = self.text.chars().take(PREVIEW_CHARS).collect();
        if self.text.chars().count() > PREVIEW_CHARS {
            preview.push_str("...");
        }
        preview
    }
}

/// One encoded output record, serialized as a single JSON line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedRecord {
    pub text: String,
    #[serde(rename = "nano_layer_1")]
    pub layer_1: Vec<i64>,
    #[serde(rename = "nano_layer_2")]
    pub layer_2: Vec<i64>,
    #[serde(rename = "nano_layer_3")]
    pub layer_3: Vec<i64>,
    #[serde(rename = "nano_layer_4")]
    pub layer_4: Vec<i64>,
    pub encoded_len: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    /// Dataset constant fields, flattened into the top-level object
    #[serde(flatten)]
    pub constants: BTreeMap<String, String>,
}

impl EncodedRecord {
    /// Column names of the fixed part of every record
    pub const BASE_COLUMNS: [&'static str; 6] = [
        "text",
        "nano_layer_1",
        "nano_layer_2",
        "nano_layer_3",
        "nano_layer_4",
        "encoded_len",
    ];

    /// Column name of the optional speaker field
    pub const SPEAKER_COLUMN: &'static str = "speaker";

    /// Token layers in order
    pub fn layers(&self) -> [&[i64]; LAYER_COUNT] {
        [&self.layer_1, &self.layer_2, &self.layer_3, &self.layer_4]
    }
}

/// Outcome of one reader thread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderReport {
    pub reader_id: usize,
    /// Items pushed onto the work queue
    pub produced: u64,
    /// Error that ended the shard early, if any
    pub error: Option<String>,
}

/// Outcome of one encoder worker thread
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub rank: usize,
    /// Items encoded and written
    pub processed: u64,
    /// Items dropped after a per-item failure
    pub failed: u64,
    /// Output files produced
    pub files: usize,
    /// Whether a shutdown marker was consumed
    pub received_shutdown: bool,
    /// Fatal error that stopped the worker, if any
    pub error: Option<String>,
}

/// Aggregate statistics for one processed dataset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetStats {
    pub dataset: String,
    pub items_produced: u64,
    pub items_encoded: u64,
    pub items_failed: u64,
    pub readers_failed: usize,
    pub workers_failed: usize,
    /// Output files carrying this dataset's prefix
    pub files: usize,
    /// Total size of those files in bytes
    pub total_bytes: u64,
    pub elapsed: Duration,
}

impl DatasetStats {
    /// Items that were produced but neither encoded nor reported as failed.
    ///
    /// Non-zero only when a worker died mid-run and took queued items with it.
    pub fn items_unaccounted(&self) -> u64 {
        self.items_produced
            .saturating_sub(self.items_encoded + self.items_failed)
    }

    /// Encoding throughput in items per second
    pub fn items_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.items_encoded as f64 / secs
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_work_item_builder() {
        let item = WorkItem::new("hello", vec![0.0; 4])
            .with_speaker("spk1")
            .with_constant("lang", "en");
        assert_eq!(item.speaker.as_deref(), Some("spk1"));
        assert_eq!(item.constants.get("lang").map(String::as_str), Some("en"));
    }

    #[test]
    fn test_text_preview_truncates() {
        let item = WorkItem::new("a".repeat(100), Vec::new());
        assert_eq!(item.text_preview().len(), 33);
        let short = WorkItem::new("short", Vec::new());
        assert_eq!(short.text_preview(), "short");
    }

    #[test]
    fn test_record_json_layout() {
        let record = EncodedRecord {
            text: "hi".to_string(),
            layer_1: vec![1, 2],
            layer_2: vec![3],
            layer_3: vec![],
            layer_4: vec![4],
            encoded_len: 2,
            speaker: None,
            constants: BTreeMap::from([("lang".to_string(), "en".to_string())]),
        };
        let value = serde_json::to_value(&record).unwrap();
        let obj = value.as_object().unwrap();
        assert!(obj.contains_key("nano_layer_1"));
        assert!(!obj.contains_key("speaker"));
        assert_eq!(obj["lang"], "en");
        assert_eq!(obj["encoded_len"], 2);
    }

    #[test]
    fn test_unaccounted_items() {
        let stats = DatasetStats {
            items_produced: 10,
            items_encoded: 7,
            items_failed: 2,
            ..Default::default()
        };
        assert_eq!(stats.items_unaccounted(), 1);
    }
}
