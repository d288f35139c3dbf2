//! Test data builders for creating test objects

use codecpack_rs::config::DatasetConfig;
use codecpack_rs::source::{MemorySource, SourceRecord};
use serde_json::json;

/// Builder for in-memory source datasets
pub struct SourceBuilder {
    name: String,
    rows: usize,
    samples: usize,
    speakers: usize,
    empty_every: Option<usize>,
}

impl SourceBuilder {
    pub fn new(name: &str, rows: usize) -> Self {
        Self {
            name: name.to_string(),
            rows,
            samples: 16,
            speakers: 0,
            empty_every: None,
        }
    }

    /// Samples per waveform
    pub fn samples(mut self, samples: usize) -> Self {
        self.samples = samples;
        self
    }

    /// Rotate through this many speaker ids
    pub fn speakers(mut self, speakers: usize) -> Self {
        self.speakers = speakers;
        self
    }

    /// Give every n-th row an empty waveform
    pub fn empty_every(mut self, n: usize) -> Self {
        self.empty_every = Some(n);
        self
    }

    pub fn record(&self, i: usize) -> SourceRecord {
        let len = match self.empty_every {
            Some(n) if i % n == 0 => 0,
            _ => self.samples,
        };
        let amplitude = (i % 10) as f64 / 10.0;
        let mut record = SourceRecord::new()
            .with_field("text", format!("{} sentence {}", self.name, i))
            .with_field("audio", json!({ "array": vec![amplitude; len], "sampling_rate": 22050 }));
        if self.speakers > 0 {
            record = record.with_field("speaker_id", format!("spk{}", i % self.speakers));
        }
        record
    }

    pub fn build(self) -> MemorySource {
        (0..self.rows).map(|i| self.record(i)).collect()
    }
}

/// Dataset config matching the columns produced by [`SourceBuilder`]
pub fn dataset_config(name: &str) -> DatasetConfig {
    DatasetConfig::new(name, "text", "audio")
}

#[cfg(test)]
mod tests {
    use super::*;
    use codecpack_rs::source::DataSource;

    #[test]
    fn test_source_builder() {
        let source = SourceBuilder::new("ds", 5).speakers(2).empty_every(3).build();
        assert_eq!(source.len(), 5);
        let first = SourceBuilder::new("ds", 1).speakers(2).record(0);
        assert_eq!(first.get("speaker_id").unwrap(), "spk0");
    }
}
