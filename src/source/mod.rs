//! Data sources feeding the reader threads
//!
//! A source is a row-addressable collection of records that can be split into
//! `n` disjoint, ordered, contiguous shards. Each reader thread owns exactly
//! one shard iterator.
//!
//! # Components
//!
//! - [`DataSource`] - the sharding contract
//! - [`SourceLoader`] - turns a [`DatasetConfig`] into a loaded source
//! - [`ManifestSource`] - local JSONL manifests (optionally gzipped)
//! - [`MemorySource`] - records held in memory
//! - [`audio`] - waveform extraction from record values

pub mod audio;
pub mod manifest;
pub mod memory;

pub use manifest::{ManifestLoader, ManifestSource};
pub use memory::MemorySource;

use crate::config::{BaseSettings, DatasetConfig};
use crate::error::{PipelineError, Result};
use serde_json::{Map, Value};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Iterator over one shard of a source
pub type RecordIter = Box<dyn Iterator<Item = Result<SourceRecord>> + Send>;

/// One raw record with named fields
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceRecord {
    fields: Map<String, Value>,
    /// Directory that relative audio paths are resolved against
    base_dir: Option<PathBuf>,
}

impl SourceRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an already-parsed JSON object
    pub fn from_map(fields: Map<String, Value>) -> Self {
        Self {
            fields,
            base_dir: None,
        }
    }

    /// Builder method to add a field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Builder method to set the base directory for relative paths
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }

    pub fn base_dir(&self) -> Option<&Path> {
        self.base_dir.as_deref()
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

/// A shardable collection of records
pub trait DataSource: Send + Sync {
    /// Total number of records
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterator over shard `index` of `num_shards`
    fn shard(&self, num_shards: usize, index: usize) -> Result<RecordIter>;
}

/// Loads the source described by a dataset config
pub trait SourceLoader: Send + Sync {
    fn load(&self, dataset: &DatasetConfig, settings: &BaseSettings) -> Result<Arc<dyn DataSource>>;
}

/// Row range of shard `index` out of `num_shards` over `total` rows.
///
/// Shards are contiguous; the first `total % num_shards` shards get one extra
/// row. Together they cover `0..total` without overlap.
pub fn shard_bounds(total: usize, num_shards: usize, index: usize) -> Result<Range<usize>> {
    if num_shards == 0 {
        return Err(PipelineError::Source(
            "number of shards must be at least 1".to_string(),
        ));
    }
    if index >= num_shards {
        return Err(PipelineError::Source(format!(
            "shard index {} out of range for {} shards",
            index, num_shards
        )));
    }

    let div = total / num_shards;
    let rem = total % num_shards;
    let start = div * index + index.min(rem);
    let end = start + div + usize::from(index < rem);
    Ok(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_shard_bounds_even() {
        assert_eq!(shard_bounds(10, 2, 0).unwrap(), 0..5);
        assert_eq!(shard_bounds(10, 2, 1).unwrap(), 5..10);
    }

    #[test]
    fn test_shard_bounds_uneven() {
        assert_eq!(shard_bounds(10, 3, 0).unwrap(), 0..4);
        assert_eq!(shard_bounds(10, 3, 1).unwrap(), 4..7);
        assert_eq!(shard_bounds(10, 3, 2).unwrap(), 7..10);
    }

    #[test]
    fn test_more_shards_than_rows() {
        assert_eq!(shard_bounds(2, 4, 1).unwrap(), 1..2);
        assert!(shard_bounds(2, 4, 3).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_shard_arguments() {
        assert!(shard_bounds(10, 0, 0).is_err());
        assert!(shard_bounds(10, 2, 2).is_err());
    }

    #[test]
    fn test_source_record_fields() {
        let record = SourceRecord::new()
            .with_field("text", "hello")
            .with_field("id", 3)
            .with_base_dir("/data");
        assert_eq!(record.get("text").and_then(Value::as_str), Some("hello"));
        assert!(record.get("missing").is_none());
        assert_eq!(record.base_dir(), Some(Path::new("/data")));
        assert_eq!(record.columns().count(), 2);
    }

    proptest! {
        #[test]
        fn test_shards_partition_rows(total in 0usize..5000, num_shards in 1usize..64) {
            let mut next = 0;
            for index in 0..num_shards {
                let range = shard_bounds(total, num_shards, index).unwrap();
                // Property: shards are contiguous and ordered
                prop_assert_eq!(range.start, next);
                next = range.end;
            }
            // Property: shards cover every row exactly once
            prop_assert_eq!(next, total);
        }

        #[test]
        fn test_shard_sizes_differ_by_at_most_one(total in 0usize..5000, num_shards in 1usize..64) {
            let sizes: Vec<usize> = (0..num_shards)
                .map(|i| shard_bounds(total, num_shards, i).unwrap().len())
                .collect();
            let min = sizes.iter().min().copied().unwrap_or(0);
            let max = sizes.iter().max().copied().unwrap_or(0);
            prop_assert!(max - min <= 1);
        }
    }
}
