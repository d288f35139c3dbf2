//! In-memory data source

use super::{shard_bounds, DataSource, RecordIter, SourceRecord};
use crate::error::Result;
use std::sync::Arc;

/// A source backed by a vector of records.
///
/// Shards share the backing vector; each yielded record is a clone.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    records: Arc<Vec<SourceRecord>>,
}

impl MemorySource {
    pub fn new(records: Vec<SourceRecord>) -> Self {
        Self {
            records: Arc::new(records),
        }
    }
}

impl FromIterator<SourceRecord> for MemorySource {
    fn from_iter<I: IntoIterator<Item = SourceRecord>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl DataSource for MemorySource {
    fn len(&self) -> usize {
        self.records.len()
    }

    fn shard(&self, num_shards: usize, index: usize) -> Result<RecordIter> {
        let range = shard_bounds(self.records.len(), num_shards, index)?;
        let records = Arc::clone(&self.records);
        Ok(Box::new(range.map(move |i| Ok(records[i].clone()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn source(n: usize) -> MemorySource {
        (0..n)
            .map(|i| SourceRecord::new().with_field("idx", i))
            .collect()
    }

    #[test]
    fn test_shards_are_disjoint_and_ordered() {
        let src = source(7);
        let mut seen = Vec::new();
        for index in 0..3 {
            for record in src.shard(3, index).unwrap() {
                let record = record.unwrap();
                seen.push(record.get("idx").and_then(Value::as_u64).unwrap());
            }
        }
        assert_eq!(seen, (0..7).collect::<Vec<u64>>());
    }

    #[test]
    fn test_empty_source() {
        let src = MemorySource::default();
        assert!(src.is_empty());
        assert_eq!(src.shard(2, 1).unwrap().count(), 0);
    }
}
