//! Final merge of every output shard into one dataset
//!
//! After the last dataset has been processed, every worker shard
//! (`<prefix>-worker<NN>-<IIIII>.jsonl.gz`) in the output directory is read as
//! one collection. Records are streamed; the
//! merged dataset only keeps the file list, the row count and the schema.
//!
//! # Schema
//!
//! All records must share the same column set. `speaker` is the one nullable
//! column: records without it are compatible with records that carry it. Any
//! other difference, or a line that does not decode, fails the merge.

pub mod export;

pub use export::{DatasetInfo, DatasetPublisher, LocalExporter};

use crate::error::{PipelineError, Result, ResultExt};
use crate::types::EncodedRecord;
use crate::writer::{is_shard_file_name, read_shard, ShardReader};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Every shard file in `out_dir`, sorted by name
pub fn discover_shards(out_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let entries =
        std::fs::read_dir(out_dir).with_context(|| format!("listing {}", out_dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let is_shard = path
            .file_name()
            .map(|n| is_shard_file_name(&n.to_string_lossy()))
            .unwrap_or(false);
        if is_shard && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// All shards viewed as one dataset
#[derive(Debug, Clone)]
pub struct MergedDataset {
    files: Vec<PathBuf>,
    num_rows: u64,
    columns: BTreeSet<String>,
}

impl MergedDataset {
    /// Scan every file once, counting rows and checking the schema
    pub fn load(files: Vec<PathBuf>) -> Result<Self> {
        if files.is_empty() {
            return Err(PipelineError::Merge("no output files to merge".to_string()));
        }

        let mut schema: Option<(BTreeSet<String>, PathBuf)> = None;
        let mut has_speaker = false;
        let mut num_rows = 0u64;

        for path in &files {
            let reader: ShardReader<Map<String, Value>> = ShardReader::open(path)?;
            for (i, row) in reader.enumerate() {
                let row = Value::Object(row.map_err(|e| PipelineError::Merge(e.to_string()))?);
                EncodedRecord::deserialize(&row).map_err(|e| {
                    PipelineError::Merge(format!("{} row {}: {}", path.display(), i + 1, e))
                })?;

                let mut columns: BTreeSet<String> =
                    row.as_object().into_iter().flat_map(|m| m.keys().cloned()).collect();
                has_speaker |= columns.remove(EncodedRecord::SPEAKER_COLUMN);

                match &schema {
                    None => schema = Some((columns, path.clone())),
                    Some((expected, first)) if *expected != columns => {
                        return Err(PipelineError::Merge(format!(
                            "schema mismatch: {} row {} has columns {:?}, {} has {:?}",
                            path.display(),
                            i + 1,
                            columns,
                            first.display(),
                            expected
                        )));
                    }
                    Some(_) => {}
                }
                num_rows += 1;
            }
        }

        let mut columns = schema.map(|(c, _)| c).unwrap_or_default();
        if has_speaker {
            columns.insert(EncodedRecord::SPEAKER_COLUMN.to_string());
        }

        tracing::info!(
            "Merged {} files: {} rows, columns {:?}",
            files.len(),
            num_rows,
            columns
        );
        Ok(Self {
            files,
            num_rows,
            columns,
        })
    }

    /// Discover and load every shard in `out_dir`
    pub fn from_dir(out_dir: &Path) -> Result<Self> {
        Self::load(discover_shards(out_dir)?)
    }

    pub fn num_rows(&self) -> u64 {
        self.num_rows
    }

    /// Column names, sorted
    pub fn columns(&self) -> &BTreeSet<String> {
        &self.columns
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Stream every record, file by file
    pub fn records(&self) -> impl Iterator<Item = Result<EncodedRecord>> + '_ {
        self.files
            .iter()
            .flat_map(|path| -> Box<dyn Iterator<Item = Result<EncodedRecord>>> {
                match read_shard(path) {
                    Ok(reader) => Box::new(reader),
                    Err(e) => Box::new(std::iter::once(Err(e))),
                }
            })
    }
}
