//! Export targets for the merged dataset
//!
//! - [`LocalExporter`] writes `data.jsonl.gz` and `dataset_info.json` into a
//!   directory
//! - [`DatasetPublisher`] is the seam for a remote dataset registry; the
//!   registry client itself lives outside this crate

use super::MergedDataset;
use crate::error::{PipelineError, Result, ResultExt};
use chrono::{DateTime, Utc};
use flate2::{Compression, GzBuilder};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Name of the merged data file inside a local export
pub const DATA_FILE: &str = "data.jsonl.gz";

/// Name of the metadata file inside a local export
pub const INFO_FILE: &str = "dataset_info.json";

/// Metadata written next to an exported dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetInfo {
    pub num_rows: u64,
    pub columns: Vec<String>,
    /// Shard file names the export was built from
    pub source_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl DatasetInfo {
    pub fn describe(dataset: &MergedDataset) -> Self {
        Self {
            num_rows: dataset.num_rows(),
            columns: dataset.columns().iter().cloned().collect(),
            source_files: dataset
                .files()
                .iter()
                .filter_map(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .collect(),
            created_at: Utc::now(),
        }
    }
}

/// Pushes a merged dataset to a remote registry
#[cfg_attr(test, mockall::automock)]
pub trait DatasetPublisher: Send + Sync {
    /// Upload `dataset` under `repo_id`
    fn publish(&self, dataset: &MergedDataset, repo_id: &str, private: bool) -> Result<()>;
}

/// Writes the merged dataset into a local directory
#[derive(Debug, Clone)]
pub struct LocalExporter {
    dir: PathBuf,
    gzip_level: u32,
    buffer_size: usize,
}

impl LocalExporter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            gzip_level: 6,
            buffer_size: 1024 * 1024,
        }
    }

    /// Builder method to set compression level and write buffer size
    pub fn with_compression(mut self, gzip_level: u32, buffer_size: usize) -> Self {
        self.gzip_level = gzip_level.min(9);
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write every record and the metadata file
    pub fn export(&self, dataset: &MergedDataset) -> Result<DatasetInfo> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating {}", self.dir.display()))?;

        let data_path = self.dir.join(DATA_FILE);
        let file = File::create(&data_path)
            .with_context(|| format!("creating {}", data_path.display()))?;
        let mut gz = GzBuilder::new().mtime(0).write(
            BufWriter::with_capacity(self.buffer_size, file),
            Compression::new(self.gzip_level),
        );

        let mut written = 0u64;
        for record in dataset.records() {
            serde_json::to_writer(&mut gz, &record?)?;
            gz.write_all(b"\n")?;
            written += 1;
        }
        gz.finish()?.flush()?;

        if written != dataset.num_rows() {
            return Err(PipelineError::Export(format!(
                "wrote {} rows but the merged dataset has {}",
                written,
                dataset.num_rows()
            )));
        }

        let info = DatasetInfo::describe(dataset);
        let info_path = self.dir.join(INFO_FILE);
        let info_file = File::create(&info_path)
            .with_context(|| format!("creating {}", info_path.display()))?;
        let mut info_writer = BufWriter::new(info_file);
        serde_json::to_writer_pretty(&mut info_writer, &info)?;
        info_writer
            .flush()
            .with_context(|| format!("writing {}", info_path.display()))?;

        tracing::info!("Saved {} rows to {}", written, self.dir.display());
        Ok(info)
    }
}
