//! Local JSONL manifest source
//!
//! A dataset named `org/corpus` with split `train` resolves to
//! `<data_root>/org/corpus[/<sub_name>]/train`, which may be a `.jsonl` or
//! `.jsonl.gz` file, or a directory of such files (read in name order).
//! Every non-blank line is one JSON object record.
//!
//! Loading indexes the row count of every file; files are indexed in
//! parallel on up to `load_dataset_num_proc` threads. Shards then seek to
//! their first row by skipping whole files and counting lines.

use super::{shard_bounds, DataSource, RecordIter, SourceLoader, SourceRecord};
use crate::config::{BaseSettings, DatasetConfig};
use crate::error::{PipelineError, Result, ResultExt};
use flate2::read::MultiGzDecoder;
use rayon::prelude::*;
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One indexed manifest file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestFile {
    pub path: PathBuf,
    pub rows: usize,
}

/// A source backed by one or more JSONL manifest files
#[derive(Debug, Clone)]
pub struct ManifestSource {
    files: Arc<Vec<ManifestFile>>,
    total: usize,
}

impl ManifestSource {
    /// Index the given files using up to `num_threads` threads
    pub fn open(paths: Vec<PathBuf>, num_threads: usize) -> Result<Self> {
        let files = index_files(paths, num_threads.max(1))?;
        let total = files.iter().map(|f| f.rows).sum();
        Ok(Self {
            files: Arc::new(files),
            total,
        })
    }

    /// Open the manifest at `path`, which may be a file or a directory
    pub fn open_path(path: impl AsRef<Path>, num_threads: usize) -> Result<Self> {
        Self::open(discover_manifest_files(path.as_ref())?, num_threads)
    }

    pub fn files(&self) -> &[ManifestFile] {
        &self.files
    }
}

impl DataSource for ManifestSource {
    fn len(&self) -> usize {
        self.total
    }

    fn shard(&self, num_shards: usize, index: usize) -> Result<RecordIter> {
        let range = shard_bounds(self.total, num_shards, index)?;

        // Locate the file holding the first row of the shard
        let mut file_idx = 0;
        let mut skip = range.start;
        while file_idx < self.files.len() && skip >= self.files[file_idx].rows {
            skip -= self.files[file_idx].rows;
            file_idx += 1;
        }

        Ok(Box::new(ManifestShardIter {
            files: Arc::clone(&self.files),
            file_idx,
            skip,
            remaining: range.len(),
            lines: None,
        }))
    }
}

struct ManifestShardIter {
    files: Arc<Vec<ManifestFile>>,
    file_idx: usize,
    /// Rows still to skip in the current file
    skip: usize,
    remaining: usize,
    lines: Option<Lines<Box<dyn BufRead + Send>>>,
}

impl ManifestShardIter {
    fn next_row(&mut self) -> Result<Option<(String, PathBuf)>> {
        loop {
            let Some(file) = self.files.get(self.file_idx) else {
                return Ok(None);
            };

            if self.lines.is_none() {
                self.lines = Some(open_text(&file.path)?.lines());
            }

            let Some(lines) = self.lines.as_mut() else {
                return Ok(None);
            };

            match lines.next() {
                Some(line) => {
                    let line = line.with_context(|| format!("reading {:?}", file.path))?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    if self.skip > 0 {
                        self.skip -= 1;
                        continue;
                    }
                    let dir = file.path.parent().map(Path::to_path_buf).unwrap_or_default();
                    return Ok(Some((line, dir)));
                }
                None => {
                    self.lines = None;
                    self.file_idx += 1;
                    self.skip = 0;
                }
            }
        }
    }
}

impl Iterator for ManifestShardIter {
    type Item = Result<SourceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        match self.next_row() {
            Ok(Some((line, dir))) => {
                self.remaining -= 1;
                Some(parse_record(&line).map(|r| r.with_base_dir(dir)))
            }
            Ok(None) => {
                self.remaining = 0;
                Some(Err(PipelineError::Source(
                    "manifest ended before the indexed row count".to_string(),
                )))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }
}

fn parse_record(line: &str) -> Result<SourceRecord> {
    match serde_json::from_str::<Value>(line)? {
        Value::Object(map) => Ok(SourceRecord::from_map(map)),
        _ => Err(PipelineError::Source(
            "manifest line is not a JSON object".to_string(),
        )),
    }
}

/// Open a plain or gzip-compressed text file
pub fn open_text(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).with_context(|| format!("opening {:?}", path))?;
    if is_gzip(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn is_gzip(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

fn is_manifest(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    name.ends_with(".jsonl") || name.ends_with(".jsonl.gz")
}

/// List manifest files at `path` (a file, or a directory of files)
pub fn discover_manifest_files(path: &Path) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    if path.is_dir() {
        let mut files = Vec::new();
        for entry in std::fs::read_dir(path).with_context(|| format!("listing {:?}", path))? {
            let entry = entry?;
            let candidate = entry.path();
            if candidate.is_file() && is_manifest(&candidate) {
                files.push(candidate);
            }
        }
        files.sort();
        if files.is_empty() {
            return Err(PipelineError::Source(format!(
                "no .jsonl or .jsonl.gz files in {:?}",
                path
            )));
        }
        return Ok(files);
    }

    for ext in ["jsonl", "jsonl.gz"] {
        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(ext);
        let candidate = PathBuf::from(name);
        if candidate.is_file() {
            return Ok(vec![candidate]);
        }
    }

    Err(PipelineError::Source(format!("dataset not found at {:?}", path)))
}

fn count_rows(path: &Path) -> Result<usize> {
    let mut rows = 0;
    for line in open_text(path)?.lines() {
        let line = line.with_context(|| format!("indexing {:?}", path))?;
        if !line.trim().is_empty() {
            rows += 1;
        }
    }
    Ok(rows)
}

fn index_files(paths: Vec<PathBuf>, num_threads: usize) -> Result<Vec<ManifestFile>> {
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .thread_name(|i| format!("index-{:02}", i))
        .build()
        .map_err(|e| PipelineError::Source(format!("failed to build indexing pool: {}", e)))?;

    // Indexed collect keeps the files in discovery order
    pool.install(|| {
        paths
            .par_iter()
            .map(|path| {
                count_rows(path).map(|rows| ManifestFile {
                    path: path.clone(),
                    rows,
                })
            })
            .collect()
    })
}

/// Resolves dataset configs to manifests on the local filesystem
#[derive(Debug, Clone, Default)]
pub struct ManifestLoader;

impl ManifestLoader {
    pub fn new() -> Self {
        Self
    }

    /// Location of a dataset split
    pub fn resolve(dataset: &DatasetConfig, settings: &BaseSettings) -> PathBuf {
        if let Some(path) = &dataset.path {
            return path.clone();
        }

        let mut path = settings.data_root.clone().unwrap_or_default();
        path.push(&dataset.name);
        if let Some(sub) = &dataset.sub_name {
            path.push(sub);
        }
        path.push(&dataset.split);
        path
    }
}

impl SourceLoader for ManifestLoader {
    fn load(&self, dataset: &DatasetConfig, settings: &BaseSettings) -> Result<Arc<dyn DataSource>> {
        let path = Self::resolve(dataset, settings);
        tracing::info!("Loading dataset {} from {:?}", dataset.describe(), path);

        let source = ManifestSource::open_path(&path, settings.load_dataset_num_proc)
            .with_context(|| format!("loading dataset {}", dataset.describe()))?;

        tracing::info!(
            "Loaded {} samples from {} ({} file(s))",
            source.len(),
            dataset.describe(),
            source.files().len()
        );
        Ok(Arc::new(source))
    }
}
