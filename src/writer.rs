//! Rotating gzip JSON-lines writer owned by one encoder worker
//!
//! Each worker writes its own sequence of files:
//!
//! ```text
//! <prefix>-worker<NN>-<IIIII>.jsonl.gz
//! ```
//!
//! A file is opened on the first record written to it and closed after
//! `lines_per_file` records, so a worker that never writes leaves no file and
//! there is never a trailing empty file. The gzip header carries a zero mtime
//! and no file name, so identical records produce identical bytes.

use crate::error::{PipelineError, Result, ResultExt};
use crate::types::EncodedRecord;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::{Compression, GzBuilder};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Lines, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// Suffix of every shard file
pub const SHARD_SUFFIX: &str = ".jsonl.gz";

/// Appended to a shard set aside after a write error
pub const FAILED_SUFFIX: &str = ".failed";

/// File name for rotation `index` of worker `rank`
pub fn shard_file_name(prefix: &str, rank: usize, index: usize) -> String {
    format!("{}-worker{:02}-{:05}{}", prefix, rank, index, SHARD_SUFFIX)
}

/// Whether `name` has the `<prefix>-worker<NN>-<IIIII>.jsonl.gz` shape
pub fn is_shard_file_name(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(SHARD_SUFFIX) else {
        return false;
    };
    let mut parts = stem.rsplitn(3, '-');
    let (Some(index), Some(worker), Some(prefix)) = (parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let all_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    !prefix.is_empty()
        && index.len() >= 5
        && all_digits(index)
        && worker
            .strip_prefix("worker")
            .map_or(false, |rank| rank.len() >= 2 && all_digits(rank))
}

/// Leading part shared by every file of one dataset
pub fn dataset_file_prefix(prefix: &str) -> String {
    format!("{}-worker", prefix)
}

struct OpenShard {
    path: PathBuf,
    encoder: GzEncoder<BufWriter<File>>,
    lines: u64,
}

/// Append-only writer that rotates to a new file every `lines_per_file` records
pub struct RotatingWriter {
    out_dir: PathBuf,
    prefix: String,
    rank: usize,
    level: Compression,
    buffer_size: usize,
    lines_per_file: u64,
    current: Option<OpenShard>,
    next_index: usize,
    records_written: u64,
    discarded: u64,
    finished: Vec<PathBuf>,
}

impl RotatingWriter {
    pub fn new(
        out_dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        rank: usize,
        gzip_level: u32,
        buffer_size: usize,
        lines_per_file: u64,
    ) -> Self {
        Self {
            out_dir: out_dir.into(),
            prefix: prefix.into(),
            rank,
            level: Compression::new(gzip_level.min(9)),
            buffer_size: buffer_size.max(1),
            lines_per_file: lines_per_file.max(1),
            current: None,
            next_index: 0,
            records_written: 0,
            discarded: 0,
            finished: Vec::new(),
        }
    }

    fn open(&mut self) -> Result<OpenShard> {
        let path = self
            .out_dir
            .join(shard_file_name(&self.prefix, self.rank, self.next_index));
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        let encoder = GzBuilder::new()
            .mtime(0)
            .write(BufWriter::with_capacity(self.buffer_size, file), self.level);

        tracing::debug!("Worker {} opened {}", self.rank, path.display());
        self.next_index += 1;
        Ok(OpenShard {
            path,
            encoder,
            lines: 0,
        })
    }

    /// Append one record as a single JSON line
    pub fn write(&mut self, record: &EncodedRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        let mut shard = match self.current.take() {
            Some(shard) => shard,
            None => self.open()?,
        };
        if let Err(e) = shard.encoder.write_all(&line) {
            let context = format!("writing to {}", shard.path.display());
            self.discard(shard);
            return Err(PipelineError::Io(e).with_context(context));
        }
        shard.lines += 1;
        self.records_written += 1;

        let full = shard.lines >= self.lines_per_file;
        self.current = Some(shard);
        if full {
            self.finish_current()?;
        }
        Ok(())
    }

    /// Set aside a shard whose stream may end in a partial line.
    ///
    /// The file is renamed out of the shard namespace so the merge never
    /// reads it; the next write opens the next index.
    fn discard(&mut self, shard: OpenShard) {
        let OpenShard {
            path,
            encoder,
            lines,
        } = shard;
        drop(encoder);
        self.records_written -= lines;
        self.discarded += lines;

        let mut failed = path.clone().into_os_string();
        failed.push(FAILED_SUFFIX);
        let failed = PathBuf::from(failed);
        match std::fs::rename(&path, &failed) {
            Ok(()) => tracing::warn!(
                "Worker {} set aside {} after a write error ({} records dropped)",
                self.rank,
                failed.display(),
                lines
            ),
            Err(e) => {
                tracing::warn!(
                    "Worker {} could not rename {} ({}), removing it ({} records dropped)",
                    self.rank,
                    path.display(),
                    e,
                    lines
                );
                let _ = std::fs::remove_file(&path);
            }
        }
    }

    fn finish_current(&mut self) -> Result<Option<PathBuf>> {
        let Some(shard) = self.current.take() else {
            return Ok(None);
        };
        let mut buffered = shard
            .encoder
            .finish()
            .with_context(|| format!("finishing {}", shard.path.display()))?;
        buffered
            .flush()
            .with_context(|| format!("flushing {}", shard.path.display()))?;

        tracing::debug!(
            "Worker {} closed {} ({} records)",
            self.rank,
            shard.path.display(),
            shard.lines
        );
        self.finished.push(shard.path.clone());
        Ok(Some(shard.path))
    }

    /// Flush and close the open file, if any.
    ///
    /// Safe to call any number of times; returns the path of the file it
    /// closed.
    pub fn close(&mut self) -> Result<Option<PathBuf>> {
        self.finish_current()
    }

    /// Records written across every file
    pub fn records_written(&self) -> u64 {
        self.records_written
    }

    /// Records lost with shards set aside after a write error
    pub fn records_discarded(&self) -> u64 {
        self.discarded
    }

    /// Files created so far, including the one still open
    pub fn files_written(&self) -> usize {
        self.next_index
    }

    /// Files already closed, in rotation order
    pub fn finished_files(&self) -> &[PathBuf] {
        &self.finished
    }

    /// Path of the file currently open for writing
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|s| s.path.as_path())
    }
}

impl Drop for RotatingWriter {
    fn drop(&mut self) {
        if let Err(e) = self.finish_current() {
            tracing::error!("Worker {} failed to close output file: {}", self.rank, e);
        }
    }
}

/// Streaming reader over one gzip JSON-lines shard
pub struct ShardReader<T = EncodedRecord> {
    path: PathBuf,
    lines: Lines<BufReader<MultiGzDecoder<File>>>,
    line_no: usize,
    _marker: PhantomData<T>,
}

impl<T: DeserializeOwned> ShardReader<T> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        Ok(Self {
            lines: BufReader::new(MultiGzDecoder::new(file)).lines(),
            path,
            line_no: 0,
            _marker: PhantomData,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<T: DeserializeOwned> Iterator for ShardReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(PipelineError::Io(e)
                        .with_context(format!("reading {}", self.path.display()))))
                }
            };
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            return Some(serde_json::from_str(&line).map_err(|e| {
                PipelineError::from(e)
                    .with_context(format!("{}:{}", self.path.display(), self.line_no))
            }));
        }
    }
}

/// Read every record of a shard file
pub fn read_shard(path: impl AsRef<Path>) -> Result<ShardReader<EncodedRecord>> {
    ShardReader::open(path)
}
