//! Run-wide settings shared read-only by every reader and encoder thread
//!
//! # Main Types
//!
//! - [`BaseSettings`] - queue sizing, output layout, compression knobs
//! - [`SaveSettings`] - where the merged dataset goes after the run
//! - [`EncoderConfig`] - which encoder backend drives the devices
//!
//! All three are cloned into the threads that need them and never mutated
//! after startup.

use crate::error::{PipelineError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default codec model identifier
pub const DEFAULT_MODEL_ID: &str = "nvidia/nemo-nano-codec-22khz-0.6kbps-12.5fps";

/// Default number of reader threads
pub const DEFAULT_NUM_READERS: usize = 4;

/// Default work queue capacity
pub const DEFAULT_QUEUE_SIZE: usize = 256;

/// Default records per output shard
pub const DEFAULT_LINES_PER_FILE: u64 = 10_000;

/// Default I/O buffer size for shard files (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Default gzip level
pub const DEFAULT_GZIP_LEVEL: u32 = 6;

/// Default source-load parallelism
pub const DEFAULT_LOAD_NUM_PROC: usize = 5;

/// Sample rate the codec model expects, in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 22_050;

/// Base pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseSettings {
    /// Codec model identifier handed to the encoder backend
    #[serde(default = "default_model_id", alias = "audio_codec")]
    pub model_id: String,

    /// Sample rate every waveform is resampled to before encoding
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// Number of reader threads (and source shards) per dataset
    #[serde(default = "default_num_readers")]
    pub num_readers: usize,

    /// Work queue capacity; bounds the number of decoded waveforms in flight
    #[serde(default = "default_qsize")]
    pub qsize: usize,

    /// Directory that receives every output shard
    #[serde(alias = "OUT_DIR")]
    pub out_dir: PathBuf,

    /// gzip compression level (0-9)
    #[serde(default = "default_gzip_level")]
    pub gzip_level: u32,

    /// Buffer size in bytes between the gzip stream and the file
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Records per output file before rotating
    #[serde(default = "default_lines_per_file")]
    pub lines_per_file: u64,

    /// Threads used while loading/indexing a source
    #[serde(default = "default_load_num_proc")]
    pub load_dataset_num_proc: usize,

    /// Root directory that local dataset names are resolved against
    #[serde(default)]
    pub data_root: Option<PathBuf>,

    /// Readers log progress every this many items
    #[serde(default = "default_progress_interval")]
    pub progress_interval: u64,

    /// Pause after a per-item encode failure, in milliseconds
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// How long to wait for threads after an interrupt, in seconds
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

fn default_model_id() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_num_readers() -> usize {
    DEFAULT_NUM_READERS
}

fn default_qsize() -> usize {
    DEFAULT_QUEUE_SIZE
}

fn default_gzip_level() -> u32 {
    DEFAULT_GZIP_LEVEL
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_lines_per_file() -> u64 {
    DEFAULT_LINES_PER_FILE
}

fn default_load_num_proc() -> usize {
    DEFAULT_LOAD_NUM_PROC
}

fn default_progress_interval() -> u64 {
    1000
}

fn default_error_backoff_ms() -> u64 {
    1000
}

fn default_shutdown_grace_secs() -> u64 {
    10
}

impl BaseSettings {
    /// Settings with defaults for everything but the output directory
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_id: default_model_id(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            num_readers: DEFAULT_NUM_READERS,
            qsize: DEFAULT_QUEUE_SIZE,
            out_dir: out_dir.into(),
            gzip_level: DEFAULT_GZIP_LEVEL,
            buffer_size: DEFAULT_BUFFER_SIZE,
            lines_per_file: DEFAULT_LINES_PER_FILE,
            load_dataset_num_proc: DEFAULT_LOAD_NUM_PROC,
            data_root: None,
            progress_interval: default_progress_interval(),
            error_backoff_ms: default_error_backoff_ms(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.num_readers == 0 {
            return Err(PipelineError::Config(
                "num_readers must be at least 1".to_string(),
            ));
        }
        if self.sample_rate == 0 {
            return Err(PipelineError::Config(
                "sample_rate must be at least 1".to_string(),
            ));
        }
        if self.qsize == 0 {
            return Err(PipelineError::Config("qsize must be at least 1".to_string()));
        }
        if self.gzip_level > 9 {
            return Err(PipelineError::Config(format!(
                "gzip_level must be between 0 and 9, got {}",
                self.gzip_level
            )));
        }
        if self.lines_per_file == 0 {
            return Err(PipelineError::Config(
                "lines_per_file must be at least 1".to_string(),
            ));
        }
        if self.buffer_size == 0 {
            return Err(PipelineError::Config(
                "buffer_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Settings for saving/publishing the merged dataset
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SaveSettings {
    /// Local directory for the merged dataset
    #[serde(default)]
    pub local: Option<PathBuf>,

    /// Remote registry repository id
    #[serde(default, alias = "hf_upload")]
    pub remote: Option<String>,

    /// Publish the remote dataset as private
    #[serde(default = "default_true")]
    pub private: bool,
}

fn default_true() -> bool {
    true
}

impl SaveSettings {
    /// Whether any export target is configured
    pub fn has_targets(&self) -> bool {
        self.local.is_some() || self.remote.is_some()
    }
}

/// Which encoder backend drives the devices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    /// One external encoder process per device
    #[default]
    Command,
    /// Deterministic in-process stand-in devices
    Simulated,
}

impl std::fmt::Display for EncoderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EncoderKind::Command => write!(f, "command"),
            EncoderKind::Simulated => write!(f, "simulated"),
        }
    }
}

/// Encoder backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    #[serde(default)]
    pub backend: EncoderKind,

    /// Program and arguments for the command backend
    #[serde(default)]
    pub command: Vec<String>,

    /// Number of accelerator devices to drive
    #[serde(default = "default_devices")]
    pub devices: usize,

    /// Samples per token frame (simulated backend)
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
}

fn default_devices() -> usize {
    1
}

fn default_frame_size() -> usize {
    // 22050 Hz at 12.5 frames per second
    1764
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            backend: EncoderKind::default(),
            command: Vec::new(),
            devices: default_devices(),
            frame_size: default_frame_size(),
        }
    }
}

impl EncoderConfig {
    /// Check backend-specific requirements
    pub fn validate(&self) -> Result<()> {
        match self.backend {
            EncoderKind::Command if self.command.is_empty() => Err(PipelineError::Config(
                "encoder.command is required for the command backend".to_string(),
            )),
            EncoderKind::Simulated if self.frame_size == 0 => Err(PipelineError::Config(
                "encoder.frame_size must be at least 1".to_string(),
            )),
            _ => Ok(()),
        }
    }
}
