//! Error handling for the codec pipeline
//!
//! This module defines the pipeline error type and a Result alias for use
//! throughout the crate. Errors are grouped the way the pipeline reacts to
//! them: configuration errors abort before any thread is spawned, per-item
//! errors are logged and skipped by the worker that hit them, and merge or
//! export errors are fatal for the whole run.

use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing or inconsistent configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// No accelerator device is available to the encoder backend
    #[error("No encoder devices available")]
    NoDevices,

    /// Errors reading from a data source
    #[error("Source error: {0}")]
    Source(String),

    /// Errors decoding audio from a source record
    #[error("Audio error: {0}")]
    Audio(String),

    /// Errors raised by the external encoder
    #[error("Encode error: {0}")]
    Encode(String),

    /// The encoder for a device is gone (its process exited or its pipe
    /// broke); the worker bound to it cannot continue
    #[error("Encoder lost: {0}")]
    EncoderLost(String),

    /// Errors related to the work queue
    #[error("Queue error: {0}")]
    Queue(String),

    /// Errors while merging output shards
    #[error("Merge error: {0}")]
    Merge(String),

    /// Errors while exporting the merged dataset
    #[error("Export error: {0}")]
    Export(String),

    /// The run was interrupted by the user
    #[error("Interrupted")]
    Interrupted,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<PipelineError>,
    },
}

impl PipelineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        PipelineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error (or the error it wraps) is an interruption
    pub fn is_interrupted(&self) -> bool {
        match self {
            PipelineError::Interrupted => true,
            PipelineError::WithContext { source, .. } => source.is_interrupted(),
            _ => false,
        }
    }

    /// Whether this error means the device's encoder can no longer be used
    pub fn is_encoder_lost(&self) -> bool {
        match self {
            PipelineError::EncoderLost(_) => true,
            PipelineError::WithContext { source, .. } => source.is_encoder_lost(),
            _ => false,
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for PipelineError {
    fn from(err: toml::de::Error) -> Self {
        PipelineError::Config(err.to_string())
    }
}

impl From<hound::Error> for PipelineError {
    fn from(err: hound::Error) -> Self {
        PipelineError::Audio(err.to_string())
    }
}

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

impl<T> ResultExt<T> for std::result::Result<T, std::io::Error> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| PipelineError::Io(e).with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| PipelineError::Io(e).with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PipelineError::Config("no datasets".to_string());
        assert_eq!(err.to_string(), "Configuration error: no datasets");
    }

    #[test]
    fn test_error_with_context() {
        let err = PipelineError::Merge("schema mismatch".to_string());
        let with_ctx = err.with_context("Failed to assemble final dataset");
        assert!(with_ctx.to_string().contains("Failed to assemble final dataset"));
        assert!(with_ctx.to_string().contains("schema mismatch"));
    }

    #[test]
    fn test_interrupted_survives_context() {
        let err = PipelineError::Interrupted.with_context("dataset a/b");
        assert!(err.is_interrupted());
        assert!(!PipelineError::NoDevices.is_interrupted());
    }

    #[test]
    fn test_io_result_context() {
        let res: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "missing",
        ));
        let err = res.context("opening shard").unwrap_err();
        assert!(err.to_string().starts_with("opening shard"));
    }
}
