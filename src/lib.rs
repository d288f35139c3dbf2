//! # codecpack-rs: multi-device audio codec tokenization
//!
//! Streams audio+text datasets through a pool of codec encoder devices and
//! writes the resulting token layers as rotated gzip JSON-lines shards, then
//! merges every shard into one dataset.
//!
//! ## Architecture
//!
//! ```text
//! source shard -> reader thread -> work queue -> encoder worker -> rotating writer
//!                                                                    |
//!                                         final merge <- output dir <-+
//! ```
//!
//! - **Readers**: one thread per source shard, mapping records to work items
//! - **Work queue**: bounded crossbeam channel; backpressure bounds memory
//! - **Encoder workers**: one thread per device, each with its own writer
//! - **Orchestration**: datasets run one at a time; markers follow readers
//!
//! ## Example
//!
//! ```ignore
//! use codecpack_rs::{
//!     config::PipelineConfig,
//!     encoder::build_backend,
//!     orchestrator::Pipeline,
//!     source::ManifestLoader,
//! };
//!
//! fn main() -> codecpack_rs::Result<()> {
//!     let config = PipelineConfig::load("config.toml")?;
//!     let backend = build_backend(&config.encoder)?;
//!     let pipeline = Pipeline::new(config, Box::new(ManifestLoader::new()), backend);
//!     let summary = pipeline.run()?;
//!     println!("{} rows", summary.merged_rows);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod merge;
pub mod orchestrator;
pub mod queue;
pub mod reader;
pub mod source;
pub mod types;
pub mod worker;
pub mod writer;

// Re-export commonly used types
pub use config::{DatasetConfig, PipelineConfig};
pub use error::{PipelineError, Result};
pub use orchestrator::{DatasetOrchestrator, Pipeline, PipelineSummary};
pub use queue::{QueueMessage, WorkQueue};
pub use types::{DatasetStats, EncodedRecord, WorkItem};
pub use writer::RotatingWriter;
