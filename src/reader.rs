//! Reader threads: source shard to work queue
//!
//! Each reader owns one disjoint shard of the dataset. It maps every source
//! record to a [`WorkItem`] and pushes it onto the work queue, blocking while
//! the queue is full. The first error (a bad record, an undecodable waveform,
//! a disconnected queue) ends that reader's shard; items already queued stay
//! queued and the other readers are unaffected.

use crate::config::{DatasetConfig, DEFAULT_SAMPLE_RATE};
use crate::error::{PipelineError, Result, ResultExt};
use crate::queue::QueueProducer;
use crate::source::audio::decode_audio;
use crate::source::{RecordIter, SourceRecord};
use crate::types::{ReaderReport, WorkItem};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Map one source record to a work item using the dataset's column names
///
/// The waveform is resampled to `sample_rate` when the source states a
/// different rate.
pub fn prepare_item(
    dataset: &DatasetConfig,
    record: &SourceRecord,
    sample_rate: u32,
) -> Result<WorkItem> {
    let text = match record.get(&dataset.text_column_name) {
        Some(Value::String(text)) => text.clone(),
        Some(other) => {
            return Err(PipelineError::Source(format!(
                "text column '{}' is not a string: {}",
                dataset.text_column_name, other
            )))
        }
        None => return Err(missing_column(&dataset.text_column_name)),
    };

    let audio = record
        .get(&dataset.audio_column_name)
        .ok_or_else(|| missing_column(&dataset.audio_column_name))?;
    let waveform = decode_audio(audio, record.base_dir(), sample_rate)
        .with_context(|| format!("decoding audio for '{}'", text))?;

    let speaker = match &dataset.speaker_column_name {
        Some(column) => match record.get(column) {
            Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            Some(Value::Bool(b)) => Some(b.to_string()),
            Some(other) => {
                return Err(PipelineError::Source(format!(
                    "speaker column '{}' has unsupported value {}",
                    column, other
                )))
            }
            None => return Err(missing_column(column)),
        },
        None => None,
    };

    Ok(WorkItem {
        text,
        waveform,
        speaker,
        constants: dataset.constant_columns(),
    })
}

fn missing_column(column: &str) -> PipelineError {
    PipelineError::Source(format!("record has no column '{}'", column))
}

/// One reader thread's state
pub struct ReaderWorker {
    reader_id: usize,
    dataset: DatasetConfig,
    shard: RecordIter,
    producer: QueueProducer,
    cancel: Arc<AtomicBool>,
    progress_interval: u64,
    sample_rate: u32,
    produced: u64,
}

impl ReaderWorker {
    pub fn new(
        reader_id: usize,
        dataset: DatasetConfig,
        shard: RecordIter,
        producer: QueueProducer,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            reader_id,
            dataset,
            shard,
            producer,
            cancel,
            progress_interval: 1000,
            sample_rate: DEFAULT_SAMPLE_RATE,
            produced: 0,
        }
    }

    /// Builder method to set how often progress is logged
    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval.max(1);
        self
    }

    /// Builder method to set the model sample rate waveforms are resampled to
    pub fn with_sample_rate(mut self, sample_rate: u32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    /// Drain the shard into the queue and report how far it got
    pub fn run(mut self) -> ReaderReport {
        tracing::debug!("Reader {} started", self.reader_id);

        let outcome = self.drain();
        let error = match outcome {
            Ok(()) => {
                tracing::info!(
                    "Reader {} finished: {} items queued",
                    self.reader_id,
                    self.produced
                );
                None
            }
            Err(e) => {
                if e.is_interrupted() {
                    tracing::warn!(
                        "Reader {} interrupted after {} items",
                        self.reader_id,
                        self.produced
                    );
                } else {
                    tracing::error!(
                        "Reader {} stopped after {} items: {}",
                        self.reader_id,
                        self.produced,
                        e
                    );
                }
                Some(e.to_string())
            }
        };

        ReaderReport {
            reader_id: self.reader_id,
            produced: self.produced,
            error,
        }
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(record) = self.shard.next() {
            if self.cancel.load(Ordering::SeqCst) {
                return Err(PipelineError::Interrupted);
            }
            let item = prepare_item(&self.dataset, &record?, self.sample_rate)?;
            self.producer.put_item(item, &self.cancel)?;
            self.produced += 1;

            if self.produced % self.progress_interval == 0 {
                tracing::info!(
                    "Reader {}: {} items queued from {}",
                    self.reader_id,
                    self.produced,
                    self.dataset.name
                );
            }
        }
        Ok(())
    }
}
