//! Encoder worker threads
//!
//! One worker per device. A worker loads the codec model onto its device,
//! then drains the work queue until it receives its shutdown marker:
//!
//! 1. `get` the next message; a [`QueueMessage::Shutdown`] ends the loop
//! 2. encode the waveform on the worker's device
//! 3. flatten the four token layers and assemble an [`EncodedRecord`]
//! 4. append the record through the worker's own [`RotatingWriter`]
//!
//! A failure in steps 2-4 drops that one item: it is logged, the worker
//! pauses for the configured backoff, and the loop continues. Anything else
//! (model load failure, a lost encoder, disconnected queue, interrupt) ends
//! the worker and leaves the remaining items to the other workers. The writer
//! is closed on every exit path.

use crate::encoder::{AudioEncoder, EncoderBackend};
use crate::error::{PipelineError, Result};
use crate::queue::{QueueConsumer, QueueMessage};
use crate::types::{EncodedRecord, WorkItem, WorkerReport};
use crate::writer::RotatingWriter;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

/// One encoder worker's state
pub struct EncoderWorker {
    rank: usize,
    model_id: String,
    consumer: QueueConsumer,
    writer: RotatingWriter,
    cancel: Arc<AtomicBool>,
    error_backoff: Duration,
    report: WorkerReport,
}

impl EncoderWorker {
    pub fn new(
        rank: usize,
        model_id: impl Into<String>,
        consumer: QueueConsumer,
        writer: RotatingWriter,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            rank,
            model_id: model_id.into(),
            consumer,
            writer,
            cancel,
            error_backoff: Duration::from_secs(1),
            report: WorkerReport {
                rank,
                ..Default::default()
            },
        }
    }

    /// Builder method to set the pause after a failed item
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Load the model for this worker's device and drain the queue
    pub fn run(self, backend: &dyn EncoderBackend) -> WorkerReport {
        match backend.load(self.rank, &self.model_id) {
            Ok(encoder) => {
                tracing::info!(
                    "Worker {} loaded {} on {} device {}",
                    self.rank,
                    self.model_id,
                    backend.name(),
                    self.rank
                );
                self.run_with(encoder)
            }
            Err(e) => {
                tracing::error!("Worker {} failed to load the encoder: {}", self.rank, e);
                self.finish(Err(e))
            }
        }
    }

    /// Drain the queue with an already loaded encoder
    pub fn run_with(mut self, mut encoder: Box<dyn AudioEncoder>) -> WorkerReport {
        let outcome = self.drain(encoder.as_mut());
        self.finish(outcome)
    }

    fn drain(&mut self, encoder: &mut dyn AudioEncoder) -> Result<()> {
        loop {
            match self.consumer.get(&self.cancel)? {
                QueueMessage::Shutdown => {
                    self.report.received_shutdown = true;
                    return Ok(());
                }
                QueueMessage::Item(item) => {
                    let preview = item.text_preview();
                    match self.process(encoder, item) {
                        Ok(()) => self.report.processed += 1,
                        Err(e) if e.is_encoder_lost() => {
                            self.report.failed += 1;
                            return Err(e);
                        }
                        Err(e) => {
                            self.report.failed += 1;
                            tracing::error!(
                                "Worker {} failed on '{}': {}",
                                self.rank,
                                preview,
                                e
                            );
                            if !self.error_backoff.is_zero() {
                                std::thread::sleep(self.error_backoff);
                            }
                        }
                    }
                }
            }
        }
    }

    fn process(&mut self, encoder: &mut dyn AudioEncoder, item: WorkItem) -> Result<()> {
        let encoded = encoder.encode(&item.waveform)?;
        let ([layer_1, layer_2, layer_3, layer_4], encoded_len) = encoded.into_flat_layers()?;
        let record = EncodedRecord {
            text: item.text,
            layer_1,
            layer_2,
            layer_3,
            layer_4,
            encoded_len,
            speaker: item.speaker,
            constants: item.constants,
        };
        self.writer.write(&record)
    }

    fn finish(mut self, outcome: Result<()>) -> WorkerReport {
        let mut error = outcome.err();
        if let Err(e) = self.writer.close() {
            tracing::error!("Worker {} failed to close its output: {}", self.rank, e);
            error.get_or_insert(e);
        }
        self.report.files = self.writer.files_written();

        match &error {
            None => tracing::info!(
                "Worker {} finished: {} processed, {} failed, {} files",
                self.rank,
                self.report.processed,
                self.report.failed,
                self.report.files
            ),
            Some(PipelineError::Interrupted) => {
                tracing::warn!("Worker {} interrupted", self.rank)
            }
            Some(e) => tracing::error!("Worker {} stopped: {}", self.rank, e),
        }

        self.report.error = error.map(|e| e.to_string());
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::{EncodedAudio, MockAudioEncoder, SimulatedBackend, TokenTensor};
    use crate::queue::WorkQueue;
    use crate::writer::read_shard;
    use std::sync::atomic::Ordering;

    fn encoded(len: usize) -> EncodedAudio {
        EncodedAudio {
            layers: (0..4)
                .map(|l| TokenTensor {
                    shape: vec![1, len],
                    data: vec![l as i64; len],
                })
                .collect(),
            encoded_len: len as i64,
        }
    }

    struct Harness {
        dir: tempfile::TempDir,
        queue: WorkQueue,
        cancel: Arc<AtomicBool>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                dir: tempfile::tempdir().unwrap(),
                queue: WorkQueue::new(16),
                cancel: Arc::new(AtomicBool::new(false)),
            }
        }

        fn worker(&self, lines_per_file: u64) -> EncoderWorker {
            let writer = RotatingWriter::new(self.dir.path(), "ds", 0, 6, 4096, lines_per_file);
            EncoderWorker::new(0, "model", self.queue.consumer(), writer, self.cancel.clone())
                .with_error_backoff(Duration::ZERO)
        }

        fn put(&self, msg: QueueMessage) {
            self.queue.producer().put(msg, &self.cancel).unwrap();
        }
    }

    #[test]
    fn test_worker_writes_records_until_shutdown() {
        let h = Harness::new();
        let mut encoder = MockAudioEncoder::new();
        encoder.expect_encode().times(3).returning(|w| Ok(encoded(w.len())));

        for i in 0..3 {
            h.put(QueueMessage::Item(
                WorkItem::new(format!("t{}", i), vec![0.0; i + 1]).with_constant("lang", "en"),
            ));
        }
        h.put(QueueMessage::Shutdown);

        let report = h.worker(2).run_with(Box::new(encoder));
        assert!(report.received_shutdown);
        assert_eq!(report.processed, 3);
        assert_eq!(report.files, 2);
        assert!(report.error.is_none());

        let first: Vec<_> = read_shard(h.dir.path().join("ds-worker00-00000.jsonl.gz"))
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[1].text, "t1");
        assert_eq!(first[1].layer_4, vec![3, 3]);
        assert_eq!(first[1].constants["lang"], "en");
    }

    #[test]
    fn test_per_item_failure_is_isolated() {
        let h = Harness::new();
        let mut encoder = MockAudioEncoder::new();
        encoder.expect_encode().returning(|w| {
            if w.is_empty() {
                Err(PipelineError::Encode("empty waveform".to_string()))
            } else {
                Ok(encoded(1))
            }
        });

        h.put(QueueMessage::Item(WorkItem::new("a", vec![0.1])));
        h.put(QueueMessage::Item(WorkItem::new("b", Vec::new())));
        h.put(QueueMessage::Item(WorkItem::new("c", vec![0.1])));
        h.put(QueueMessage::Shutdown);

        let report = h.worker(10).run_with(Box::new(encoder));
        assert_eq!(report.processed, 2);
        assert_eq!(report.failed, 1);
        assert!(report.error.is_none());
    }

    #[test]
    fn test_lost_encoder_ends_worker() {
        let h = Harness::new();
        let mut encoder = MockAudioEncoder::new();
        let mut calls = 0;
        encoder.expect_encode().times(2).returning(move |_| {
            calls += 1;
            if calls == 1 {
                Ok(encoded(1))
            } else {
                Err(PipelineError::EncoderLost("process exited".to_string()))
            }
        });

        for i in 0..6 {
            h.put(QueueMessage::Item(WorkItem::new(format!("t{}", i), vec![0.1])));
        }
        h.put(QueueMessage::Shutdown);

        let report = h
            .worker(10)
            .with_error_backoff(Duration::from_secs(60))
            .run_with(Box::new(encoder));
        assert_eq!(report.processed, 1);
        assert_eq!(report.failed, 1);
        assert!(report.error.unwrap().contains("process exited"));
        assert!(!report.received_shutdown);
        // Four items and the marker are left for the other workers
        assert_eq!(h.queue.consumer().len(), 5);
        assert_eq!(report.files, 1);
    }

    #[test]
    fn test_wrong_layer_count_drops_item() {
        let h = Harness::new();
        let mut encoder = MockAudioEncoder::new();
        encoder.expect_encode().returning(|_| {
            Ok(EncodedAudio {
                layers: vec![TokenTensor::flat(vec![1])],
                encoded_len: 1,
            })
        });
        h.put(QueueMessage::Item(WorkItem::new("a", vec![0.1])));
        h.put(QueueMessage::Shutdown);

        let report = h.worker(10).run_with(Box::new(encoder));
        assert_eq!(report.failed, 1);
        assert_eq!(report.files, 0);
    }

    #[test]
    fn test_load_failure_is_top_level() {
        let h = Harness::new();
        let backend = SimulatedBackend::new(0, 4);
        let report = h.worker(10).run(&backend);
        assert!(report.error.is_some());
        assert!(!report.received_shutdown);
    }

    #[test]
    fn test_cancel_stops_idle_worker() {
        let h = Harness::new();
        h.cancel.store(true, Ordering::SeqCst);
        let report = h.worker(10).run(&SimulatedBackend::new(1, 4));
        assert_eq!(report.error.as_deref(), Some("Interrupted"));
    }

    #[test]
    fn test_stops_at_first_marker() {
        let h = Harness::new();
        h.put(QueueMessage::Item(WorkItem::new("a", vec![0.1])));
        h.put(QueueMessage::Shutdown);
        h.put(QueueMessage::Item(WorkItem::new("b", vec![0.1])));

        let report = h.worker(10).run(&SimulatedBackend::new(1, 4));
        assert_eq!(report.processed, 1);
        assert_eq!(h.queue.consumer().len(), 1);
    }
}
