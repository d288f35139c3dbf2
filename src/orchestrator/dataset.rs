//! Processing of a single dataset
//!
//! The protocol, in order:
//!
//! 1. shard the source into `num_readers` disjoint, ordered shards
//! 2. start one encoder worker per device on the shared queue
//! 3. start one reader per shard
//! 4. wait for every reader
//! 5. enqueue exactly one shutdown marker per worker
//! 6. wait for every worker
//! 7. report statistics for the dataset's output files
//!
//! Markers go in only after all readers are joined. The queue is FIFO across
//! producers, so every item is ahead of every marker and no worker can stop
//! while items are still pending.

use super::{wait_until, ThreadSet, JOIN_POLL_INTERVAL};
use crate::config::{format_file_size, BaseSettings, DatasetConfig};
use crate::encoder::EncoderBackend;
use crate::error::{PipelineError, Result, ResultExt};
use crate::queue::{QueueError, WorkQueue};
use crate::reader::ReaderWorker;
use crate::source::DataSource;
use crate::types::{DatasetStats, ReaderReport, WorkerReport};
use crate::worker::EncoderWorker;
use crate::writer::{dataset_file_prefix, RotatingWriter, SHARD_SUFFIX};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Runs datasets one at a time against a fixed set of devices
pub struct DatasetOrchestrator {
    settings: BaseSettings,
    backend: Arc<dyn EncoderBackend>,
    /// Run-wide interrupt flag, raised by the signal handler
    interrupt: Arc<AtomicBool>,
}

struct Children {
    readers: ThreadSet<ReaderReport>,
    workers: ThreadSet<WorkerReport>,
    /// Stop flag seen by this dataset's threads
    stop: Arc<AtomicBool>,
}

impl DatasetOrchestrator {
    pub fn new(
        settings: BaseSettings,
        backend: Arc<dyn EncoderBackend>,
        interrupt: Arc<AtomicBool>,
    ) -> Self {
        Self {
            settings,
            backend,
            interrupt,
        }
    }

    fn interrupted(&self) -> bool {
        self.interrupt.load(Ordering::SeqCst)
    }

    /// Process one dataset end to end
    pub fn run(&self, dataset: &DatasetConfig, source: &dyn DataSource) -> Result<DatasetStats> {
        let started = Instant::now();
        let prefix = dataset.dataset_prefix().to_string();
        let num_readers = self.settings.num_readers.max(1);
        let num_workers = self.backend.device_count();
        if num_workers == 0 {
            return Err(PipelineError::NoDevices);
        }

        tracing::info!(
            "Processing {}: {} records, {} readers, {} workers, queue size {}",
            dataset.describe(),
            source.len(),
            num_readers,
            num_workers,
            self.settings.qsize
        );

        let shards = (0..num_readers)
            .map(|i| source.shard(num_readers, i))
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("sharding {}", dataset.name))?;

        let (producer, consumer) = WorkQueue::new(self.settings.qsize).split();
        let mut children = Children {
            readers: ThreadSet::new("reader"),
            workers: ThreadSet::new("encoder"),
            stop: Arc::new(AtomicBool::new(false)),
        };

        for rank in 0..num_workers {
            let writer = RotatingWriter::new(
                &self.settings.out_dir,
                prefix.as_str(),
                rank,
                self.settings.gzip_level,
                self.settings.buffer_size,
                self.settings.lines_per_file,
            );
            let worker = EncoderWorker::new(
                rank,
                self.settings.model_id.as_str(),
                consumer.clone(),
                writer,
                children.stop.clone(),
            )
            .with_error_backoff(Duration::from_millis(self.settings.error_backoff_ms));
            let backend = self.backend.clone();
            if let Err(e) = children.workers.spawn(rank, move || worker.run(backend.as_ref())) {
                return Err(self.abort(children, e));
            }
        }
        // Only the workers hold receivers, so dead workers surface as a
        // disconnected queue instead of a hang.
        drop(consumer);

        for (id, shard) in shards.into_iter().enumerate() {
            let reader = ReaderWorker::new(
                id,
                dataset.clone(),
                shard,
                producer.clone(),
                children.stop.clone(),
            )
            .with_progress_interval(self.settings.progress_interval)
            .with_sample_rate(self.settings.sample_rate);
            if let Err(e) = children.readers.spawn(id, move || reader.run()) {
                return Err(self.abort(children, e));
            }
        }

        if !self.wait(&children, |c| c.readers.all_finished()) {
            return Err(self.abort(children, PipelineError::Interrupted));
        }
        let reader_reports = collect(children.readers.join(), |id| ReaderReport {
            reader_id: id,
            error: Some("panicked".to_string()),
            ..Default::default()
        });
        children.readers = ThreadSet::new("reader");

        // Markers can block on a full queue behind a slow encoder; keep
        // watching for an interrupt while they go in.
        let marked = producer.shutdown_all_unless(num_workers, || {
            self.interrupted() || children.stop.load(Ordering::SeqCst)
        });
        match marked {
            Ok(sent) => tracing::debug!("Sent {} shutdown markers", sent),
            Err(QueueError::Disconnected) => {
                tracing::warn!("Every encoder worker of {} has already exited", prefix)
            }
            Err(QueueError::Cancelled) => {
                return Err(self.abort(children, PipelineError::Interrupted));
            }
        }
        drop(producer);

        if !self.wait(&children, |c| c.workers.all_finished()) {
            return Err(self.abort(children, PipelineError::Interrupted));
        }
        let worker_reports = collect(children.workers.join(), |rank| WorkerReport {
            rank,
            error: Some("panicked".to_string()),
            ..Default::default()
        });

        let (files, total_bytes) = output_stats(&self.settings.out_dir, &prefix)?;
        let stats = DatasetStats {
            dataset: dataset.name.clone(),
            items_produced: reader_reports.iter().map(|r| r.produced).sum(),
            items_encoded: worker_reports.iter().map(|r| r.processed).sum(),
            items_failed: worker_reports.iter().map(|r| r.failed).sum(),
            readers_failed: reader_reports.iter().filter(|r| r.error.is_some()).count(),
            workers_failed: worker_reports.iter().filter(|r| r.error.is_some()).count(),
            files,
            total_bytes,
            elapsed: started.elapsed(),
        };
        log_stats(&stats);
        Ok(stats)
    }

    /// Poll until `done`, returning false if the run was interrupted first
    fn wait(&self, children: &Children, done: impl Fn(&Children) -> bool) -> bool {
        while !done(children) {
            if self.interrupted() {
                return false;
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }
        true
    }

    /// Stop every child, wait up to the grace period, and hand back `error`
    fn abort(&self, children: Children, error: PipelineError) -> PipelineError {
        tracing::warn!(
            "Stopping {} readers and {} workers",
            children.readers.running(),
            children.workers.running()
        );
        children.stop.store(true, Ordering::SeqCst);

        let grace = Duration::from_secs(self.settings.shutdown_grace_secs);
        wait_until(Instant::now() + grace, || {
            children.readers.all_finished() && children.workers.all_finished()
        });

        let abandoned = children.readers.join_finished() + children.workers.join_finished();
        if abandoned > 0 {
            tracing::warn!("{} threads still running after {:?}", abandoned, grace);
        } else {
            tracing::info!("All threads stopped");
        }
        error
    }
}

fn collect<T>(
    results: Vec<std::result::Result<T, usize>>,
    on_panic: impl Fn(usize) -> T,
) -> Vec<T> {
    results
        .into_iter()
        .map(|r| r.unwrap_or_else(&on_panic))
        .collect()
}

/// Count and size the files in `out_dir` that belong to dataset `prefix`
pub fn output_stats(out_dir: &Path, prefix: &str) -> Result<(usize, u64)> {
    let lead = dataset_file_prefix(prefix);
    let mut files = 0;
    let mut bytes = 0;
    let entries =
        std::fs::read_dir(out_dir).with_context(|| format!("listing {}", out_dir.display()))?;
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(&lead) && name.ends_with(SHARD_SUFFIX) {
            files += 1;
            bytes += entry.metadata()?.len();
        }
    }
    Ok((files, bytes))
}

fn log_stats(stats: &DatasetStats) {
    tracing::info!(
        "Dataset {} done in {:.1?}: {} queued, {} encoded, {} failed, {} files ({}), {:.1} items/s",
        stats.dataset,
        stats.elapsed,
        stats.items_produced,
        stats.items_encoded,
        stats.items_failed,
        stats.files,
        format_file_size(stats.total_bytes),
        stats.items_per_second()
    );
    if stats.readers_failed > 0 || stats.workers_failed > 0 {
        tracing::warn!(
            "Dataset {}: {} readers and {} workers ended with errors",
            stats.dataset,
            stats.readers_failed,
            stats.workers_failed
        );
    }
    let lost = stats.items_unaccounted();
    if lost > 0 {
        tracing::warn!("Dataset {}: {} queued items were never processed", stats.dataset, lost);
    }
}
