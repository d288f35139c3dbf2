//! Bounded work queue between reader threads and encoder workers
//!
//! The queue is a `crossbeam-channel` bounded channel. Its capacity bounds the
//! number of decoded waveforms held in memory: `put` blocks while the queue is
//! full and `get` blocks while it is empty.
//!
//! # Shutdown protocol
//!
//! Shutdown is a distinct variant of the message type, [`QueueMessage::Shutdown`],
//! never a magic value. The dataset orchestrator enqueues exactly one marker
//! per encoder worker, and only after every reader has been joined. The
//! channel is a linearizable FIFO, so every item sent before the markers is
//! received before any marker by every consumer.
//!
//! # Cancellation
//!
//! Blocking calls wake every [`POLL_INTERVAL`] to check the shared interrupt
//! flag, so an interrupted run never stays parked on a full or empty queue.

use crate::types::WorkItem;
use crossbeam_channel::{
    bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// How often blocked queue calls re-check the interrupt flag
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A message on the work queue
#[derive(Debug, Clone, PartialEq)]
pub enum QueueMessage {
    /// A prepared record to encode
    Item(WorkItem),
    /// Stop marker; each worker consumes exactly one
    Shutdown,
}

/// Why a queue operation did not complete
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    /// The interrupt flag was raised while waiting
    #[error("queue operation cancelled")]
    Cancelled,
    /// Every peer on the other side of the queue is gone
    #[error("queue disconnected")]
    Disconnected,
}

impl From<QueueError> for crate::error::PipelineError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Cancelled => crate::error::PipelineError::Interrupted,
            QueueError::Disconnected => crate::error::PipelineError::Queue(err.to_string()),
        }
    }
}

/// The shared bounded queue.
///
/// Hand out [`QueueProducer`]s and [`QueueConsumer`]s, then drop the queue
/// itself so that disconnection is observable by both sides.
pub struct WorkQueue {
    tx: Sender<QueueMessage>,
    rx: Receiver<QueueMessage>,
    capacity: usize,
}

impl WorkQueue {
    /// Create a queue holding at most `capacity` messages (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = bounded(capacity);
        Self { tx, rx, capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Create a producer handle
    pub fn producer(&self) -> QueueProducer {
        QueueProducer {
            tx: self.tx.clone(),
        }
    }

    /// Create a consumer handle
    pub fn consumer(&self) -> QueueConsumer {
        QueueConsumer {
            rx: self.rx.clone(),
        }
    }

    /// Split into one producer and one consumer, dropping the queue's own ends
    pub fn split(self) -> (QueueProducer, QueueConsumer) {
        (QueueProducer { tx: self.tx }, QueueConsumer { rx: self.rx })
    }
}

/// Sending side of the work queue
#[derive(Clone)]
pub struct QueueProducer {
    tx: Sender<QueueMessage>,
}

impl QueueProducer {
    /// Enqueue a message, blocking while the queue is full
    pub fn put(&self, msg: QueueMessage, cancel: &AtomicBool) -> Result<(), QueueError> {
        self.put_unless(msg, || cancel.load(Ordering::SeqCst))
    }

    /// Enqueue a message, giving up once `cancelled` returns true
    ///
    /// `cancelled` is re-checked every [`POLL_INTERVAL`] while blocked.
    pub fn put_unless(
        &self,
        msg: QueueMessage,
        cancelled: impl Fn() -> bool,
    ) -> Result<(), QueueError> {
        let mut msg = msg;
        loop {
            if cancelled() {
                return Err(QueueError::Cancelled);
            }
            match self.tx.send_timeout(msg, POLL_INTERVAL) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(returned)) => msg = returned,
                Err(SendTimeoutError::Disconnected(_)) => return Err(QueueError::Disconnected),
            }
        }
    }

    /// Enqueue a work item
    pub fn put_item(&self, item: WorkItem, cancel: &AtomicBool) -> Result<(), QueueError> {
        self.put(QueueMessage::Item(item), cancel)
    }

    /// Enqueue `count` shutdown markers, returning how many were sent
    pub fn shutdown_all(&self, count: usize, cancel: &AtomicBool) -> Result<usize, QueueError> {
        self.shutdown_all_unless(count, || cancel.load(Ordering::SeqCst))
    }

    /// Like [`shutdown_all`](Self::shutdown_all), with an arbitrary cancel check
    pub fn shutdown_all_unless(
        &self,
        count: usize,
        cancelled: impl Fn() -> bool,
    ) -> Result<usize, QueueError> {
        for sent in 0..count {
            if let Err(e) = self.put_unless(QueueMessage::Shutdown, &cancelled) {
                tracing::warn!("Sent {} of {} shutdown markers: {}", sent, count, e);
                return Err(e);
            }
        }
        Ok(count)
    }

    /// Number of messages currently queued
    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

/// Receiving side of the work queue
#[derive(Clone)]
pub struct QueueConsumer {
    rx: Receiver<QueueMessage>,
}

impl QueueConsumer {
    /// Dequeue a message, blocking while the queue is empty
    pub fn get(&self, cancel: &AtomicBool) -> Result<QueueMessage, QueueError> {
        loop {
            if cancel.load(Ordering::SeqCst) {
                return Err(QueueError::Cancelled);
            }
            match self.rx.recv_timeout(POLL_INTERVAL) {
                Ok(msg) => return Ok(msg),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(QueueError::Disconnected),
            }
        }
    }

    /// Number of messages currently queued
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
