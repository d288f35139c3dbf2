//! Run orchestration
//!
//! - [`DatasetOrchestrator`] - one dataset: shard, spawn, join, shut down
//! - [`Pipeline`] - every dataset in turn, then the final merge and export
//!
//! Threads are joined by polling so the orchestrator keeps observing the
//! interrupt flag while it waits.

pub mod dataset;
pub mod pipeline;

pub use dataset::DatasetOrchestrator;
pub use pipeline::{Pipeline, PipelineSummary};

use crate::error::{Result, ResultExt};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often waiting joins re-check the interrupt flag
pub const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A group of named threads of the same kind
pub(crate) struct ThreadSet<T> {
    kind: &'static str,
    handles: Vec<(usize, JoinHandle<T>)>,
}

impl<T: Send + 'static> ThreadSet<T> {
    pub(crate) fn new(kind: &'static str) -> Self {
        Self {
            kind,
            handles: Vec::new(),
        }
    }

    /// Spawn thread `id`, named `<kind>-<id>`
    pub(crate) fn spawn<F>(&mut self, id: usize, f: F) -> Result<()>
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let handle = thread::Builder::new()
            .name(format!("{}-{:02}", self.kind, id))
            .spawn(f)
            .with_context(|| format!("spawning {} thread {}", self.kind, id))?;
        self.handles.push((id, handle));
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.len()
    }

    pub(crate) fn all_finished(&self) -> bool {
        self.handles.iter().all(|(_, h)| h.is_finished())
    }

    pub(crate) fn running(&self) -> usize {
        self.handles.iter().filter(|(_, h)| !h.is_finished()).count()
    }

    /// Join every thread; a panicked thread yields `Err(id)`
    pub(crate) fn join(self) -> Vec<std::result::Result<T, usize>> {
        self.handles
            .into_iter()
            .map(|(id, handle)| {
                handle.join().map_err(|_| {
                    tracing::error!("{} {} panicked", self.kind, id);
                    id
                })
            })
            .collect()
    }

    /// Join only the threads that already exited; the rest stay detached
    pub(crate) fn join_finished(self) -> usize {
        let mut abandoned = 0;
        for (id, handle) in self.handles {
            if handle.is_finished() {
                if handle.join().is_err() {
                    tracing::error!("{} {} panicked", self.kind, id);
                }
            } else {
                abandoned += 1;
            }
        }
        abandoned
    }
}

/// Wait until `done` returns true or `deadline` passes
pub(crate) fn wait_until(deadline: Instant, mut done: impl FnMut() -> bool) -> bool {
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_set_joins_results() {
        let mut set = ThreadSet::new("test");
        for i in 0..3 {
            set.spawn(i, move || i * 10).unwrap();
        }
        assert_eq!(set.len(), 3);
        let results = set.join();
        assert_eq!(results, vec![Ok(0), Ok(10), Ok(20)]);
    }

    #[test]
    fn test_thread_set_reports_panic() {
        let mut set: ThreadSet<()> = ThreadSet::new("test");
        set.spawn(7, || panic!("boom")).unwrap();
        assert_eq!(set.join(), vec![Err(7)]);
    }

    #[test]
    fn test_wait_until_times_out() {
        let deadline = Instant::now() + Duration::from_millis(120);
        assert!(!wait_until(deadline, || false));
        assert!(wait_until(Instant::now(), || true));
    }

    #[test]
    fn test_join_finished_leaves_running_threads() {
        let (tx, rx) = crossbeam_channel::bounded::<()>(0);
        let mut set = ThreadSet::new("test");
        set.spawn(0, || ()).unwrap();
        set.spawn(1, move || {
            let _ = rx.recv();
        })
        .unwrap();
        wait_until(Instant::now() + Duration::from_secs(5), || set.running() == 1);
        assert_eq!(set.join_finished(), 1);
        drop(tx);
    }
}
