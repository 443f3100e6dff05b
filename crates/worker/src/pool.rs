//! Bounded worker pool.
//!
//! Every submitted job gets its own tokio task immediately. The task then
//! waits for one of `size` semaphore permits; `tokio::sync::Semaphore` is
//! fair, so jobs start in the order their workers began waiting.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use lpe_core::error::CoreError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

#[derive(Debug, Default)]
struct Counters {
    queued: AtomicUsize,
    active: AtomicUsize,
}

/// Concurrency gate and task tracker for job workers.
pub struct WorkerPool {
    size: usize,
    max_queued: Option<usize>,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    counters: Arc<Counters>,
}

/// A reserved place in the queue. Released on drop.
#[derive(Debug)]
pub struct QueueTicket {
    counters: Arc<Counters>,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        self.counters.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The right to execute. Released on drop.
pub struct WorkerPermit {
    _permit: OwnedSemaphorePermit,
    counters: Arc<Counters>,
}

impl Drop for WorkerPermit {
    fn drop(&mut self) {
        self.counters.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    pub fn new(size: usize, max_queued: Option<usize>) -> Self {
        let size = size.max(1);
        Self {
            size,
            max_queued,
            semaphore: Arc::new(Semaphore::new(size)),
            tracker: TaskTracker::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Reserve a queue slot, failing with `CapacityExceeded` when the
    /// queue limit is reached.
    pub fn try_reserve(&self) -> Result<QueueTicket, CoreError> {
        let limit = self.max_queued.unwrap_or(usize::MAX);
        self.counters
            .queued
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| (q < limit).then_some(q + 1))
            .map_err(|queued| CoreError::CapacityExceeded { queued })?;
        Ok(QueueTicket {
            counters: Arc::clone(&self.counters),
        })
    }

    /// Reserve a queue slot regardless of the queue limit.
    pub fn reserve(&self) -> QueueTicket {
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        QueueTicket {
            counters: Arc::clone(&self.counters),
        }
    }

    /// Wait for an execution permit. Returns `None` if `cancel` fires first.
    pub async fn acquire(
        &self,
        ticket: QueueTicket,
        cancel: &CancellationToken,
    ) -> Option<WorkerPermit> {
        let permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return None,
            permit = Arc::clone(&self.semaphore).acquire_owned() => permit.ok()?,
        };
        self.counters.active.fetch_add(1, Ordering::SeqCst);
        drop(ticket);
        Some(WorkerPermit {
            _permit: permit,
            counters: Arc::clone(&self.counters),
        })
    }

    /// Run `task` as a tracked worker.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Stop accepting tracked tasks; [`wait`](Self::wait) then completes
    /// once the running ones finish.
    pub fn close(&self) {
        self.tracker.close();
    }

    pub async fn wait(&self) {
        self.tracker.wait().await;
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn queued(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    pub fn active(&self) -> usize {
        self.counters.active.load(Ordering::SeqCst)
    }
}
