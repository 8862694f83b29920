//! Bounded cooperative scheduler for gateway background work.

use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// Concurrency configuration for the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    max_concurrency: NonZeroUsize,
}

impl SchedulerConfig {
    /// Creates a configuration with the supplied concurrency limit.
    #[must_use]
    pub const fn new(max_concurrency: NonZeroUsize) -> Self {
        Self { max_concurrency }
    }

    /// Returns the configured concurrency limit.
    #[must_use]
    pub const fn max_concurrency(self) -> NonZeroUsize {
        self.max_concurrency
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(64).expect("non-zero"))
    }
}

/// Wrapper around `tokio::spawn` bounding gateway-wide background
/// concurrency (A2A workers, health ticks, janitors).
#[derive(Debug, Clone)]
pub struct TaskScheduler {
    permits: Arc<Semaphore>,
    active: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
    config: SchedulerConfig,
}

impl TaskScheduler {
    /// Constructs a scheduler from the supplied configuration.
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(config.max_concurrency().get())),
            active: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Returns the associated configuration.
    #[must_use]
    pub const fn config(&self) -> SchedulerConfig {
        self.config
    }

    /// Number of tasks currently holding a permit.
    #[must_use]
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Returns `true` once the scheduler stopped accepting tasks.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stops accepting new tasks. In-flight tasks run to completion.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Spawns a future once a concurrency permit is available.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Closed`] when the scheduler was closed
    /// before the task could be enqueued.
    pub fn spawn<F, T>(&self, future: F) -> SchedulerResult<JoinHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let permits = Arc::clone(&self.permits);
        let active = Arc::clone(&self.active);
        let handle = tokio::spawn(async move {
            // The semaphore is never closed, so acquisition only fails if
            // the runtime is shutting down; the task is dropped with it.
            let _permit = permits.acquire_owned().await;
            active.fetch_add(1, Ordering::AcqRel);
            let output = future.await;
            active.fetch_sub(1, Ordering::AcqRel);
            output
        });
        Ok(handle)
    }
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

/// Errors produced by the scheduler.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    /// Scheduler is closed and will not accept new tasks.
    #[error("scheduler closed")]
    Closed,
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn bounds_concurrent_tasks() {
        let scheduler = TaskScheduler::new(SchedulerConfig::new(NonZeroUsize::new(2).unwrap()));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let scheduler_ref = scheduler.clone();
            let peak = Arc::clone(&peak);
            let inner = scheduler.clone();
            handles.push(
                scheduler_ref
                    .spawn(async move {
                        peak.fetch_max(inner.active(), Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    })
                    .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn close_rejects_new_tasks() {
        let scheduler = TaskScheduler::default();
        scheduler.close();
        assert_eq!(
            scheduler.spawn(async {}).unwrap_err(),
            SchedulerError::Closed
        );
    }
}
