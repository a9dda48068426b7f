//! Telemetry callbacks invoked by the lock and worker primitives.
//!
//! Observers are purely informational: nothing they do can change how a lock
//! or a worker behaves. Every method has a no-op default, so an implementation
//! only overrides the events it cares about.

use std::sync::Arc;

use crate::error::ChatmemError;

/// Receives lifecycle events from [`crate::lock`] and [`crate::worker`].
///
/// Callbacks run inline on the thread or task that produced the event, so they
/// must be cheap and must not block.
pub trait Observer: Send + Sync {
    /// A payload was accepted by `worker`'s queue.
    fn on_job_submitted(&self, worker: &str) {
        let _ = worker;
    }

    /// A batch of `items` merged payloads was processed successfully.
    fn on_job_completed(&self, worker: &str, items: usize) {
        let _ = (worker, items);
    }

    /// A batch of `items` merged payloads failed (error or panic) and was dropped.
    fn on_job_failed(&self, worker: &str, error: &ChatmemError, items: usize) {
        let _ = (worker, error, items);
    }

    /// A caller started waiting on a key that another holder owns.
    fn on_lock_wait(&self, key: &str) {
        let _ = key;
    }

    /// A caller now holds the lock for `key`.
    fn on_lock_acquired(&self, key: &str) {
        let _ = key;
    }
}

/// Observer that ignores every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl Observer for NoopObserver {}

/// Shared observer handle as stored by locks and workers.
pub type SharedObserver = Arc<dyn Observer>;

/// Convenience constructor for the default observer.
#[must_use]
pub fn noop() -> SharedObserver {
    Arc::new(NoopObserver)
}

/// Fans every event out to several observers, in registration order.
#[derive(Clone, Default)]
pub struct ObserverSet {
    observers: Vec<SharedObserver>,
}

impl ObserverSet {
    /// An empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer.
    #[must_use]
    pub fn with(mut self, observer: SharedObserver) -> Self {
        self.observers.push(observer);
        self
    }

    /// Number of registered observers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether no observers are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl Observer for ObserverSet {
    fn on_job_submitted(&self, worker: &str) {
        for o in &self.observers {
            o.on_job_submitted(worker);
        }
    }

    fn on_job_completed(&self, worker: &str, items: usize) {
        for o in &self.observers {
            o.on_job_completed(worker, items);
        }
    }

    fn on_job_failed(&self, worker: &str, error: &ChatmemError, items: usize) {
        for o in &self.observers {
            o.on_job_failed(worker, error, items);
        }
    }

    fn on_lock_wait(&self, key: &str) {
        for o in &self.observers {
            o.on_lock_wait(key);
        }
    }

    fn on_lock_acquired(&self, key: &str) {
        for o in &self.observers {
            o.on_lock_acquired(key);
        }
    }
}
