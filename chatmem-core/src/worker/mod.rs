//! Deferred batch execution off the request path.
//!
//! A worker owns one [`JobQueue`] and one handler. Its loop waits for a
//! payload, optionally debounces, drains everything queued, lets the handler
//! `merge` the batch, then `process`es it. A failing or panicking batch is
//! reported to the observer and the handler's `on_error`, its items are
//! dropped, and the loop moves on to the next batch. Batches never overlap.
//!
//! Two runtimes share this contract:
//! - [`BackgroundWorker`] runs on a dedicated OS thread.
//! - [`AsyncWorker`] runs as a tokio task.

pub mod queue;
pub mod task;
pub mod thread;

use std::any::Any;
use std::future::Future;
use std::time::Duration;

use tracing::error;

use crate::config::WorkerConfig;
use crate::error::{ChatmemError, Result};

pub use queue::{JobQueue, QueueStats};
pub use task::AsyncWorker;
pub use thread::BackgroundWorker;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-worker loop settings.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Worker name, used in logs, errors and observer events.
    pub name: String,
    /// Delay after the first payload before the batch is drained.
    pub debounce: Duration,
    /// How long an idle loop waits before re-checking for a stop request.
    pub poll_interval: Duration,
    /// Process queued payloads before `stop` returns.
    pub drain_on_stop: bool,
    /// Queue capacity; 0 means unbounded.
    pub max_queue: usize,
}

impl WorkerOptions {
    /// Defaults: no debounce, 500ms poll, drain on stop, unbounded.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            debounce: Duration::ZERO,
            poll_interval: Duration::from_millis(500),
            drain_on_stop: true,
            max_queue: 0,
        }
    }

    /// Options for `name` taken from the `[workers]` config section.
    #[must_use]
    pub fn from_config(name: impl Into<String>, config: &WorkerConfig) -> Self {
        Self {
            name: name.into(),
            debounce: config.debounce(),
            poll_interval: config.poll_interval(),
            drain_on_stop: config.drain_on_stop,
            max_queue: config.max_queue,
        }
    }

    /// Set the debounce delay.
    #[must_use]
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    /// Set the idle poll interval.
    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set whether `stop` drains the queue.
    #[must_use]
    pub fn drain_on_stop(mut self, drain: bool) -> Self {
        self.drain_on_stop = drain;
        self
    }

    /// Bound the queue.
    #[must_use]
    pub fn max_queue(mut self, max_queue: usize) -> Self {
        self.max_queue = max_queue;
        self
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Batch logic for a [`BackgroundWorker`].
pub trait BatchHandler<T>: Send + 'static {
    /// Handle one merged batch. Items keep submission order.
    ///
    /// # Errors
    /// Any error drops the batch; the worker keeps running.
    fn process(&mut self, batch: Vec<T>) -> Result<()>;

    /// Coalesce a drained batch before processing. Identity by default.
    fn merge(&mut self, batch: Vec<T>) -> Vec<T> {
        batch
    }

    /// Called after a batch of `items` merged payloads failed.
    fn on_error(&mut self, error: &ChatmemError, items: usize) {
        error!(%error, items, "background batch failed");
    }
}

type ProcessFn<T> = Box<dyn FnMut(Vec<T>) -> Result<()> + Send>;
type MergeFn<T> = Box<dyn FnMut(Vec<T>) -> Vec<T> + Send>;

/// [`BatchHandler`] built from closures.
pub struct FnHandler<T> {
    process: ProcessFn<T>,
    merge: Option<MergeFn<T>>,
}

impl<T> FnHandler<T> {
    /// Handler that runs `process` on every batch.
    pub fn new(process: impl FnMut(Vec<T>) -> Result<()> + Send + 'static) -> Self {
        Self {
            process: Box::new(process),
            merge: None,
        }
    }

    /// Add a merge step.
    #[must_use]
    pub fn with_merge(mut self, merge: impl FnMut(Vec<T>) -> Vec<T> + Send + 'static) -> Self {
        self.merge = Some(Box::new(merge));
        self
    }
}

impl<T: Send + 'static> BatchHandler<T> for FnHandler<T> {
    fn process(&mut self, batch: Vec<T>) -> Result<()> {
        (self.process)(batch)
    }

    fn merge(&mut self, batch: Vec<T>) -> Vec<T> {
        match self.merge.as_mut() {
            Some(merge) => merge(batch),
            None => batch,
        }
    }
}

/// Batch logic for an [`AsyncWorker`].
pub trait AsyncBatchHandler<T>: Send + 'static {
    /// Handle one merged batch. Items keep submission order.
    ///
    /// # Errors
    /// Any error drops the batch; the worker keeps running.
    fn process(&mut self, batch: Vec<T>) -> impl Future<Output = Result<()>> + Send;

    /// Coalesce a drained batch before processing. Identity by default.
    fn merge(&mut self, batch: Vec<T>) -> Vec<T> {
        batch
    }

    /// Called after a batch of `items` merged payloads failed.
    fn on_error(&mut self, error: &ChatmemError, items: usize) {
        error!(%error, items, "background batch failed");
    }
}

/// [`AsyncBatchHandler`] built from a closure returning a future.
pub struct AsyncFnHandler<F> {
    process: F,
}

impl<F> AsyncFnHandler<F> {
    /// Handler that awaits `process(batch)` on every batch.
    pub fn new(process: F) -> Self {
        Self { process }
    }
}

impl<T, F, Fut> AsyncBatchHandler<T> for AsyncFnHandler<F>
where
    T: Send + 'static,
    F: FnMut(Vec<T>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send,
{
    fn process(&mut self, batch: Vec<T>) -> impl Future<Output = Result<()>> + Send {
        (self.process)(batch)
    }
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
