//! FIFO job queue shared between submitters and one background consumer.
//!
//! Submitting never blocks: a bounded queue that is full rejects the payload
//! with [`ChatmemError::QueueFull`] and counts it as dropped. Consumers either
//! block on a condvar (thread worker) or await a `Notify` (task worker).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use crate::error::{ChatmemError, Result};

/// Thread-safe job queue. Clones share the same queue.
pub struct JobQueue<T> {
    inner: Arc<JobQueueInner<T>>,
}

struct JobQueueInner<T> {
    name: String,
    state: Mutex<QueueState<T>>,
    available: Condvar,
    notify: Notify,
}

struct QueueState<T> {
    items: VecDeque<T>,
    max_len: usize,
    total_enqueued: u64,
    total_dropped: u64,
}

/// Statistics about a job queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    /// Current queue depth.
    pub depth: usize,
    /// Total payloads accepted.
    pub total_enqueued: u64,
    /// Total payloads rejected because the queue was full.
    pub total_dropped: u64,
}

impl<T> JobQueue<T> {
    /// Create a queue. `max_len == 0` means unbounded.
    #[must_use]
    pub fn new(name: impl Into<String>, max_len: usize) -> Self {
        Self {
            inner: Arc::new(JobQueueInner {
                name: name.into(),
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    max_len,
                    total_enqueued: 0,
                    total_dropped: 0,
                }),
                available: Condvar::new(),
                notify: Notify::new(),
            }),
        }
    }

    /// Name used in errors and logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Append a payload without blocking.
    ///
    /// # Errors
    /// Returns `ChatmemError::QueueFull` if the queue is bounded and full. The
    /// payload is dropped.
    pub fn push(&self, item: T) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.max_len > 0 && state.items.len() >= state.max_len {
                state.total_dropped += 1;
                return Err(ChatmemError::QueueFull {
                    worker: self.inner.name.clone(),
                    capacity: state.max_len,
                });
            }
            state.items.push_back(item);
            state.total_enqueued += 1;
        }
        self.inner.available.notify_one();
        self.inner.notify.notify_one();
        Ok(())
    }

    /// Remove the oldest payload, if any.
    pub fn pop(&self) -> Option<T> {
        self.inner.state.lock().items.pop_front()
    }

    /// Block up to `timeout` for a payload.
    ///
    /// May return `None` early when [`JobQueue::wake_all`] is called.
    pub fn wait_pop(&self, timeout: Duration) -> Option<T> {
        let mut state = self.inner.state.lock();
        if state.items.is_empty() {
            let _ = self.inner.available.wait_for(&mut state, timeout);
        }
        state.items.pop_front()
    }

    /// Wait until the queue holds at least one payload.
    pub async fn item_available(&self) {
        loop {
            if !self.is_empty() {
                return;
            }
            self.inner.notify.notified().await;
        }
    }

    /// Take every queued payload, oldest first.
    pub fn drain(&self) -> Vec<T> {
        self.inner.state.lock().items.drain(..).collect()
    }

    /// Wake every blocked consumer.
    pub fn wake_all(&self) {
        self.inner.available.notify_all();
        self.inner.notify.notify_waiters();
    }

    /// Current queue depth.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().items.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().items.is_empty()
    }

    /// Configured capacity; 0 means unbounded.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.state.lock().max_len
    }

    /// Get queue statistics.
    #[must_use]
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        QueueStats {
            depth: state.items.len(),
            total_enqueued: state.total_enqueued,
            total_dropped: state.total_dropped,
        }
    }
}

impl<T> Clone for JobQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}
