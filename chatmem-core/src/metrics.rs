//! Runtime metrics for the background workers and session locks.
//!
//! [`MetricsObserver`] plugs into the [`Observer`] hooks and maintains
//! lock-free `AtomicU64` counters that can be snapshotted at any time and
//! exported in Prometheus text format.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::ChatmemError;
use crate::observer::Observer;

// ---------------------------------------------------------------------------
// Counters (lock-free)
// ---------------------------------------------------------------------------

/// Atomic counters incremented on the hot path and read on export.
#[derive(Debug, Default)]
pub struct ChatmemCounters {
    /// Payloads accepted by any worker queue.
    pub jobs_submitted: AtomicU64,
    /// Batches processed successfully.
    pub batches_completed: AtomicU64,
    /// Batches that failed or panicked.
    pub batches_failed: AtomicU64,
    /// Merged items inside successful batches.
    pub items_processed: AtomicU64,
    /// Merged items dropped by failed batches.
    pub items_failed: AtomicU64,
    /// Times a caller had to wait for a session lock.
    pub lock_waits: AtomicU64,
    /// Session lock acquisitions.
    pub lock_acquisitions: AtomicU64,
}

impl ChatmemCounters {
    /// Create a new set of zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            jobs_submitted: AtomicU64::new(0),
            batches_completed: AtomicU64::new(0),
            batches_failed: AtomicU64::new(0),
            items_processed: AtomicU64::new(0),
            items_failed: AtomicU64::new(0),
            lock_waits: AtomicU64::new(0),
            lock_acquisitions: AtomicU64::new(0),
        }
    }

    /// Snapshot all counters for export.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            batches_completed: self.batches_completed.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            items_processed: self.items_processed.load(Ordering::Relaxed),
            items_failed: self.items_failed.load(Ordering::Relaxed),
            lock_waits: self.lock_waits.load(Ordering::Relaxed),
            lock_acquisitions: self.lock_acquisitions.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of counter values at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Payloads accepted by any worker queue.
    pub jobs_submitted: u64,
    /// Batches processed successfully.
    pub batches_completed: u64,
    /// Batches that failed or panicked.
    pub batches_failed: u64,
    /// Items inside successful batches.
    pub items_processed: u64,
    /// Items dropped by failed batches.
    pub items_failed: u64,
    /// Contended lock acquisitions.
    pub lock_waits: u64,
    /// All lock acquisitions.
    pub lock_acquisitions: u64,
}

impl CounterSnapshot {
    /// Format as Prometheus-compatible text.
    #[must_use]
    pub fn to_prometheus(&self) -> String {
        format!(
            "# HELP chatmem_jobs_submitted_total Payloads accepted by worker queues\n\
             # TYPE chatmem_jobs_submitted_total counter\n\
             chatmem_jobs_submitted_total {}\n\
             # HELP chatmem_batches_total Processed batches by outcome\n\
             # TYPE chatmem_batches_total counter\n\
             chatmem_batches_total{{outcome=\"completed\"}} {}\n\
             chatmem_batches_total{{outcome=\"failed\"}} {}\n\
             # HELP chatmem_items_total Merged batch items by outcome\n\
             # TYPE chatmem_items_total counter\n\
             chatmem_items_total{{outcome=\"processed\"}} {}\n\
             chatmem_items_total{{outcome=\"failed\"}} {}\n\
             # HELP chatmem_lock_waits_total Contended session lock acquisitions\n\
             # TYPE chatmem_lock_waits_total counter\n\
             chatmem_lock_waits_total {}\n\
             # HELP chatmem_lock_acquisitions_total Session lock acquisitions\n\
             # TYPE chatmem_lock_acquisitions_total counter\n\
             chatmem_lock_acquisitions_total {}\n",
            self.jobs_submitted,
            self.batches_completed,
            self.batches_failed,
            self.items_processed,
            self.items_failed,
            self.lock_waits,
            self.lock_acquisitions,
        )
    }
}

// ---------------------------------------------------------------------------
// Observer adapter
// ---------------------------------------------------------------------------

/// Observer that records every event into [`ChatmemCounters`].
#[derive(Debug, Default)]
pub struct MetricsObserver {
    counters: ChatmemCounters,
}

impl MetricsObserver {
    /// A fresh observer with zeroed counters.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            counters: ChatmemCounters::new(),
        }
    }

    /// The underlying counters.
    #[must_use]
    pub fn counters(&self) -> &ChatmemCounters {
        &self.counters
    }

    /// Snapshot the counters.
    #[must_use]
    pub fn snapshot(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }
}

impl Observer for MetricsObserver {
    fn on_job_submitted(&self, _worker: &str) {
        self.counters.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn on_job_completed(&self, _worker: &str, items: usize) {
        self.counters.batches_completed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .items_processed
            .fetch_add(items as u64, Ordering::Relaxed);
    }

    fn on_job_failed(&self, _worker: &str, _error: &ChatmemError, items: usize) {
        self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);
        self.counters
            .items_failed
            .fetch_add(items as u64, Ordering::Relaxed);
    }

    fn on_lock_wait(&self, _key: &str) {
        self.counters.lock_waits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_lock_acquired(&self, _key: &str) {
        self.counters.lock_acquisitions.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Tracing span names
// ---------------------------------------------------------------------------

/// Span names used with `tracing::span!`.
pub mod spans {
    /// One background batch.
    pub const WORKER_BATCH: &str = "chatmem::worker::batch";
    /// Short-term compaction of one session.
    pub const COMPRESS: &str = "chatmem::compress";
    /// Fact extraction for one session.
    pub const EXTRACT: &str = "chatmem::extract";
    /// Long-term prune + consolidate.
    pub const MAINTAIN: &str = "chatmem::maintain";
    /// Foreground turn under the session lock.
    pub const TURN: &str = "chatmem::turn";
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
