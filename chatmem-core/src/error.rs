//! Error types for the chatmem core library.

use thiserror::Error;

/// Top-level error type for all chatmem core operations.
#[derive(Error, Debug)]
pub enum ChatmemError {
    /// SQLite persistence error.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Serialization or deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The summarization collaborator failed. Never retried at this layer.
    #[error("Summarizer failed: {0}")]
    Summarizer(String),

    /// The semantic search backend failed.
    #[error("Semantic index error: {0}")]
    Index(String),

    /// A bounded worker queue rejected a payload instead of blocking the submitter.
    #[error("Queue for worker '{worker}' is full (capacity: {capacity})")]
    QueueFull {
        /// Worker name.
        worker: String,
        /// Configured queue capacity.
        capacity: usize,
    },

    /// A worker did not stop within the requested timeout. The worker thread or
    /// task is leaked, so callers must surface this.
    #[error("Worker '{worker}' did not stop within {timeout_ms}ms")]
    StopTimeout {
        /// Worker name.
        worker: String,
        /// The timeout that was exceeded.
        timeout_ms: u64,
    },

    /// A batch handler panicked.
    #[error("Worker '{worker}' panicked: {message}")]
    WorkerPanic {
        /// Worker name.
        worker: String,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// Short-term window parameters would never shrink the window.
    #[error("Invalid window: keep ({keep}) must be smaller than threshold ({threshold})")]
    InvalidWindow {
        /// Overflow threshold.
        threshold: usize,
        /// Number of turns kept after compaction.
        keep: usize,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ChatmemError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Convenience Result type alias.
pub type Result<T> = std::result::Result<T, ChatmemError>;
