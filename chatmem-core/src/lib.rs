//! # chatmem core
//!
//! Bounded, self-managing memory for long-running conversations.
//!
//! A conversation keeps a short window of recent turns. When the window
//! overflows, the older turns are folded into a running summary by a
//! background worker, and durable facts about the user are extracted into a
//! long-term store where they decay unless they keep being recalled.
//!
//! - [`lock`]: per-session mutual exclusion, sync and async, with entries
//!   reclaimed as soon as nobody holds or waits on them
//! - [`worker`]: debounced, merging batch workers on a thread or a tokio task
//! - [`window`]: the short-term window and its compaction patch
//! - [`long_term`]: decay-scored facts over a [`SemanticIndex`]
//! - [`persistence`]: versioned per-session context rows in SQLite
//!
//! Nothing here talks to an LLM directly. Summarization goes through the
//! [`Summarizer`] trait so callers choose the provider.

#![deny(clippy::unwrap_used)]
#![deny(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod decay;
pub mod error;
pub mod index;
pub mod lock;
pub mod long_term;
pub mod metrics;
pub mod observer;
pub mod persistence;
pub mod summarizer;
pub mod types;
pub mod window;
pub mod worker;

pub use config::ChatmemConfig;
pub use error::{ChatmemError, Result};
pub use index::{InMemoryIndex, IndexedItem, SemanticIndex, SqliteIndex};
pub use lock::{AsyncKeyedGuard, AsyncKeyedLock, KeyedGuard, KeyedLock};
pub use long_term::{ConsolidationOutcome, LongTermMemory, PutOutcome};
pub use metrics::MetricsObserver;
pub use observer::{Observer, SharedObserver};
pub use persistence::ContextStore;
pub use summarizer::Summarizer;
pub use types::*;
pub use window::{ShortTermWindow, WindowPatch};
pub use worker::{
    AsyncBatchHandler, AsyncWorker, BackgroundWorker, BatchHandler, JobQueue, WorkerOptions,
};
