//! Background job payload.

use std::collections::BTreeMap;

use chatmem_core::types::{SessionId, Turn};

/// Session state as the foreground saw it when the job was enqueued.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedState {
    /// Turns after the foreground save.
    pub turns: Vec<Turn>,
    /// Running summary at that point.
    pub summary: String,
    /// Version returned by the foreground save.
    pub version: u64,
}

/// One foreground invocation handed to a background worker.
///
/// Ownership moves into the queue on `emit`; the worker is the only reader
/// afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct RunContext {
    /// Session the job belongs to.
    pub session_id: SessionId,
    /// Free-form caller annotations, carried into logs.
    pub metadata: BTreeMap<String, String>,
    /// Captured state.
    pub state: CapturedState,
}

impl RunContext {
    /// Payload for `session_id` with no metadata.
    #[must_use]
    pub fn new(session_id: SessionId, state: CapturedState) -> Self {
        Self {
            session_id,
            metadata: BTreeMap::new(),
            state,
        }
    }

    /// Attach one metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}
