//! Core type definitions for the chatmem memory system.
//!
//! All persisted types are serializable; timestamps are UTC wall-clock.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity Types
// ---------------------------------------------------------------------------

/// Opaque identifier of a conversation thread.
///
/// The unit of lock and memory partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Wrap an existing identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Create a fresh random session id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A long-term memory partition: `(scope, session)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Namespace {
    /// Logical memory scope, e.g. `user_prefs`.
    pub scope: String,
    /// Owning session.
    pub session: SessionId,
}

impl Namespace {
    /// Build a namespace for `session` under `scope`.
    #[must_use]
    pub fn new(scope: impl Into<String>, session: &SessionId) -> Self {
        Self {
            scope: scope.into(),
            session: session.clone(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.scope, self.session)
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnKind {
    /// The end user.
    Human,
    /// The agent's reply.
    Assistant,
    /// System-authored content, including compaction summary markers.
    System,
}

impl fmt::Display for TurnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Human => "human",
            Self::Assistant => "assistant",
            Self::System => "system",
        };
        f.write_str(name)
    }
}

/// One raw conversation turn. Immutable once stored; only replaced in bulk by
/// compaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    /// Author of the turn.
    pub kind: TurnKind,
    /// Turn content.
    pub text: String,
    /// Optional caller-assigned id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Turn {
    /// Create a turn of the given kind.
    #[must_use]
    pub fn new(kind: TurnKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            id: None,
        }
    }

    /// A human turn.
    #[must_use]
    pub fn human(text: impl Into<String>) -> Self {
        Self::new(TurnKind::Human, text)
    }

    /// An assistant turn.
    #[must_use]
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(TurnKind::Assistant, text)
    }

    /// A system turn.
    #[must_use]
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(TurnKind::System, text)
    }

    /// Attach an id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.text)
    }
}

/// Durable per-session record as stored by [`crate::persistence::ContextStore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    /// Raw turns, oldest first.
    pub turns: Vec<Turn>,
    /// Rolling summary of compacted turns (empty if never compacted).
    pub summary: String,
    /// Optimistic-concurrency version; strictly increases on every write.
    pub version: u64,
    /// Time of the last successful write.
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Long-term memory
// ---------------------------------------------------------------------------

/// A long-term memory fact with decay metadata.
///
/// Effective strength is derived at read time, never stored:
/// `strength · e^(−decay_rate · hours_since_last_access)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// The remembered fact in natural language.
    pub content: String,
    /// Stored strength in (0, 1].
    pub strength: f64,
    /// When the fact was first stored.
    pub created_at: DateTime<Utc>,
    /// Last reinforcement (match or retrieval).
    pub last_accessed: DateTime<Utc>,
    /// Number of reinforcements.
    pub access_count: u32,
}

impl MemoryItem {
    /// A fresh fact at full strength.
    #[must_use]
    pub fn new(content: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            content: content.into(),
            strength: 1.0,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    /// Raise strength by `delta` (capped at 1.0) and mark as accessed.
    pub fn reinforce(&mut self, delta: f64, now: DateTime<Utc>) {
        self.strength = crate::decay::reinforced(self.strength, delta);
        self.last_accessed = now;
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Hours since last access, never negative.
    #[must_use]
    pub fn hours_idle(&self, now: DateTime<Utc>) -> f64 {
        let millis = (now - self.last_accessed).num_milliseconds().max(0);
        millis as f64 / 3_600_000.0
    }
}

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// Source of the current time for decay calculations.
pub trait Clock: Send + Sync {
    /// Current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually advanced clock. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Start at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Move time forward by whole hours.
    pub fn advance_hours(&self, hours: i64) {
        *self.now.lock() += Duration::hours(hours);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}
