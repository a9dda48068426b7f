//! SQLite persistence for per-session conversation context.
//!
//! One row per session. Turns are serialized to JSON; the row carries a
//! version that increases by one on every successful write:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS chat_contexts (
//!     session_id TEXT PRIMARY KEY,
//!     turns_json TEXT NOT NULL,
//!     summary    TEXT NOT NULL DEFAULT '',
//!     version    INTEGER NOT NULL,
//!     updated_at TEXT NOT NULL
//! );
//! ```
//!
//! - WAL mode so the foreground and background connections can read while
//!   another one writes.
//! - [`ContextStore::save_if_version`] is a compare-and-swap: a background
//!   compaction that read an old version can never overwrite a newer
//!   foreground write.
//! - A `ContextStore` owns its `rusqlite::Connection` and is `Send` but not
//!   `Sync`: every thread or task that touches the database opens its own.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use tracing::{debug, info, warn};

use crate::config::PersistenceConfig;
use crate::error::{ChatmemError, Result};
use crate::types::{SessionContext, SessionId, Turn};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS chat_contexts (
    session_id TEXT PRIMARY KEY,
    turns_json TEXT NOT NULL,
    summary    TEXT NOT NULL DEFAULT '',
    version    INTEGER NOT NULL,
    updated_at TEXT NOT NULL
);";

/// Open a connection with the pragmas every chatmem table expects.
pub(crate) fn open_connection(path: &Path, config: &PersistenceConfig) -> Result<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;

    if config.wal_mode {
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            warn!(path = %path.display(), mode = %mode, "WAL mode not available");
        }
    }
    conn.execute_batch("PRAGMA synchronous = NORMAL;")?;
    Ok(conn)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ChatmemError::Serialization(format!("bad timestamp {raw:?}: {e}")))
}

fn to_version(raw: i64) -> u64 {
    u64::try_from(raw).unwrap_or(0)
}

fn from_version(version: u64) -> i64 {
    i64::try_from(version).unwrap_or(i64::MAX)
}

// ---------------------------------------------------------------------------
// ContextStore
// ---------------------------------------------------------------------------

/// Versioned, durable per-session context.
///
/// ```no_run
/// # use chatmem_core::persistence::ContextStore;
/// # use chatmem_core::config::PersistenceConfig;
/// # use chatmem_core::types::{SessionId, Turn};
/// let store = ContextStore::open("chat_context.db", &PersistenceConfig::default())?;
/// let session = SessionId::from("thread-1");
/// let (_, version) = store.load(&session)?;
/// let applied = store.save_if_version(&session, &[Turn::human("hi")], "", version)?;
/// # Ok::<(), chatmem_core::error::ChatmemError>(())
/// ```
pub struct ContextStore {
    conn: Connection,
    db_path: PathBuf,
}

impl std::fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl ContextStore {
    /// Open (or create) the database at `path` and ensure the schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`ChatmemError::Database`] on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let db_path = path.as_ref().to_path_buf();
        let conn = open_connection(&db_path, config)?;
        conn.execute_batch(SCHEMA)?;

        info!(
            path = %db_path.display(),
            wal = config.wal_mode,
            "context store opened"
        );
        Ok(Self { conn, db_path })
    }

    /// Open a private in-memory database (useful for tests).
    ///
    /// # Errors
    ///
    /// Returns [`ChatmemError::Database`] on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn,
            db_path: PathBuf::from(":memory:"),
        })
    }

    /// Load a session. An absent session yields `(None, 0)`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatmemError::Serialization`] if the stored turns cannot be
    /// decoded, or [`ChatmemError::Database`] on SQLite failures.
    pub fn load(&self, session: &SessionId) -> Result<(Option<SessionContext>, u64)> {
        let start = Instant::now();
        let mut stmt = self.conn.prepare_cached(
            "SELECT turns_json, summary, version, updated_at
             FROM chat_contexts WHERE session_id = ?1",
        )?;
        let row: Option<(String, String, i64, String)> = stmt
            .query_row(params![session.as_str()], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .optional()?;

        let Some((turns_json, summary, version, updated_at)) = row else {
            debug!(session = %session, "no stored context");
            return Ok((None, 0));
        };

        let turns: Vec<Turn> = serde_json::from_str(&turns_json)?;
        let version = to_version(version);
        let context = SessionContext {
            turns,
            summary,
            version,
            updated_at: parse_timestamp(&updated_at)?,
        };

        debug!(
            session = %session,
            turns = context.turns.len(),
            version,
            elapsed_us = start.elapsed().as_micros() as u64,
            "loaded context"
        );
        Ok((Some(context), version))
    }

    /// Unconditional upsert. Returns the new version (1 for a new session).
    ///
    /// # Errors
    ///
    /// Returns [`ChatmemError::Serialization`] or [`ChatmemError::Database`].
    pub fn save(&self, session: &SessionId, turns: &[Turn], summary: &str) -> Result<u64> {
        let start = Instant::now();
        let turns_json = serde_json::to_string(turns)?;
        let now = Utc::now().to_rfc3339();

        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO chat_contexts (session_id, turns_json, summary, version, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(session_id) DO UPDATE SET
                turns_json = excluded.turns_json,
                summary    = excluded.summary,
                version    = chat_contexts.version + 1,
                updated_at = excluded.updated_at
             RETURNING version",
        )?;
        let version: i64 = stmt.query_row(
            params![session.as_str(), turns_json, summary, now],
            |row| row.get(0),
        )?;
        let version = to_version(version);

        debug!(
            session = %session,
            turns = turns.len(),
            version,
            elapsed_us = start.elapsed().as_micros() as u64,
            "saved context"
        );
        Ok(version)
    }

    /// Compare-and-swap write.
    ///
    /// Applies only if the stored version equals `expected_version`
    /// (`0` meaning "no row yet"), in which case the version is incremented
    /// and `true` is returned. Otherwise nothing is written and `false` is
    /// returned; a conflict is an outcome, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ChatmemError::Serialization`] or [`ChatmemError::Database`].
    pub fn save_if_version(
        &self,
        session: &SessionId,
        turns: &[Turn],
        summary: &str,
        expected_version: u64,
    ) -> Result<bool> {
        let turns_json = serde_json::to_string(turns)?;
        let now = Utc::now().to_rfc3339();

        let changed = if expected_version == 0 {
            self.conn.execute(
                "INSERT INTO chat_contexts (session_id, turns_json, summary, version, updated_at)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(session_id) DO NOTHING",
                params![session.as_str(), turns_json, summary, now],
            )?
        } else {
            self.conn.execute(
                "UPDATE chat_contexts SET
                    turns_json = ?2,
                    summary    = ?3,
                    version    = version + 1,
                    updated_at = ?4
                 WHERE session_id = ?1 AND version = ?5",
                params![
                    session.as_str(),
                    turns_json,
                    summary,
                    now,
                    from_version(expected_version)
                ],
            )?
        };

        let applied = changed == 1;
        if applied {
            debug!(session = %session, expected_version, "conditional save applied");
        } else {
            warn!(session = %session, expected_version, "conditional save rejected: version moved");
        }
        Ok(applied)
    }

    /// Delete a session. Returns `true` if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`ChatmemError::Database`] on SQLite failures.
    pub fn delete(&self, session: &SessionId) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM chat_contexts WHERE session_id = ?1",
            params![session.as_str()],
        )?;
        Ok(deleted > 0)
    }

    /// Every stored session id, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`ChatmemError::Database`] on SQLite failures.
    pub fn list_sessions(&self) -> Result<Vec<SessionId>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT session_id FROM chat_contexts ORDER BY session_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(SessionId(row?));
        }
        Ok(sessions)
    }

    /// Number of stored sessions.
    ///
    /// # Errors
    ///
    /// Returns [`ChatmemError::Database`] on SQLite failures.
    pub fn session_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM chat_contexts", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    /// Run `PRAGMA integrity_check`. `Ok(false)` means corruption was found.
    ///
    /// # Errors
    ///
    /// Returns [`ChatmemError::Database`] if the check itself fails.
    pub fn integrity_check(&self) -> Result<bool> {
        let result: String = self
            .conn
            .query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    /// Database path, or `:memory:`.
    #[must_use]
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
