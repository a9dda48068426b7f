//! SQLite-backed [`SemanticIndex`].
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS memory_items (
//!     scope         TEXT NOT NULL,
//!     session_id    TEXT NOT NULL,
//!     key           TEXT NOT NULL,
//!     content       TEXT NOT NULL,
//!     strength      REAL NOT NULL,
//!     created_at    TEXT NOT NULL,
//!     last_accessed TEXT NOT NULL,
//!     access_count  INTEGER NOT NULL,
//!     PRIMARY KEY (scope, session_id, key)
//! );
//! ```
//!
//! Insertion order is the table's rowid, which an upsert preserves. Ranking
//! happens in Rust after the namespace has been read.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, params};
use tracing::info;

use super::{IndexedItem, SemanticIndex, rank};
use crate::config::PersistenceConfig;
use crate::error::Result;
use crate::persistence::{open_connection, parse_timestamp};
use crate::types::{MemoryItem, Namespace};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS memory_items (
    scope         TEXT NOT NULL,
    session_id    TEXT NOT NULL,
    key           TEXT NOT NULL,
    content       TEXT NOT NULL,
    strength      REAL NOT NULL,
    created_at    TEXT NOT NULL,
    last_accessed TEXT NOT NULL,
    access_count  INTEGER NOT NULL,
    PRIMARY KEY (scope, session_id, key)
);";

/// Index stored in an SQLite table.
///
/// Each handle owns one connection. Open a separate handle per execution
/// context rather than sharing one between threads.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
}

impl SqliteIndex {
    /// Open (or create) the table in the database at `path`.
    ///
    /// # Errors
    /// Returns `ChatmemError::Database` on SQLite failures.
    pub fn open<P: AsRef<Path>>(path: P, config: &PersistenceConfig) -> Result<Self> {
        let conn = open_connection(path.as_ref(), config)?;
        conn.execute_batch(SCHEMA)?;
        info!(path = %path.as_ref().display(), "memory index opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns `ChatmemError::Database` on SQLite failures.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn read_namespace(&self, ns: &Namespace) -> Result<Vec<IndexedItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT key, content, strength, created_at, last_accessed, access_count
             FROM memory_items
             WHERE scope = ?1 AND session_id = ?2
             ORDER BY rowid",
        )?;
        let rows = stmt.query_map(params![ns.scope, ns.session.as_str()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut items = Vec::new();
        for row in rows {
            let (key, content, strength, created_at, last_accessed, access_count) = row?;
            items.push(IndexedItem {
                key,
                value: MemoryItem {
                    content,
                    strength,
                    created_at: parse_timestamp(&created_at)?,
                    last_accessed: parse_timestamp(&last_accessed)?,
                    access_count: u32::try_from(access_count).unwrap_or(u32::MAX),
                },
            });
        }
        Ok(items)
    }
}

impl SemanticIndex for SqliteIndex {
    fn put(&self, ns: &Namespace, key: &str, item: &MemoryItem) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO memory_items
                (scope, session_id, key, content, strength, created_at, last_accessed, access_count)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(scope, session_id, key) DO UPDATE SET
                content       = excluded.content,
                strength      = excluded.strength,
                last_accessed = excluded.last_accessed,
                access_count  = excluded.access_count",
            params![
                ns.scope,
                ns.session.as_str(),
                key,
                item.content,
                item.strength,
                item.created_at.to_rfc3339(),
                item.last_accessed.to_rfc3339(),
                i64::from(item.access_count),
            ],
        )?;
        Ok(())
    }

    fn search(&self, ns: &Namespace, query: &str, limit: usize) -> Result<Vec<IndexedItem>> {
        Ok(rank(query, self.read_namespace(ns)?, limit))
    }

    fn delete(&self, ns: &Namespace, key: &str) -> Result<()> {
        self.conn.lock().execute(
            "DELETE FROM memory_items WHERE scope = ?1 AND session_id = ?2 AND key = ?3",
            params![ns.scope, ns.session.as_str(), key],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SessionId;
    use chrono::{Duration, Utc};

    fn ns() -> Namespace {
        Namespace::new("user_prefs", &SessionId::from("s1"))
    }

    #[test]
    fn put_search_delete() {
        let index = SqliteIndex::open_in_memory().expect("open");
        let now = Utc::now();
        index.put(&ns(), "k1", &MemoryItem::new("drinks oolong tea", now)).expect("put");
        index.put(&ns(), "k2", &MemoryItem::new("works as a nurse", now)).expect("put");

        let hits = index.search(&ns(), "tea", 1).expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "k1");

        index.delete(&ns(), "k1").expect("delete");
        let all = index.search(&ns(), "", 10).expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key, "k2");
    }

    #[test]
    fn upsert_preserves_metadata_and_order() {
        let index = SqliteIndex::open_in_memory().expect("open");
        let created = Utc::now() - Duration::hours(5);
        let mut item = MemoryItem::new("likes jazz", created);
        index.put(&ns(), "a", &item).expect("put");
        index.put(&ns(), "b", &MemoryItem::new("likes rain", created)).expect("put");

        item.reinforce(0.2, created + Duration::hours(1));
        index.put(&ns(), "a", &item).expect("update");

        let listed = index.search(&ns(), "", 10).expect("list");
        assert_eq!(listed[0].key, "a");
        assert_eq!(listed[0].value.access_count, 1);
        assert_eq!(
            listed[0].value.last_accessed.timestamp(),
            (created + Duration::hours(1)).timestamp()
        );
        assert_eq!(listed[1].key, "b");
    }

    #[test]
    fn other_namespaces_are_invisible() {
        let index = SqliteIndex::open_in_memory().expect("open");
        let other = Namespace::new("user_prefs", &SessionId::from("s2"));
        index.put(&other, "k", &MemoryItem::new("secret", Utc::now())).expect("put");
        assert!(index.search(&ns(), "", 10).expect("search").is_empty());
    }
}
