//! The semantic search capability behind long-term memory.
//!
//! [`SemanticIndex`] is the `put / search / delete` contract that
//! [`crate::long_term::LongTermMemory`] is written against. Ranking quality is
//! the backend's business; the bundled backends rank lexically, which is
//! enough for near-duplicate lookups and for tests.
//!
//! An empty query lists a namespace in insertion order.

pub mod memory;
pub mod sqlite;

use std::collections::HashSet;
use std::sync::Arc;

use crate::decay::char_jaccard;
use crate::error::Result;
use crate::types::{MemoryItem, Namespace};

pub use memory::InMemoryIndex;
pub use sqlite::SqliteIndex;

/// A stored item together with its key.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedItem {
    /// Key unique within the namespace.
    pub key: String,
    /// Stored value.
    pub value: MemoryItem,
}

/// Key-value store with nearest-item search, partitioned by namespace.
pub trait SemanticIndex: Send + Sync {
    /// Insert or replace the item under `key`.
    ///
    /// # Errors
    /// Backend failures.
    fn put(&self, ns: &Namespace, key: &str, item: &MemoryItem) -> Result<()>;

    /// Up to `limit` items nearest to `query`, best first.
    ///
    /// # Errors
    /// Backend failures.
    fn search(&self, ns: &Namespace, query: &str, limit: usize) -> Result<Vec<IndexedItem>>;

    /// Remove `key`. Missing keys are not an error.
    ///
    /// # Errors
    /// Backend failures.
    fn delete(&self, ns: &Namespace, key: &str) -> Result<()>;
}

impl<I: SemanticIndex + ?Sized> SemanticIndex for Box<I> {
    fn put(&self, ns: &Namespace, key: &str, item: &MemoryItem) -> Result<()> {
        (**self).put(ns, key, item)
    }

    fn search(&self, ns: &Namespace, query: &str, limit: usize) -> Result<Vec<IndexedItem>> {
        (**self).search(ns, query, limit)
    }

    fn delete(&self, ns: &Namespace, key: &str) -> Result<()> {
        (**self).delete(ns, key)
    }
}

impl<I: SemanticIndex + ?Sized> SemanticIndex for Arc<I> {
    fn put(&self, ns: &Namespace, key: &str, item: &MemoryItem) -> Result<()> {
        (**self).put(ns, key, item)
    }

    fn search(&self, ns: &Namespace, query: &str, limit: usize) -> Result<Vec<IndexedItem>> {
        (**self).search(ns, query, limit)
    }

    fn delete(&self, ns: &Namespace, key: &str) -> Result<()> {
        (**self).delete(ns, key)
    }
}

// ---------------------------------------------------------------------------
// Lexical ranking shared by the bundled backends
// ---------------------------------------------------------------------------

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Relevance of `content` to `query` in [0, 1]: mostly word overlap, with
/// character overlap as a tie-breaker for short or misspelled text.
#[must_use]
pub fn lexical_score(query: &str, content: &str) -> f64 {
    let q = tokens(query);
    let word_overlap = if q.is_empty() {
        0.0
    } else {
        let c = tokens(content);
        q.intersection(&c).count() as f64 / q.len() as f64
    };
    0.7 * word_overlap + 0.3 * char_jaccard(query, content)
}

/// Order `items` (given in insertion order) by relevance and keep `limit`.
///
/// An empty query keeps insertion order. Ties keep insertion order.
pub(crate) fn rank(query: &str, items: Vec<IndexedItem>, limit: usize) -> Vec<IndexedItem> {
    if query.trim().is_empty() {
        return items.into_iter().take(limit).collect();
    }
    let mut scored: Vec<(f64, IndexedItem)> = items
        .into_iter()
        .map(|item| (lexical_score(query, &item.value.content), item))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().take(limit).map(|(_, item)| item).collect()
}
