//! Where execution contexts get their storage handles.
//!
//! Every worker thread and the foreground path open their own context-store
//! connection and their own index handle. [`IndexSource`] is how they do it
//! for long-term memory.

use std::path::PathBuf;

use chatmem_core::config::PersistenceConfig;
use chatmem_core::error::Result;
use chatmem_core::index::{InMemoryIndex, SemanticIndex, SqliteIndex};
use chatmem_core::persistence::ContextStore;

/// Opens a fresh [`SemanticIndex`] handle for one execution context.
pub trait IndexSource: Send + Sync + 'static {
    /// Handle type.
    type Index: SemanticIndex + 'static;

    /// Open a handle.
    ///
    /// # Errors
    /// Backend failures.
    fn open(&self) -> Result<Self::Index>;
}

/// Shared in-process index. Every "handle" is a clone of the same data.
impl IndexSource for InMemoryIndex {
    type Index = InMemoryIndex;

    fn open(&self) -> Result<Self::Index> {
        Ok(self.clone())
    }
}

/// SQLite index file; each handle is its own connection.
#[derive(Debug, Clone)]
pub struct SqliteIndexSource {
    path: PathBuf,
    config: PersistenceConfig,
}

impl SqliteIndexSource {
    /// Source for the database at `path`.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, config: PersistenceConfig) -> Self {
        Self {
            path: path.into(),
            config,
        }
    }
}

impl IndexSource for SqliteIndexSource {
    type Index = SqliteIndex;

    fn open(&self) -> Result<Self::Index> {
        SqliteIndex::open(&self.path, &self.config)
    }
}

/// Lazily opened private [`ContextStore`] connection.
pub(crate) struct LazyStore {
    config: PersistenceConfig,
    conn: Option<ContextStore>,
}

impl LazyStore {
    pub(crate) fn new(config: PersistenceConfig) -> Self {
        Self { config, conn: None }
    }

    pub(crate) fn get(&mut self) -> Result<&ContextStore> {
        let store = match self.conn.take() {
            Some(store) => store,
            None => ContextStore::open(&self.config.db_path, &self.config)?,
        };
        Ok(self.conn.insert(store))
    }
}
