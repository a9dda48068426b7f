//! Process-local [`SemanticIndex`] backend.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::{IndexedItem, SemanticIndex, rank};
use crate::error::Result;
use crate::types::{MemoryItem, Namespace};

#[derive(Default)]
struct Partition {
    next_seq: u64,
    items: HashMap<String, (u64, MemoryItem)>,
}

/// In-memory index. Clones share the same data, so one handle can be given to
/// every execution context.
#[derive(Clone, Default)]
pub struct InMemoryIndex {
    partitions: Arc<RwLock<HashMap<Namespace, Partition>>>,
}

impl InMemoryIndex {
    /// An empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Items stored under `ns`.
    #[must_use]
    pub fn len(&self, ns: &Namespace) -> usize {
        self.partitions.read().get(ns).map_or(0, |p| p.items.len())
    }

    /// Whether `ns` holds no items.
    #[must_use]
    pub fn is_empty(&self, ns: &Namespace) -> bool {
        self.len(ns) == 0
    }

    /// Fetch one item by key.
    #[must_use]
    pub fn get(&self, ns: &Namespace, key: &str) -> Option<MemoryItem> {
        self.partitions
            .read()
            .get(ns)
            .and_then(|p| p.items.get(key))
            .map(|(_, item)| item.clone())
    }
}

impl SemanticIndex for InMemoryIndex {
    fn put(&self, ns: &Namespace, key: &str, item: &MemoryItem) -> Result<()> {
        let mut partitions = self.partitions.write();
        let partition = partitions.entry(ns.clone()).or_default();
        let seq = match partition.items.get(key) {
            Some((seq, _)) => *seq,
            None => {
                partition.next_seq += 1;
                partition.next_seq
            }
        };
        partition.items.insert(key.to_string(), (seq, item.clone()));
        Ok(())
    }

    fn search(&self, ns: &Namespace, query: &str, limit: usize) -> Result<Vec<IndexedItem>> {
        let mut ordered: Vec<(u64, IndexedItem)> = {
            let partitions = self.partitions.read();
            let Some(partition) = partitions.get(ns) else {
                return Ok(Vec::new());
            };
            partition
                .items
                .iter()
                .map(|(key, (seq, value))| {
                    (
                        *seq,
                        IndexedItem {
                            key: key.clone(),
                            value: value.clone(),
                        },
                    )
                })
                .collect()
        };
        ordered.sort_by_key(|(seq, _)| *seq);
        Ok(rank(
            query,
            ordered.into_iter().map(|(_, item)| item).collect(),
            limit,
        ))
    }

    fn delete(&self, ns: &Namespace, key: &str) -> Result<()> {
        let mut partitions = self.partitions.write();
        if let Some(partition) = partitions.get_mut(ns) {
            partition.items.remove(key);
            if partition.items.is_empty() {
                partitions.remove(ns);
            }
        }
        Ok(())
    }
}
