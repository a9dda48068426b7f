//! Per-session mutual exclusion.
//!
//! [`KeyedLock`] blocks the calling thread; [`AsyncKeyedLock`] suspends the
//! calling task. Both share one refcounted table: an entry is created on the
//! first acquire of a key and removed when its last holder or waiter goes away,
//! so short-lived sessions never accumulate.
//!
//! Every handle is owned (`'static`), and releasing it is tied to `Drop`, so
//! the lock is freed on every exit path including panics and cancelled futures.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use tracing::trace;

use crate::observer::{SharedObserver, noop};

// ---------------------------------------------------------------------------
// Refcounted table
// ---------------------------------------------------------------------------

struct Entry<S> {
    slot: Arc<S>,
    refs: usize,
}

struct LockTable<S> {
    entries: Mutex<HashMap<String, Entry<S>>>,
}

impl<S: Default> LockTable<S> {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Take a reference on `key`'s slot, creating it if needed.
    fn checkout(self: &Arc<Self>, key: &str) -> (Arc<S>, Registration<S>) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(key.to_string()).or_insert_with(|| Entry {
            slot: Arc::new(S::default()),
            refs: 0,
        });
        entry.refs += 1;
        let slot = Arc::clone(&entry.slot);
        drop(entries);

        (
            slot,
            Registration {
                table: Arc::clone(self),
                key: key.to_string(),
            },
        )
    }

    fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn refs(&self, key: &str) -> usize {
        self.entries.lock().get(key).map_or(0, |e| e.refs)
    }
}

/// One counted reference on a table entry. Dropping it releases the reference
/// and removes the entry once nobody holds or waits on the key.
struct Registration<S> {
    table: Arc<LockTable<S>>,
    key: String,
}

impl<S> Drop for Registration<S> {
    fn drop(&mut self) {
        let mut entries = self.table.entries.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.refs = entry.refs.saturating_sub(1);
            if entry.refs == 0 {
                entries.remove(&self.key);
                trace!(key = %self.key, "lock entry released");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Blocking variant
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SyncSlot {
    held: Mutex<bool>,
    released: Condvar,
}

/// Thread-blocking lock keyed by session id.
///
/// Clones share the same table.
#[derive(Clone)]
pub struct KeyedLock {
    table: Arc<LockTable<SyncSlot>>,
    observer: SharedObserver,
}

impl KeyedLock {
    /// A lock with no observer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_observer(noop())
    }

    /// A lock reporting waits and acquisitions to `observer`.
    #[must_use]
    pub fn with_observer(observer: SharedObserver) -> Self {
        Self {
            table: Arc::new(LockTable::new()),
            observer,
        }
    }

    /// Block until the caller is the only holder of `key`.
    #[must_use = "the lock is released as soon as the guard is dropped"]
    pub fn acquire(&self, key: &str) -> KeyedGuard {
        let (slot, registration) = self.table.checkout(key);
        {
            let mut held = slot.held.lock();
            if *held {
                self.observer.on_lock_wait(key);
                while *held {
                    slot.released.wait(&mut held);
                }
            }
            *held = true;
        }
        self.observer.on_lock_acquired(key);

        KeyedGuard {
            slot,
            _registration: registration,
        }
    }

    /// Run `f` while holding `key`.
    pub fn with<T>(&self, key: &str, f: impl FnOnce() -> T) -> T {
        let _guard = self.acquire(key);
        f()
    }

    /// Keys that currently have a holder or a waiter.
    #[must_use]
    pub fn active_keys(&self) -> Vec<String> {
        self.table.keys()
    }

    /// Whether the table holds an entry for `key`.
    #[must_use]
    pub fn is_tracked(&self, key: &str) -> bool {
        self.table.refs(key) > 0
    }

    /// Holders plus waiters on `key`.
    #[must_use]
    pub fn refcount(&self, key: &str) -> usize {
        self.table.refs(key)
    }
}

impl Default for KeyedLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive hold on one key of a [`KeyedLock`].
pub struct KeyedGuard {
    slot: Arc<SyncSlot>,
    // Dropped after `Drop::drop` has released the slot.
    _registration: Registration<SyncSlot>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        *self.slot.held.lock() = false;
        self.slot.released.notify_one();
    }
}

// ---------------------------------------------------------------------------
// Cooperative variant
// ---------------------------------------------------------------------------

/// Task-suspending lock keyed by session id.
///
/// Same semantics as [`KeyedLock`]. Dropping an `acquire` future while it
/// waits gives back its table reference without ever holding the key.
#[derive(Clone)]
pub struct AsyncKeyedLock {
    table: Arc<LockTable<tokio::sync::Mutex<()>>>,
    observer: SharedObserver,
}

impl AsyncKeyedLock {
    /// A lock with no observer.
    #[must_use]
    pub fn new() -> Self {
        Self::with_observer(noop())
    }

    /// A lock reporting waits and acquisitions to `observer`.
    #[must_use]
    pub fn with_observer(observer: SharedObserver) -> Self {
        Self {
            table: Arc::new(LockTable::new()),
            observer,
        }
    }

    /// Suspend until the caller is the only holder of `key`.
    pub async fn acquire(&self, key: &str) -> AsyncKeyedGuard {
        let (slot, registration) = self.table.checkout(key);
        let guard = match Arc::clone(&slot).try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => {
                self.observer.on_lock_wait(key);
                slot.lock_owned().await
            }
        };
        self.observer.on_lock_acquired(key);

        AsyncKeyedGuard {
            _guard: guard,
            _registration: registration,
        }
    }

    /// Await `fut` while holding `key`.
    pub async fn with<F: std::future::Future>(&self, key: &str, fut: F) -> F::Output {
        let _guard = self.acquire(key).await;
        fut.await
    }

    /// Keys that currently have a holder or a waiter.
    #[must_use]
    pub fn active_keys(&self) -> Vec<String> {
        self.table.keys()
    }

    /// Whether the table holds an entry for `key`.
    #[must_use]
    pub fn is_tracked(&self, key: &str) -> bool {
        self.table.refs(key) > 0
    }

    /// Holders plus waiters on `key`.
    #[must_use]
    pub fn refcount(&self, key: &str) -> usize {
        self.table.refs(key)
    }
}

impl Default for AsyncKeyedLock {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive hold on one key of an [`AsyncKeyedLock`].
pub struct AsyncKeyedGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
    _registration: Registration<tokio::sync::Mutex<()>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
