//! Memory-Bounded Storage Engine
//!
//! This module implements the key-value store behind EmberKV. All state sits
//! behind a single mutex: every operation, including the eviction loop run by
//! a `set`, is one atomic step as seen from other connections.
//!
//! ## Memory Accounting
//!
//! The cost of an entry is the number of characters in its key plus the
//! number of characters in the textual rendering of its value. This is an
//! approximation of real memory use and is kept as-is on purpose; it is the
//! unit `max_memory` is expressed in.
//!
//! ## Eviction
//!
//! When a `set` pushes the total cost above the budget, the entry with the
//! oldest write is evicted, repeatedly, until the store fits again. Reads do
//! not refresh an entry's age. Every write is stamped with a strictly
//! increasing sequence number, so two writes within the same clock tick are
//! still evicted in the order they happened.
//!
//! ```text
//!   write order index (BTreeMap<seq, key>)
//!   ┌─────┬─────┬─────┬─────┐
//!   │  3  │  7  │  8  │ 12  │   <- set("a", ..) appends seq 13
//!   └─────┴─────┴─────┴─────┘
//!     ▲
//!     └── evicted first
//! ```

use crate::protocol::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

/// Default memory budget in megabytes.
pub const DEFAULT_MAX_MEMORY_MB: usize = 100;

/// Errors returned by [`KeyValueStore::set`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// The value alone is bigger than the whole budget
    #[error("Value too large")]
    ValueTooLarge,

    /// Evicting every other entry did not bring the store under budget
    #[error("Cannot free enough memory")]
    CannotFreeMemory,
}

/// A stored value with its write metadata.
#[derive(Debug, Clone)]
pub struct Entry {
    /// The actual value stored
    pub value: Value,
    /// When this entry was last written
    pub written_at: Instant,
    /// Position in the global write order
    seq: u64,
    /// Accounted cost of key and value
    cost: usize,
}

/// Snapshot of store counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub keys: usize,
    pub used_memory: usize,
    pub max_memory: usize,
    pub get_ops: u64,
    pub set_ops: u64,
    pub del_ops: u64,
    pub evicted: u64,
}

#[derive(Debug, Default)]
struct Inner {
    data: HashMap<String, Entry>,
    /// Write sequence -> key, oldest first
    write_order: BTreeMap<u64, String>,
    next_seq: u64,
    used_memory: usize,
    get_ops: u64,
    set_ops: u64,
    del_ops: u64,
    evicted: u64,
}

impl Inner {
    fn remove(&mut self, key: &str) -> Option<Entry> {
        let entry = self.data.remove(key)?;
        self.write_order.remove(&entry.seq);
        self.used_memory -= entry.cost;
        Some(entry)
    }

    /// Evicts the oldest-written entry other than `keep`.
    fn evict_oldest_except(&mut self, keep: &str) -> bool {
        let victim = self
            .write_order
            .values()
            .find(|k| k.as_str() != keep)
            .cloned();

        match victim {
            Some(key) => {
                self.remove(&key);
                self.evicted += 1;
                debug!(key = %key, used = self.used_memory, "Evicted oldest entry");
                true
            }
            None => false,
        }
    }
}

/// The main storage engine for EmberKV.
///
/// Created once by the server and shared across all connection tasks
/// through an `Arc`.
///
/// # Example
///
/// ```
/// use emberkv::protocol::Value;
/// use emberkv::storage::KeyValueStore;
///
/// let store = KeyValueStore::new(1);
///
/// store.set("name", Value::text("Ariz")).unwrap();
/// assert_eq!(store.get("name"), Some(Value::text("Ariz")));
///
/// assert!(store.delete("name"));
/// assert_eq!(store.get("name"), None);
/// ```
#[derive(Debug)]
pub struct KeyValueStore {
    inner: Mutex<Inner>,
    max_memory: usize,
}

impl Default for KeyValueStore {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MEMORY_MB)
    }
}

impl KeyValueStore {
    /// Creates a store with a budget of `max_memory_mb` megabytes.
    pub fn new(max_memory_mb: usize) -> Self {
        Self::with_max_memory(max_memory_mb.saturating_mul(1024 * 1024))
    }

    /// Creates a store with a budget given directly in accounting units.
    pub fn with_max_memory(max_memory: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            max_memory,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // No operation leaves the state half-updated across a panic point,
        // so a poisoned lock is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Gets the value for a key. Does not change the entry's age.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.lock();
        inner.get_ops += 1;
        inner.data.get(key).map(|entry| entry.value.clone())
    }

    /// Sets a key, replacing any previous value and refreshing its age.
    ///
    /// Evicts oldest-written entries while the store is over budget.
    ///
    /// # Errors
    ///
    /// - [`StorageError::ValueTooLarge`] if the value alone exceeds the
    ///   budget. The store is left untouched.
    /// - [`StorageError::CannotFreeMemory`] if the new entry does not fit
    ///   even in an otherwise empty store. Entries evicted on the way stay
    ///   evicted and the key is left unset.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<bool, StorageError> {
        let key = key.into();
        let value_cost = value.rendered_len();
        if value_cost > self.max_memory {
            return Err(StorageError::ValueTooLarge);
        }

        let mut inner = self.lock();
        inner.set_ops += 1;

        inner.remove(&key);

        let seq = inner.next_seq;
        inner.next_seq += 1;
        let cost = key.chars().count() + value_cost;

        inner.write_order.insert(seq, key.clone());
        inner.used_memory += cost;
        inner.data.insert(
            key.clone(),
            Entry {
                value,
                written_at: Instant::now(),
                seq,
                cost,
            },
        );

        while inner.used_memory > self.max_memory {
            if !inner.evict_oldest_except(&key) {
                inner.remove(&key);
                return Err(StorageError::CannotFreeMemory);
            }
        }

        Ok(true)
    }

    /// Deletes a key.
    ///
    /// # Returns
    ///
    /// Returns `true` if the key was deleted, `false` if it didn't exist.
    pub fn delete(&self, key: &str) -> bool {
        let mut inner = self.lock();
        inner.del_ops += 1;
        inner.remove(key).is_some()
    }

    /// Removes every entry and returns how many there were.
    pub fn flush(&self) -> usize {
        let mut inner = self.lock();
        let count = inner.data.len();
        inner.data.clear();
        inner.write_order.clear();
        inner.used_memory = 0;
        count
    }

    /// Returns the full entry for a key, including its write time.
    pub fn get_entry(&self, key: &str) -> Option<Entry> {
        self.lock().data.get(key).cloned()
    }

    /// Returns the number of keys in the store.
    pub fn len(&self) -> usize {
        self.lock().data.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current accounted memory cost.
    pub fn used_memory(&self) -> usize {
        self.lock().used_memory
    }

    /// The memory budget in accounting units.
    pub fn max_memory(&self) -> usize {
        self.max_memory
    }

    /// Returns store statistics.
    pub fn stats(&self) -> StorageStats {
        let inner = self.lock();
        StorageStats {
            keys: inner.data.len(),
            used_memory: inner.used_memory,
            max_memory: self.max_memory,
            get_ops: inner.get_ops,
            set_ops: inner.set_ops,
            del_ops: inner.del_ops,
            evicted: inner.evicted,
        }
    }
}
