//! Storage Engine Module
//!
//! This module provides the key-value store that backs every connection.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     KeyValueStore                           │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │                  Mutex<Inner>                        │   │
//! │  │   HashMap<key, Entry>   BTreeMap<seq, key>  used_mem │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Features
//!
//! - **Single Lock**: One mutex covers the map, so each operation is atomic
//! - **Memory Budget**: Approximate, character-based cost accounting
//! - **Oldest-Write Eviction**: Writes, not reads, decide what goes first
//!
//! ## Example
//!
//! ```
//! use emberkv::protocol::Value;
//! use emberkv::storage::KeyValueStore;
//!
//! let store = KeyValueStore::with_max_memory(4);
//! store.set("a", Value::text("1")).unwrap();
//! store.set("b", Value::text("2")).unwrap();
//! store.set("c", Value::text("3")).unwrap();
//!
//! // "a" was written first, so it was evicted
//! assert_eq!(store.get("a"), None);
//! assert_eq!(store.len(), 2);
//! ```

pub mod engine;

pub use engine::{Entry, KeyValueStore, StorageError, StorageStats, DEFAULT_MAX_MEMORY_MB};
