//! Concurrent cache store.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;

use super::{CacheEntry, CacheKey};

type EntryMap = DashMap<CacheKey, Arc<CacheEntry>>;

/// Shared mapping from [`CacheKey`] to [`CacheEntry`].
///
/// Created empty when the proxy starts and dropped with it; nothing is
/// persisted. One store is shared by every in-flight request through an
/// `Arc<CacheStore>`.
///
/// - Entries are stored as `Arc<CacheEntry>`, so [`upsert`](Self::upsert)
///   swaps a pointer: a reader sees either the old entry or the new one,
///   never a mix.
/// - The map is sharded ([`DashMap`]); requests for keys in different shards
///   never contend, and a shard lock is only held for the pointer swap.
/// - [`clear`](Self::clear) swaps in a fresh map ([`ArcSwap`]), so readers
///   observe the whole store emptied at once rather than shard by shard.
///
/// There is no eviction, expiry or capacity bound.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use rttp_cache::cache::{CacheEntry, CacheKey, CacheStore};
/// use rttp_cache::http::{Headers, Method, StatusCode};
///
/// let store = CacheStore::new();
/// let key = CacheKey::build(&Method::Get, "/", None);
/// assert!(store.lookup(&key).is_none());
///
/// store.upsert(key.clone(), CacheEntry::new(StatusCode::OK, Headers::new(), Bytes::from("hi")));
/// assert_eq!(&store.lookup(&key).unwrap().body()[..], b"hi");
/// ```
pub struct CacheStore {
    entries: ArcSwap<EntryMap>,
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            entries: ArcSwap::from_pointee(DashMap::new()),
        }
    }

    /// Returns the entry stored under `key`, if any.
    pub fn lookup(&self, key: &CacheKey) -> Option<Arc<CacheEntry>> {
        self.entries
            .load()
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Stores `entry` under `key`, replacing any previous entry.
    ///
    /// Returns `true` if an entry was replaced. Concurrent upserts to the
    /// same key end with exactly one of them stored (last writer wins).
    pub fn upsert(&self, key: CacheKey, entry: CacheEntry) -> bool {
        self.entries
            .load()
            .insert(key, Arc::new(entry))
            .is_some()
    }

    /// Drops every entry at once and returns how many there were.
    pub fn clear(&self) -> usize {
        let previous = self.entries.swap(Arc::new(DashMap::new()));
        previous.len()
    }

    /// Number of entries currently stored.
    pub fn len(&self) -> usize {
        self.entries.load().len()
    }

    /// Returns `true` if the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.load().is_empty()
    }
}
