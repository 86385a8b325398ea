//! Tier Module
//!
//! The operation set every storage tier exposes to the cache manager, and the
//! memory tier adapter that puts the volatile store behind it.

use std::fmt;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::cache::{CacheEntry, VolatileStore};

// == Tier Kind ==
/// Identifies a tier in logs and statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// In-process LRU store
    Memory,
    /// Durable string store under a namespace prefix
    Persistent,
    /// Asynchronous store for oversized values
    Bulk,
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierKind::Memory => write!(f, "memory"),
            TierKind::Persistent => write!(f, "persistent"),
            TierKind::Bulk => write!(f, "bulk"),
        }
    }
}

// == Size Info ==
/// Entry count and estimated bytes held by a tier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SizeInfo {
    pub entries: usize,
    pub bytes: usize,
}

// == Tier ==
/// A key/value tier holding JSON values with TTLs.
///
/// Operations never fail: a tier absorbs its own storage errors and reports
/// a miss, `false` or an empty result instead. Reads that find an expired
/// entry remove it before reporting the miss.
#[async_trait]
pub trait Tier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Returns a copy of the live entry under `key`, recording the access.
    async fn get_entry(&self, key: &str) -> Option<CacheEntry<Value>>;

    /// Stores `data` under `key` for `ttl_ms` milliseconds.
    async fn put(&self, key: &str, data: Value, ttl_ms: u64);

    async fn delete(&self, key: &str) -> bool;

    async fn clear(&self);

    /// Checks for a live entry without recording an access.
    async fn has(&self, key: &str) -> bool;

    async fn keys(&self) -> Vec<String>;

    async fn size_info(&self) -> SizeInfo;

    /// Removes every expired entry, returning how many were removed.
    async fn purge_expired(&self) -> usize;
}

// == Memory Tier ==
/// The volatile store behind a lock, shared by concurrent callers.
///
/// The lock is only held for the duration of one store call and never
/// across an await point.
#[derive(Debug)]
pub struct MemoryTier {
    store: Mutex<VolatileStore<Value>>,
}

impl MemoryTier {
    pub fn new(max_size: usize, max_entries: usize) -> Self {
        Self {
            store: Mutex::new(VolatileStore::new(max_size, max_entries)),
        }
    }

    /// Applies new budgets to later writes.
    pub fn set_limits(&self, max_size: usize, max_entries: usize) {
        self.store.lock().set_limits(max_size, max_entries);
    }

    /// Running byte total, entry count and LRU evictions, read atomically.
    pub fn totals(&self) -> (usize, usize, u64) {
        let store = self.store.lock();
        (store.total_size(), store.len(), store.evictions())
    }

    /// Whether the store holds `key`, live or expired, without side effects.
    pub fn contains(&self, key: &str) -> bool {
        self.store.lock().contains(key)
    }
}

#[async_trait]
impl Tier for MemoryTier {
    fn kind(&self) -> TierKind {
        TierKind::Memory
    }

    async fn get_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        self.store.lock().get_entry(key)
    }

    async fn put(&self, key: &str, data: Value, ttl_ms: u64) {
        self.store.lock().set(key, data, ttl_ms);
    }

    async fn delete(&self, key: &str) -> bool {
        self.store.lock().delete(key)
    }

    async fn clear(&self) {
        self.store.lock().clear();
    }

    async fn has(&self, key: &str) -> bool {
        self.store.lock().has(key)
    }

    async fn keys(&self) -> Vec<String> {
        self.store.lock().keys()
    }

    async fn size_info(&self) -> SizeInfo {
        let store = self.store.lock();
        SizeInfo {
            entries: store.len(),
            bytes: store.total_size(),
        }
    }

    async fn purge_expired(&self) -> usize {
        self.store.lock().purge_expired()
    }
}
