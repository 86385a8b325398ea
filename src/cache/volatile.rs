//! Volatile Store Module
//!
//! The in-process tier: a HashMap of entries with LRU tracking, TTL expiry and
//! a running byte total checked against the configured budgets.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::cache::entry::{is_expired, now_ms};
use crate::cache::{CacheEntry, LruTracker};

// == Volatile Store ==
/// Bounded in-memory store with LRU eviction and TTL support.
///
/// `running_size` always equals the sum of `size` over held entries. After a
/// `set` returns, `len() <= max_entries` and `total_size() <= max_size`, with
/// one exception: a single entry larger than `max_size` is still admitted and
/// overshoots the byte budget by itself until it is evicted.
#[derive(Debug)]
pub struct VolatileStore<T> {
    /// Key-value storage
    entries: HashMap<String, CacheEntry<T>>,
    /// LRU access tracker
    lru: LruTracker,
    /// Sum of entry sizes
    running_size: usize,
    /// Byte budget
    max_size: usize,
    /// Entry budget
    max_entries: usize,
    /// Entries dropped by LRU pressure
    evictions: u64,
}

impl<T: Clone + Serialize> VolatileStore<T> {
    // == Constructor ==
    /// Creates a new VolatileStore with the given byte and entry budgets.
    pub fn new(max_size: usize, max_entries: usize) -> Self {
        Self {
            entries: HashMap::new(),
            lru: LruTracker::new(),
            running_size: 0,
            max_size,
            max_entries: max_entries.max(1),
            evictions: 0,
        }
    }

    /// Replaces the budgets used by later writes. Held entries are untouched.
    pub fn set_limits(&mut self, max_size: usize, max_entries: usize) {
        self.max_size = max_size;
        self.max_entries = max_entries.max(1);
    }

    // == Set ==
    /// Stores a value, replacing any previous entry under the same key.
    ///
    /// Expired entries are dropped first, then least recently used ones until
    /// the new entry fits both budgets.
    pub fn set(&mut self, key: &str, data: T, ttl_ms: u64) {
        self.delete(key);

        let entry = CacheEntry::wrap(key, data, ttl_ms);
        self.evict_if_needed(entry.size);

        self.running_size += entry.size;
        self.lru.touch(key);
        self.entries.insert(key.to_string(), entry);
    }

    // == Get ==
    /// Retrieves a value by key.
    ///
    /// Expired entries are removed and reported as absent. A hit bumps the
    /// entry's access stats and makes it the most recently used.
    pub fn get(&mut self, key: &str) -> Option<T> {
        self.get_entry(key).map(|entry| entry.data)
    }

    /// Like [`get`](Self::get) but returns a copy of the whole entry.
    pub fn get_entry(&mut self, key: &str) -> Option<CacheEntry<T>> {
        let now = now_ms();
        if is_expired(self.entries.get(key)?, now) {
            self.delete(key);
            return None;
        }

        let entry = self.entries.get_mut(key)?;
        entry.touch(now);
        self.lru.touch(key);
        Some(entry.clone())
    }

    // == Has ==
    /// Checks for a live entry without touching its recency.
    pub fn has(&mut self, key: &str) -> bool {
        match self.entries.get(key) {
            Some(entry) if is_expired(entry, now_ms()) => {
                self.delete(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }

    // == Delete ==
    /// Removes an entry by key, returning whether it existed.
    pub fn delete(&mut self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some(entry) => {
                self.lru.remove(key);
                self.running_size -= entry.size;
                true
            }
            None => false,
        }
    }

    // == Evict If Needed ==
    /// Makes room for an entry of `incoming_size` bytes.
    pub fn evict_if_needed(&mut self, incoming_size: usize) {
        self.purge_expired();

        while (self.running_size + incoming_size > self.max_size
            || self.entries.len() >= self.max_entries)
            && !self.entries.is_empty()
        {
            let Some(victim) = self.lru.evict_oldest() else {
                break;
            };
            if let Some(entry) = self.entries.remove(&victim) {
                self.running_size -= entry.size;
                self.evictions += 1;
                debug!(key = %victim, size = entry.size, "evicted least recently used entry");
            }
        }
    }

    // == Purge Expired ==
    /// Removes all expired entries from the store.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&mut self) -> usize {
        let now = now_ms();
        let expired_keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| is_expired(entry, now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired_keys {
            self.delete(key);
        }
        expired_keys.len()
    }

    // == Clear ==
    /// Drops every entry and resets the running total, access counter and
    /// eviction count.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.lru.clear();
        self.running_size = 0;
        self.evictions = 0;
    }

    /// Whether `key` is held, expired or not, without side effects.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys currently held, expired or not.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Sum of estimated entry sizes in bytes.
    pub fn total_size(&self) -> usize {
        self.running_size
    }

    /// Entries evicted by LRU pressure since creation.
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    // == Length ==
    /// Returns the current number of entries in the store.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
