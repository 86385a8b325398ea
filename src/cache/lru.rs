//! LRU Tracker Module
//!
//! Implements Least Recently Used tracking for cache eviction.

use std::collections::{BTreeSet, HashMap};

// == LRU Tracker ==
/// Tracks access order for LRU eviction strategy.
///
/// Every touch assigns the key a fresh stamp from a monotonically increasing
/// counter. Stamps are mirrored in an ordered set of `(stamp, key)` pairs so
/// the least recently used key is the first element. Equal stamps fall back
/// to key order.
#[derive(Debug, Default)]
pub struct LruTracker {
    /// Current stamp of each tracked key
    stamps: HashMap<String, u64>,
    /// Keys ordered by stamp, oldest first
    order: BTreeSet<(u64, String)>,
    /// Next stamp to hand out
    counter: u64,
}

impl LruTracker {
    // == Constructor ==
    /// Creates a new empty LRU tracker.
    pub fn new() -> Self {
        Self::default()
    }

    // == Touch ==
    /// Marks a key as most recently used.
    pub fn touch(&mut self, key: &str) {
        let stamp = self.counter;
        self.counter += 1;

        if let Some(old) = self.stamps.insert(key.to_string(), stamp) {
            self.order.remove(&(old, key.to_string()));
        }
        self.order.insert((stamp, key.to_string()));
    }

    // == Remove ==
    /// Removes a key from the tracker.
    pub fn remove(&mut self, key: &str) {
        if let Some(stamp) = self.stamps.remove(key) {
            self.order.remove(&(stamp, key.to_string()));
        }
    }

    // == Evict Oldest ==
    /// Returns and removes the least recently used key.
    ///
    /// Returns None if tracker is empty.
    pub fn evict_oldest(&mut self) -> Option<String> {
        let (_, key) = self.order.pop_first()?;
        self.stamps.remove(&key);
        Some(key)
    }

    // == Peek Oldest ==
    /// Returns the least recently used key without removing it.
    #[cfg(test)]
    fn peek_oldest(&self) -> Option<&str> {
        self.order.first().map(|(_, key)| key.as_str())
    }

    /// Returns the stamp assigned by the latest touch of `key`.
    #[cfg(test)]
    fn stamp(&self, key: &str) -> Option<u64> {
        self.stamps.get(key).copied()
    }

    // == Clear ==
    /// Forgets all keys and restarts the stamp counter.
    pub fn clear(&mut self) {
        self.stamps.clear();
        self.order.clear();
        self.counter = 0;
    }

    // == Length ==
    /// Returns the number of tracked keys.
    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    // == Is Empty ==
    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    // == Contains ==
    /// Checks if a key is being tracked.
    #[cfg(test)]
    fn contains(&self, key: &str) -> bool {
        self.stamps.contains_key(key)
    }

    #[cfg(test)]
    fn insert_with_stamp(&mut self, key: &str, stamp: u64) {
        self.remove(key);
        self.stamps.insert(key.to_string(), stamp);
        self.order.insert((stamp, key.to_string()));
    }
}
