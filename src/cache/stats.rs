//! Cache Statistics Module
//!
//! Tracks per-tier hits and misses and builds the snapshot callers see.

use serde::Serialize;

use crate::cache::TierKind;

// == Tier Counters ==
/// Hit/miss counters accumulated by the cache manager.
///
/// Every tier probe records exactly one hit or miss against its tier.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TierCounters {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub persistent_hits: u64,
    pub persistent_misses: u64,
    pub bulk_hits: u64,
    pub bulk_misses: u64,
}

impl TierCounters {
    // == Constructor ==
    /// Creates a new TierCounters with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Record Hit ==
    /// Increments the hit counter of `tier`.
    pub fn record_hit(&mut self, tier: TierKind) {
        match tier {
            TierKind::Memory => self.memory_hits += 1,
            TierKind::Persistent => self.persistent_hits += 1,
            TierKind::Bulk => self.bulk_hits += 1,
        }
    }

    // == Record Miss ==
    /// Increments the miss counter of `tier`.
    pub fn record_miss(&mut self, tier: TierKind) {
        match tier {
            TierKind::Memory => self.memory_misses += 1,
            TierKind::Persistent => self.persistent_misses += 1,
            TierKind::Bulk => self.bulk_misses += 1,
        }
    }

    pub fn total_hits(&self) -> u64 {
        self.memory_hits + self.persistent_hits + self.bulk_hits
    }

    /// Number of tier probes, hit or miss.
    pub fn total_requests(&self) -> u64 {
        self.total_hits() + self.memory_misses + self.persistent_misses + self.bulk_misses
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / requests, or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.total_hits() as f64 / total as f64
        }
    }

    // == Reset ==
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

// == Cache Stats ==
/// Point-in-time snapshot of cache performance.
///
/// Size and entry count come from the memory tier's running totals.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub memory_misses: u64,
    pub persistent_hits: u64,
    pub persistent_misses: u64,
    pub bulk_hits: u64,
    pub bulk_misses: u64,
    /// Entries evicted from the memory tier by LRU pressure
    pub evictions: u64,
    /// Estimated bytes held by the memory tier
    pub total_size: usize,
    /// Entries held by the memory tier
    pub entry_count: usize,
    /// Hits divided by tier probes
    pub hit_rate: f64,
}

impl CacheStats {
    /// Builds a snapshot from counters and memory tier totals.
    pub fn snapshot(
        counters: &TierCounters,
        evictions: u64,
        total_size: usize,
        entry_count: usize,
    ) -> Self {
        Self {
            memory_hits: counters.memory_hits,
            memory_misses: counters.memory_misses,
            persistent_hits: counters.persistent_hits,
            persistent_misses: counters.persistent_misses,
            bulk_hits: counters.bulk_hits,
            bulk_misses: counters.bulk_misses,
            evictions,
            total_size,
            entry_count,
            hit_rate: counters.hit_rate(),
        }
    }

    pub fn total_hits(&self) -> u64 {
        self.memory_hits + self.persistent_hits + self.bulk_hits
    }

    pub fn total_misses(&self) -> u64 {
        self.memory_misses + self.persistent_misses + self.bulk_misses
    }
}
