//! Cache Manager Module
//!
//! Orchestrates the memory, persistent and bulk tiers behind one contract.
//!
//! Reads probe the tiers fastest-first and copy hits into the faster tiers
//! they skipped. Writes fan out to every applicable tier, each tier absorbing
//! its own failures. Concurrent callers are only ordered per tier: two racing
//! `set` calls for one key may leave the tiers disagreeing until the next
//! `get` promotes a single copy upward.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::{BulkBackend, MemoryBulkStorage, MemoryStorage, StorageBackend};
use crate::cache::{
    estimate_size, now_ms, BulkStore, CacheEntry, CacheStats, MemoryTier, PersistentStore,
    SizeInfo, Tier, TierCounters, TierKind,
};
use crate::config::{merge_config, CacheConfig, CacheConfigPatch};

// == Cache Manager ==
/// The single entry point callers use to reach the cache.
///
/// All operations are infallible: a failing tier degrades to a miss, `false`
/// or a skipped write.
pub struct CacheManager {
    config: RwLock<CacheConfig>,
    memory: MemoryTier,
    persistent: PersistentStore,
    bulk: BulkStore,
    counters: Mutex<TierCounters>,
}

impl CacheManager {
    /// Creates a manager whose persistent and bulk tiers live in process memory.
    pub fn new(config: CacheConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> CacheManagerBuilder {
        CacheManagerBuilder::default()
    }

    fn current_config(&self) -> CacheConfig {
        self.config.read().clone()
    }

    /// Enabled tiers, fastest first.
    fn enabled_tiers(&self, config: &CacheConfig) -> Vec<&dyn Tier> {
        let mut tiers: Vec<&dyn Tier> = Vec::with_capacity(3);
        tiers.push(&self.memory);
        if config.enable_persistence {
            tiers.push(&self.persistent);
        }
        if config.enable_bulk_store {
            tiers.push(&self.bulk);
        }
        tiers
    }

    fn record(&self, tier: TierKind, hit: bool) {
        let mut counters = self.counters.lock();
        if hit {
            counters.record_hit(tier);
        } else {
            counters.record_miss(tier);
        }
    }

    /// Copies a hit into a faster tier, keeping the deadline of the source entry.
    async fn promote(&self, target: &dyn Tier, entry: &CacheEntry<Value>) {
        let remaining = entry.remaining_ttl(now_ms());
        if remaining == 0 {
            return;
        }
        debug!(key = %entry.key, tier = %target.kind(), remaining, "promoting entry");
        target.put(&entry.key, entry.data.clone(), remaining).await;
    }

    // == Get ==
    /// Retrieves a value and deserializes it into `T`.
    ///
    /// A stored value that does not fit `T` is reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get_value(key).await?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(err) => {
                warn!(key, error = %err, "cached value has an unexpected shape");
                None
            }
        }
    }

    /// Retrieves the raw JSON value stored under `key`.
    pub async fn get_value(&self, key: &str) -> Option<Value> {
        let config = self.current_config();

        let entry = self.memory.get_entry(key).await;
        self.record(TierKind::Memory, entry.is_some());
        if let Some(entry) = entry {
            return Some(entry.data);
        }

        if config.enable_persistence {
            let entry = self.persistent.get_entry(key).await;
            self.record(TierKind::Persistent, entry.is_some());
            if let Some(entry) = entry {
                self.promote(&self.memory, &entry).await;
                return Some(entry.data);
            }
        }

        if config.enable_bulk_store {
            let entry = self.bulk.get_entry(key).await;
            self.record(TierKind::Bulk, entry.is_some());
            if let Some(entry) = entry {
                self.promote(&self.memory, &entry).await;
                if config.enable_persistence {
                    self.promote(&self.persistent, &entry).await;
                }
                return Some(entry.data);
            }
        }

        None
    }

    // == Set ==
    /// Stores a value in every applicable tier.
    ///
    /// `ttl` of `None` or zero uses the configured default. The bulk tier only
    /// receives values whose estimated size exceeds `bulk_threshold_bytes`;
    /// a smaller value replaces the key by clearing any earlier bulk copy.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, data: &T, ttl: Option<Duration>) {
        let value = match serde_json::to_value(data) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, error = %err, "value cannot be cached");
                return;
            }
        };
        self.set_value(key, value, ttl).await;
    }

    /// Stores an already serialized value.
    pub async fn set_value(&self, key: &str, value: Value, ttl: Option<Duration>) {
        let config = self.current_config();
        let ttl_ms = ttl
            .map(|ttl| ttl.as_millis().min(u64::MAX as u128) as u64)
            .filter(|ms| *ms > 0)
            .unwrap_or(config.default_ttl_ms);
        let oversized = estimate_size(&value) > config.bulk_threshold_bytes;

        self.memory.put(key, value.clone(), ttl_ms).await;
        if config.enable_persistence {
            self.persistent.put(key, value.clone(), ttl_ms).await;
        }
        if config.enable_bulk_store {
            if oversized {
                self.bulk.put(key, value, ttl_ms).await;
            } else {
                // A smaller overwrite must not leave an older bulk copy behind
                self.bulk.delete(key).await;
            }
        }
    }

    // == Delete ==
    /// Removes `key` from every enabled tier. True if any tier held it.
    pub async fn delete(&self, key: &str) -> bool {
        let config = self.current_config();
        let mut found = false;
        for tier in self.enabled_tiers(&config) {
            found |= tier.delete(key).await;
        }
        found
    }

    // == Has ==
    /// Checks for a live entry in any enabled tier.
    ///
    /// Expired entries met on the way are removed. Counters are left alone.
    pub async fn has(&self, key: &str) -> bool {
        let config = self.current_config();
        for tier in self.enabled_tiers(&config) {
            if tier.has(key).await {
                return true;
            }
        }
        false
    }

    // == Clear ==
    /// Empties every enabled tier and resets statistics.
    pub async fn clear(&self) {
        let config = self.current_config();
        for tier in self.enabled_tiers(&config) {
            tier.clear().await;
        }
        self.counters.lock().reset();
        info!("cache cleared");
    }

    // == Keys ==
    /// Sorted union of keys held by the enabled tiers.
    pub async fn keys(&self) -> Vec<String> {
        let config = self.current_config();
        let mut keys = BTreeSet::new();
        for tier in self.enabled_tiers(&config) {
            keys.extend(tier.keys().await);
        }
        keys.into_iter().collect()
    }

    // == Stats ==
    /// Returns a snapshot of counters and memory tier totals.
    pub fn stats(&self) -> CacheStats {
        let counters = self.counters.lock().clone();
        let (total_size, entry_count, evictions) = self.memory.totals();
        CacheStats::snapshot(&counters, evictions, total_size, entry_count)
    }

    /// Entry count and bytes per enabled tier.
    pub async fn tier_sizes(&self) -> BTreeMap<TierKind, SizeInfo> {
        let config = self.current_config();
        let mut sizes = BTreeMap::new();
        for tier in self.enabled_tiers(&config) {
            sizes.insert(tier.kind(), tier.size_info().await);
        }
        sizes
    }

    // == Config ==
    pub fn config(&self) -> CacheConfig {
        self.current_config()
    }

    /// Merges `patch` into the configuration and returns the result.
    ///
    /// New limits apply from the next write on; held entries are not resized
    /// or evicted. `namespace` and `bulk_open_timeout_ms` are bound when the
    /// tiers are built and are kept as they are.
    pub fn update_config(&self, patch: &CacheConfigPatch) -> CacheConfig {
        let updated = {
            let mut config = self.config.write();
            let mut merged = merge_config(&config, patch);
            if merged.namespace != config.namespace
                || merged.bulk_open_timeout_ms != config.bulk_open_timeout_ms
            {
                warn!("namespace and bulk open timeout cannot change at runtime, ignoring");
                merged.namespace = config.namespace.clone();
                merged.bulk_open_timeout_ms = config.bulk_open_timeout_ms;
            }
            *config = merged;
            config.clone()
        };

        self.memory
            .set_limits(updated.max_memory_size, updated.max_memory_entries);
        self.persistent
            .set_eviction_ratio(updated.quota_eviction_ratio);
        info!(
            max_memory_size = updated.max_memory_size,
            max_memory_entries = updated.max_memory_entries,
            persistence = updated.enable_persistence,
            bulk = updated.enable_bulk_store,
            "cache configuration updated"
        );
        updated
    }

    // == Cleanup ==
    /// Sweeps expired entries from every enabled tier.
    ///
    /// Returns the number of entries removed across tiers.
    pub async fn cleanup(&self) -> usize {
        let config = self.current_config();
        let mut removed = 0;
        for tier in self.enabled_tiers(&config) {
            let count = tier.purge_expired().await;
            if count > 0 {
                debug!(tier = %tier.kind(), count, "purged expired entries");
            }
            removed += count;
        }
        removed
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

// == Builder ==
/// Wires a [`CacheManager`] with explicitly chosen backends.
///
/// Backends left unset default to in-memory stores.
#[derive(Default)]
pub struct CacheManagerBuilder {
    config: CacheConfig,
    storage: Option<Arc<dyn StorageBackend>>,
    bulk: Option<Arc<dyn BulkBackend>>,
}

impl CacheManagerBuilder {
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Backend for the persistent tier.
    pub fn persistent_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(backend);
        self
    }

    /// Backend for the bulk tier.
    pub fn bulk_backend(mut self, backend: Arc<dyn BulkBackend>) -> Self {
        self.bulk = Some(backend);
        self
    }

    pub fn build(self) -> CacheManager {
        let config = self.config;
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let bulk = self
            .bulk
            .unwrap_or_else(|| Arc::new(MemoryBulkStorage::new()));

        CacheManager {
            memory: MemoryTier::new(config.max_memory_size, config.max_memory_entries),
            persistent: PersistentStore::new(
                storage,
                config.namespace.clone(),
                config.quota_eviction_ratio,
            ),
            bulk: BulkStore::new(bulk, Duration::from_millis(config.bulk_open_timeout_ms)),
            counters: Mutex::new(TierCounters::new()),
            config: RwLock::new(config),
        }
    }
}
