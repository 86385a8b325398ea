//! Persistent Store Module
//!
//! The durable tier. Entries are serialized whole (value plus metadata) and
//! written to a [`StorageBackend`] under `namespace + key`, so a store shared
//! with unrelated data is never touched outside the namespace.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::backend::StorageBackend;
use crate::cache::entry::{is_expired, now_ms};
use crate::cache::{CacheEntry, SizeInfo, Tier, TierKind};
use crate::error::{CacheError, Result};

/// Outcome of reading one namespaced record.
enum Record {
    Missing,
    Corrupt,
    Found(CacheEntry<Value>),
}

// == Persistent Store ==
/// Best-effort durable tier over a synchronous string store.
///
/// Every failure degrades to a miss or a dropped write. A backend that
/// reports itself unavailable disables the tier for the life of the store.
pub struct PersistentStore {
    backend: Arc<dyn StorageBackend>,
    prefix: String,
    /// Fraction of records dropped when the backend reports a full quota
    eviction_ratio: RwLock<f64>,
    disabled: AtomicBool,
}

impl PersistentStore {
    // == Constructor ==
    pub fn new(backend: Arc<dyn StorageBackend>, namespace: impl Into<String>, eviction_ratio: f64) -> Self {
        Self {
            backend,
            prefix: namespace.into(),
            eviction_ratio: RwLock::new(eviction_ratio.clamp(0.0, 1.0)),
            disabled: AtomicBool::new(false),
        }
    }

    pub fn set_eviction_ratio(&self, ratio: f64) {
        *self.eviction_ratio.write() = ratio.clamp(0.0, 1.0);
    }

    /// False once the backend has reported itself unavailable.
    pub fn is_available(&self) -> bool {
        !self.disabled.load(Ordering::Relaxed)
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    // == Error Absorption ==
    /// Logs a backend failure and disables the tier if it is unrecoverable.
    fn absorb(&self, op: &str, err: CacheError) {
        if err.is_unavailable() {
            if !self.disabled.swap(true, Ordering::Relaxed) {
                warn!(error = %err, "persistent tier unavailable, disabling it");
            }
        } else {
            warn!(op, error = %err, "persistent tier operation failed");
        }
    }

    fn read(&self, full_key: &str) -> Result<Record> {
        let Some(text) = self.backend.get_item(full_key)? else {
            return Ok(Record::Missing);
        };
        match serde_json::from_str(&text) {
            Ok(entry) => Ok(Record::Found(entry)),
            Err(err) => {
                warn!(key = %full_key, error = %err, "dropping corrupt persistent record");
                self.backend.remove_item(full_key)?;
                Ok(Record::Corrupt)
            }
        }
    }

    fn write(&self, full_key: &str, entry: &CacheEntry<Value>) -> Result<()> {
        let text = serde_json::to_string(entry)?;
        self.backend.set_item(full_key, &text)
    }

    /// Backend keys that belong to this namespace.
    fn namespaced_keys(&self) -> Result<Vec<String>> {
        Ok(self
            .backend
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(&self.prefix))
            .collect())
    }

    /// Reads every decodable record in the namespace. Corrupt ones are removed.
    fn scan(&self) -> Result<Vec<(String, CacheEntry<Value>)>> {
        let mut entries = Vec::new();
        for full_key in self.namespaced_keys()? {
            if let Record::Found(entry) = self.read(&full_key)? {
                entries.push((full_key, entry));
            }
        }
        Ok(entries)
    }

    // == Evict LRU ==
    /// Removes the least recently accessed share of the namespace.
    ///
    /// Returns how many records were removed.
    fn evict_lru(&self) -> Result<usize> {
        let mut entries = self.scan()?;
        entries.sort_by_key(|(_, entry)| entry.last_accessed);

        let ratio = *self.eviction_ratio.read();
        let count = ((entries.len() as f64) * ratio).ceil() as usize;
        for (full_key, _) in entries.iter().take(count) {
            self.backend.remove_item(full_key)?;
        }
        info!(evicted = count, total = entries.len(), "persistent tier evicted by quota");
        Ok(count)
    }

    fn store(&self, key: &str, data: Value, ttl_ms: u64) -> Result<()> {
        let full_key = self.full_key(key);
        let entry = CacheEntry::wrap(key, data, ttl_ms);

        match self.write(&full_key, &entry) {
            Err(CacheError::QuotaExceeded(reason)) => {
                debug!(key, %reason, "persistent quota exceeded, evicting before retry");
                self.evict_lru()?;
                if let Err(err) = self.write(&full_key, &entry) {
                    warn!(key, error = %err, "persistent write dropped after eviction");
                }
                Ok(())
            }
            other => other,
        }
    }

    fn lookup(&self, key: &str) -> Result<Option<CacheEntry<Value>>> {
        let full_key = self.full_key(key);
        let Record::Found(mut entry) = self.read(&full_key)? else {
            return Ok(None);
        };

        let now = now_ms();
        if is_expired(&entry, now) {
            self.backend.remove_item(&full_key)?;
            return Ok(None);
        }

        entry.touch(now);
        // Keep the stored lastAccessed current for later LRU scans
        if let Err(err) = self.write(&full_key, &entry) {
            debug!(key, error = %err, "could not refresh persistent access stats");
        }
        Ok(Some(entry))
    }

    fn peek(&self, key: &str) -> Result<bool> {
        let full_key = self.full_key(key);
        match self.read(&full_key)? {
            Record::Found(entry) if is_expired(&entry, now_ms()) => {
                self.backend.remove_item(&full_key)?;
                Ok(false)
            }
            Record::Found(_) => Ok(true),
            Record::Missing | Record::Corrupt => Ok(false),
        }
    }

    fn remove_expired(&self) -> Result<usize> {
        let now = now_ms();
        let mut removed = 0;
        for (full_key, entry) in self.scan()? {
            if is_expired(&entry, now) {
                self.backend.remove_item(&full_key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Runs `op` unless the tier is disabled, absorbing any error into `fallback`.
    fn guarded<R>(&self, name: &str, fallback: R, op: impl FnOnce() -> Result<R>) -> R {
        if !self.is_available() {
            return fallback;
        }
        match op() {
            Ok(value) => value,
            Err(err) => {
                self.absorb(name, err);
                fallback
            }
        }
    }
}

#[async_trait]
impl Tier for PersistentStore {
    fn kind(&self) -> TierKind {
        TierKind::Persistent
    }

    async fn get_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        self.guarded("get", None, || self.lookup(key))
    }

    async fn put(&self, key: &str, data: Value, ttl_ms: u64) {
        self.guarded("set", (), || self.store(key, data, ttl_ms))
    }

    async fn delete(&self, key: &str) -> bool {
        self.guarded("delete", false, || self.backend.remove_item(&self.full_key(key)))
    }

    async fn clear(&self) {
        self.guarded("clear", (), || {
            for full_key in self.namespaced_keys()? {
                self.backend.remove_item(&full_key)?;
            }
            Ok(())
        })
    }

    async fn has(&self, key: &str) -> bool {
        self.guarded("has", false, || self.peek(key))
    }

    async fn keys(&self) -> Vec<String> {
        self.guarded("keys", Vec::new(), || {
            Ok(self
                .namespaced_keys()?
                .into_iter()
                .map(|full_key| full_key[self.prefix.len()..].to_string())
                .collect())
        })
    }

    async fn size_info(&self) -> SizeInfo {
        self.guarded("size_info", SizeInfo::default(), || {
            let entries = self.scan()?;
            Ok(SizeInfo {
                entries: entries.len(),
                bytes: entries.iter().map(|(_, entry)| entry.size).sum(),
            })
        })
    }

    async fn purge_expired(&self) -> usize {
        self.guarded("purge_expired", 0, || self.remove_expired())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryStorage;
    use serde_json::json;
    use std::time::Duration;

    const NS: &str = "test_ns_";
    const TTL: u64 = 60_000;

    fn store_with(backend: Arc<MemoryStorage>) -> PersistentStore {
        PersistentStore::new(backend, NS, 0.25)
    }

    /// Backend whose every call reports the storage API as missing.
    struct MissingStorage;

    impl StorageBackend for MissingStorage {
        fn get_item(&self, _: &str) -> Result<Option<String>> {
            Err(CacheError::Unavailable("storage disabled".to_string()))
        }
        fn set_item(&self, _: &str, _: &str) -> Result<()> {
            Err(CacheError::Unavailable("storage disabled".to_string()))
        }
        fn remove_item(&self, _: &str) -> Result<bool> {
            Err(CacheError::Unavailable("storage disabled".to_string()))
        }
        fn keys(&self) -> Result<Vec<String>> {
            Err(CacheError::Unavailable("storage disabled".to_string()))
        }
    }

    #[tokio::test]
    async fn test_set_and_get_under_prefix() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone());

        store.put("a", json!({"n": 1}), TTL).await;

        assert!(backend.get_item("test_ns_a").unwrap().is_some());
        let entry = store.get_entry("a").await.unwrap();
        assert_eq!(entry.data, json!({"n": 1}));
        assert_eq!(entry.key, "a");
    }

    #[tokio::test]
    async fn test_get_refreshes_stored_access_stats() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone());

        store.put("a", json!(1), TTL).await;
        store.get_entry("a").await;

        let text = backend.get_item("test_ns_a").unwrap().unwrap();
        let stored: CacheEntry<Value> = serde_json::from_str(&text).unwrap();
        assert_eq!(stored.access_count, 2);
    }

    #[tokio::test]
    async fn test_expired_entry_is_removed() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone());

        store.put("a", json!(1), 50).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(store.get_entry("a").await.is_none());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_record_is_miss_and_removed() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone());

        backend.set_item("test_ns_bad", "{not json").unwrap();

        assert!(store.get_entry("bad").await.is_none());
        assert!(!store.has("bad").await);
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_clear_keeps_foreign_keys() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone());

        backend.set_item("user_settings", "{\"theme\":\"dark\"}").unwrap();
        store.put("a", json!(1), TTL).await;
        store.put("b", json!(2), TTL).await;

        let mut keys = store.keys().await;
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);

        store.clear().await;

        assert!(store.keys().await.is_empty());
        assert_eq!(
            backend.get_item("user_settings").unwrap(),
            Some("{\"theme\":\"dark\"}".to_string())
        );
    }

    #[tokio::test]
    async fn test_delete_reports_presence() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend);

        store.put("a", json!(1), TTL).await;

        assert!(store.delete("a").await);
        assert!(!store.delete("a").await);
    }

    #[tokio::test]
    async fn test_quota_evicts_oldest_and_retries() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend.clone());

        for key in ["k1", "k2", "k3", "k4"] {
            store.put(key, json!("payload"), TTL).await;
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        // Touch k1 so k2 becomes the least recently accessed
        store.get_entry("k1").await;
        backend.set_quota(Some(backend.usage()));

        store.put("k5", json!("payload"), TTL).await;

        assert!(store.get_entry("k5").await.is_some(), "Retry should succeed");
        assert!(store.get_entry("k2").await.is_none(), "Oldest record evicted");
        assert!(store.has("k1").await);
        assert!(store.has("k3").await);
        assert!(store.has("k4").await);
    }

    #[tokio::test]
    async fn test_quota_failure_after_retry_is_dropped() {
        let backend = Arc::new(MemoryStorage::with_quota(10));
        let store = store_with(backend.clone());

        store.put("a", json!("far too large for the quota"), TTL).await;

        assert!(store.get_entry("a").await.is_none());
        assert!(store.is_available(), "Quota errors do not disable the tier");
    }

    #[tokio::test]
    async fn test_unavailable_backend_disables_tier() {
        let store = PersistentStore::new(Arc::new(MissingStorage), NS, 0.25);

        store.put("a", json!(1), TTL).await;

        assert!(!store.is_available());
        assert!(store.get_entry("a").await.is_none());
        assert!(!store.delete("a").await);
        assert!(store.keys().await.is_empty());
        assert_eq!(store.size_info().await, SizeInfo::default());
    }

    #[tokio::test]
    async fn test_purge_and_size_info() {
        let backend = Arc::new(MemoryStorage::new());
        let store = store_with(backend);

        store.put("short", json!(1), 50).await;
        store.put("long", json!(2), TTL).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(store.purge_expired().await, 1);
        let info = store.size_info().await;
        assert_eq!(info.entries, 1);
        assert!(info.bytes > 0);
    }
}
