//! In-memory backends
//!
//! Process-local stand-ins for durable storage. Both accept an optional byte
//! capacity so quota handling can be exercised without touching the disk.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{item_footprint, BulkBackend, BulkRecord, StorageBackend};
use crate::error::{CacheError, Result};

// == Memory Storage ==
/// String key/value store held in process memory.
///
/// Each item is charged `(key chars + value chars) * 2` bytes against the
/// optional quota.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
    quota: RwLock<Option<usize>>,
}

impl MemoryStorage {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that rejects writes past `quota` bytes.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
            quota: RwLock::new(Some(quota)),
        }
    }

    /// Replaces the quota. Existing items are kept even when over the new limit.
    pub fn set_quota(&self, quota: Option<usize>) {
        *self.quota.write() = quota;
    }

    /// Bytes currently charged against the quota.
    pub fn usage(&self) -> usize {
        self.items
            .read()
            .iter()
            .map(|(k, v)| item_footprint(k, v))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.read().get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut items = self.items.write();

        if let Some(quota) = *self.quota.read() {
            let others: usize = items
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(k, v)| item_footprint(k, v))
                .sum();
            let needed = others + item_footprint(key, value);
            if needed > quota {
                return Err(CacheError::QuotaExceeded(format!(
                    "{} bytes needed, quota is {}",
                    needed, quota
                )));
            }
        }

        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<bool> {
        Ok(self.items.write().remove(key).is_some())
    }

    fn keys(&self) -> Result<Vec<String>> {
        Ok(self.items.read().keys().cloned().collect())
    }
}

// == Memory Bulk Storage ==
/// Record store held in process memory, bounded by summed record sizes.
#[derive(Debug, Default)]
pub struct MemoryBulkStorage {
    records: RwLock<HashMap<String, BulkRecord>>,
    capacity: Option<usize>,
}

impl MemoryBulkStorage {
    /// Creates an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that rejects records once their sizes exceed `capacity`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl BulkBackend for MemoryBulkStorage {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<BulkRecord>> {
        Ok(self.records.read().get(key).cloned())
    }

    async fn put(&self, record: BulkRecord) -> Result<()> {
        let mut records = self.records.write();

        if let Some(capacity) = self.capacity {
            let others: usize = records
                .values()
                .filter(|r| r.key != record.key)
                .map(|r| r.size)
                .sum();
            if others + record.size > capacity {
                return Err(CacheError::QuotaExceeded(format!(
                    "bulk capacity of {} bytes reached",
                    capacity
                )));
            }
        }

        records.insert(record.key.clone(), record);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.records.write().remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.records.read().keys().cloned().collect())
    }

    async fn get_all(&self) -> Result<Vec<BulkRecord>> {
        Ok(self.records.read().values().cloned().collect())
    }
}
