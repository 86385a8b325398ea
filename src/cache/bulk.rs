//! Bulk Store Module
//!
//! The asynchronous tier for oversized values. The backing store is opened
//! lazily on first use; concurrent first callers share a single open attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::backend::{BulkBackend, BulkRecord};
use crate::cache::entry::{is_expired, now_ms};
use crate::cache::{CacheEntry, SizeInfo, Tier, TierKind};
use crate::error::{CacheError, Result};

// == Bulk Store ==
/// Best-effort tier over an asynchronous record store.
///
/// If the store cannot be opened within `open_timeout`, or reports itself
/// unavailable later on, the tier is disabled for the life of the process
/// and every operation becomes a no-op.
pub struct BulkStore {
    backend: Arc<dyn BulkBackend>,
    ready: OnceCell<bool>,
    open_timeout: Duration,
    disabled: AtomicBool,
}

impl BulkStore {
    pub fn new(backend: Arc<dyn BulkBackend>, open_timeout: Duration) -> Self {
        Self {
            backend,
            ready: OnceCell::new(),
            open_timeout,
            disabled: AtomicBool::new(false),
        }
    }

    // == Ensure Open ==
    /// Opens the backing store once. Returns whether the tier is usable.
    async fn ensure_open(&self) -> bool {
        if self.disabled.load(Ordering::Relaxed) {
            return false;
        }

        let opened = *self
            .ready
            .get_or_init(|| async {
                match tokio::time::timeout(self.open_timeout, self.backend.open()).await {
                    Ok(Ok(())) => {
                        info!("bulk tier opened");
                        true
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, "bulk tier failed to open, disabling it");
                        false
                    }
                    Err(_) => {
                        let err = CacheError::Timeout(self.open_timeout.as_millis() as u64);
                        warn!(error = %err, "bulk tier failed to open, disabling it");
                        false
                    }
                }
            })
            .await;

        if !opened {
            self.disabled.store(true, Ordering::Relaxed);
        }
        opened
    }

    /// Whether the store opened and has not been disabled since.
    pub async fn is_available(&self) -> bool {
        self.ensure_open().await
    }

    fn absorb(&self, op: &str, err: CacheError) {
        if err.is_unavailable() {
            if !self.disabled.swap(true, Ordering::Relaxed) {
                warn!(error = %err, "bulk tier unavailable, disabling it");
            }
        } else {
            warn!(op, error = %err, "bulk tier operation failed");
        }
    }

    // == Evict For ==
    /// Removes least recently accessed records until `needed` bytes are freed.
    async fn evict_for(&self, needed: usize) -> Result<usize> {
        let mut records = self.backend.get_all().await?;
        records.sort_by(|a, b| {
            a.last_accessed
                .cmp(&b.last_accessed)
                .then_with(|| a.key.cmp(&b.key))
        });

        let target = needed.max(1);
        let mut freed = 0;
        let mut removed = 0;
        for record in records {
            if freed >= target {
                break;
            }
            self.backend.delete(&record.key).await?;
            freed += record.size;
            removed += 1;
        }
        info!(removed, freed, "bulk tier evicted by quota");
        Ok(removed)
    }

    async fn store(&self, key: &str, data: Value, ttl_ms: u64) -> Result<()> {
        let record: BulkRecord = CacheEntry::wrap(key, data, ttl_ms);
        match self.backend.put(record.clone()).await {
            Err(CacheError::QuotaExceeded(reason)) => {
                debug!(key, %reason, "bulk quota exceeded, evicting before retry");
                self.evict_for(record.size).await?;
                if let Err(err) = self.backend.put(record).await {
                    warn!(key, error = %err, "bulk write dropped after eviction");
                }
                Ok(())
            }
            other => other,
        }
    }

    /// Reads a record, treating an unreadable one as absent and removing it.
    async fn read(&self, key: &str) -> Result<Option<BulkRecord>> {
        match self.backend.get(key).await {
            Err(CacheError::Corrupt(reason)) => {
                warn!(key, %reason, "dropping corrupt bulk record");
                self.backend.delete(key).await?;
                Ok(None)
            }
            other => other,
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<BulkRecord>> {
        let Some(mut record) = self.read(key).await? else {
            return Ok(None);
        };

        let now = now_ms();
        if is_expired(&record, now) {
            self.backend.delete(key).await?;
            return Ok(None);
        }

        record.touch(now);
        if let Err(err) = self.backend.put(record.clone()).await {
            debug!(key, error = %err, "could not refresh bulk access stats");
        }
        Ok(Some(record))
    }

    async fn peek(&self, key: &str) -> Result<bool> {
        match self.read(key).await? {
            Some(record) if is_expired(&record, now_ms()) => {
                self.backend.delete(key).await?;
                Ok(false)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn remove_expired(&self) -> Result<usize> {
        let now = now_ms();
        let mut removed = 0;
        for record in self.backend.get_all().await? {
            if is_expired(&record, now) {
                self.backend.delete(&record.key).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn measure(&self) -> Result<SizeInfo> {
        let records = self.backend.get_all().await?;
        Ok(SizeInfo {
            entries: records.len(),
            bytes: records.iter().map(|record| record.size).sum(),
        })
    }
}

#[async_trait]
impl Tier for BulkStore {
    fn kind(&self) -> TierKind {
        TierKind::Bulk
    }

    async fn get_entry(&self, key: &str) -> Option<CacheEntry<Value>> {
        if !self.ensure_open().await {
            return None;
        }
        self.lookup(key).await.unwrap_or_else(|err| {
            self.absorb("get", err);
            None
        })
    }

    async fn put(&self, key: &str, data: Value, ttl_ms: u64) {
        if !self.ensure_open().await {
            return;
        }
        if let Err(err) = self.store(key, data, ttl_ms).await {
            self.absorb("set", err);
        }
    }

    async fn delete(&self, key: &str) -> bool {
        if !self.ensure_open().await {
            return false;
        }
        self.backend.delete(key).await.unwrap_or_else(|err| {
            self.absorb("delete", err);
            false
        })
    }

    async fn clear(&self) {
        if !self.ensure_open().await {
            return;
        }
        if let Err(err) = self.backend.clear().await {
            self.absorb("clear", err);
        }
    }

    async fn has(&self, key: &str) -> bool {
        if !self.ensure_open().await {
            return false;
        }
        self.peek(key).await.unwrap_or_else(|err| {
            self.absorb("has", err);
            false
        })
    }

    async fn keys(&self) -> Vec<String> {
        if !self.ensure_open().await {
            return Vec::new();
        }
        self.backend.keys().await.unwrap_or_else(|err| {
            self.absorb("keys", err);
            Vec::new()
        })
    }

    async fn size_info(&self) -> SizeInfo {
        if !self.ensure_open().await {
            return SizeInfo::default();
        }
        self.measure().await.unwrap_or_else(|err| {
            self.absorb("size_info", err);
            SizeInfo::default()
        })
    }

    async fn purge_expired(&self) -> usize {
        if !self.ensure_open().await {
            return 0;
        }
        self.remove_expired().await.unwrap_or_else(|err| {
            self.absorb("purge_expired", err);
            0
        })
    }
}
