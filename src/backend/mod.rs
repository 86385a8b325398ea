//! Storage Backends
//!
//! The raw stores behind the persistent and bulk tiers.
//!
//! - [`StorageBackend`]: synchronous string key/value store with a quota,
//!   in the style of a browser's durable storage. Backs the persistent tier.
//! - [`BulkBackend`]: asynchronous record store that must be opened before
//!   use. Backs the bulk tier.
//!
//! Both come in an in-memory flavor and a file-backed flavor.

mod fs;
mod memory;

use async_trait::async_trait;
use serde_json::Value;

use crate::cache::CacheEntry;
use crate::error::Result;

pub use fs::{FileStorage, FsBulkStorage};
pub use memory::{MemoryBulkStorage, MemoryStorage};

/// Record type held by bulk backends.
pub type BulkRecord = CacheEntry<Value>;

/// Charge for one stored string pair, matching the UTF-16 size heuristic.
pub(crate) fn item_footprint(key: &str, value: &str) -> usize {
    (key.chars().count() + value.chars().count()) * 2
}

// == Storage Backend ==
/// Synchronous string key/value store.
///
/// Keys are opaque to the backend; namespacing is the caller's job. A write
/// that would exceed the backend's capacity fails with
/// [`CacheError::QuotaExceeded`](crate::error::CacheError::QuotaExceeded).
pub trait StorageBackend: Send + Sync {
    /// Reads the text stored under `key`.
    fn get_item(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, replacing any previous value.
    fn set_item(&self, key: &str, value: &str) -> Result<()>;

    /// Removes `key`, returning whether it was present.
    fn remove_item(&self, key: &str) -> Result<bool>;

    /// Lists every key in the store, including keys of other applications.
    fn keys(&self) -> Result<Vec<String>>;
}

// == Bulk Backend ==
/// Asynchronous record store for large payloads.
///
/// Callers invoke [`open`](BulkBackend::open) once before any other method.
#[async_trait]
pub trait BulkBackend: Send + Sync {
    /// Prepares the store for use.
    async fn open(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<BulkRecord>>;

    /// Inserts or replaces the record under `record.key`.
    async fn put(&self, record: BulkRecord) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<bool>;

    async fn clear(&self) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;

    /// Reads every readable record.
    async fn get_all(&self) -> Result<Vec<BulkRecord>>;
}
