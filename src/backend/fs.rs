//! File-backed backends
//!
//! One file per key under a directory. Keys are percent-encoded into file
//! names so any string key maps to a valid, reversible name. Keys whose
//! encoded form would not fit in a file name are stored under a digest of
//! the key instead, and the key itself is kept inside the file.
//!
//! A disk that runs out of space surfaces as
//! [`CacheError::QuotaExceeded`], the same as an explicit quota or capacity.

use std::collections::HashMap;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;
use xxhash_rust::xxh3::xxh3_128;

use super::{item_footprint, BulkBackend, BulkRecord, StorageBackend};
use crate::error::{CacheError, Result};

const ITEM_EXT: &str = "item";
const RECORD_EXT: &str = "json";

/// Longest file name written, leaving headroom below the usual 255 byte limit.
const MAX_NAME_LEN: usize = 200;

/// Leads digest names. Percent-encoding never emits it, so the two kinds of
/// name cannot collide.
const DIGEST_MARK: char = '=';

fn file_name(key: &str, ext: &str) -> String {
    let encoded = urlencoding::encode(key);
    if encoded.len() + ext.len() + 1 <= MAX_NAME_LEN {
        format!("{}.{}", encoded, ext)
    } else {
        format!("{}{:032x}.{}", DIGEST_MARK, xxh3_128(key.as_bytes()), ext)
    }
}

/// What a file name says about the key it holds.
#[derive(Debug, PartialEq)]
enum Stem {
    Key(String),
    /// The key is stored in the file.
    Digest,
}

fn stem_of(path: &Path, ext: &str) -> Option<Stem> {
    if path.extension()?.to_str()? != ext {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with(DIGEST_MARK) {
        return Some(Stem::Digest);
    }
    urlencoding::decode(stem)
        .ok()
        .map(|key| Stem::Key(key.into_owned()))
}

fn is_digest_path(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(DIGEST_MARK))
}

fn write_failed(err: io::Error) -> CacheError {
    if err.kind() == ErrorKind::StorageFull {
        CacheError::QuotaExceeded(err.to_string())
    } else {
        err.into()
    }
}

// == Usage ==
/// Bytes charged per key, summed.
#[derive(Debug, Default)]
struct Usage {
    sizes: HashMap<String, u64>,
    total: u64,
}

impl Usage {
    fn excluding(&self, key: &str) -> u64 {
        self.total - self.sizes.get(key).copied().unwrap_or(0)
    }

    fn record(&mut self, key: &str, size: u64) {
        if let Some(old) = self.sizes.insert(key.to_string(), size) {
            self.total -= old;
        }
        self.total += size;
    }

    fn forget(&mut self, key: &str) {
        if let Some(old) = self.sizes.remove(key) {
            self.total -= old;
        }
    }
}

// == File Storage ==
/// Durable string store: each item is a UTF-8 file named after its key.
///
/// With a quota, usage is scanned from disk on the first write and tracked
/// in memory from then on. Files changed by other processes are not
/// counted until the store is reopened.
#[derive(Debug)]
pub struct FileStorage {
    dir: PathBuf,
    quota: Option<u64>,
    usage: Mutex<Option<Usage>>,
}

impl FileStorage {
    /// Opens (creating if needed) a store rooted at `dir`.
    ///
    /// A directory that cannot be created makes the store unavailable.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|err| {
            CacheError::Unavailable(format!("cannot create {}: {}", dir.display(), err))
        })?;
        Ok(Self {
            dir,
            quota: None,
            usage: Mutex::new(None),
        })
    }

    /// Limits the summed item footprint to `quota` bytes.
    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key, ITEM_EXT))
    }

    /// Reads an item file as `(key, value)`.
    ///
    /// Digest-named files start with the encoded key on its own line.
    fn read_file(path: &Path, stem: Stem) -> Result<Option<(String, String)>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        match stem {
            Stem::Key(key) => Ok(Some((key, text))),
            Stem::Digest => {
                let (encoded, value) = text
                    .split_once('\n')
                    .ok_or_else(|| CacheError::Corrupt(path.display().to_string()))?;
                let key = urlencoding::decode(encoded)
                    .map_err(|err| CacheError::Corrupt(format!("{}: {}", path.display(), err)))?;
                Ok(Some((key.into_owned(), value.to_string())))
            }
        }
    }

    fn scan_usage(&self) -> Result<Usage> {
        let mut usage = Usage::default();
        for item_key in self.keys()? {
            if let Some(value) = self.get_item(&item_key)? {
                usage.record(&item_key, item_footprint(&item_key, &value) as u64);
            }
        }
        Ok(usage)
    }
}

impl StorageBackend for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key);
        let stem = if is_digest_path(&path) {
            Stem::Digest
        } else {
            Stem::Key(key.to_string())
        };
        Ok(Self::read_file(&path, stem)?
            .filter(|(stored, _)| stored == key)
            .map(|(_, value)| value))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let mut usage = self.usage.lock();
        let footprint = item_footprint(key, value) as u64;

        if let Some(quota) = self.quota {
            if usage.is_none() {
                *usage = Some(self.scan_usage()?);
            }
            let others = usage.as_ref().map_or(0, |usage| usage.excluding(key));
            let needed = others + footprint;
            if needed > quota {
                return Err(CacheError::QuotaExceeded(format!(
                    "{} bytes needed, quota is {}",
                    needed, quota
                )));
            }
        }

        let path = self.path_for(key);
        if is_digest_path(&path) {
            let contents = format!("{}\n{}", urlencoding::encode(key), value);
            std::fs::write(path, contents).map_err(write_failed)?;
        } else {
            std::fs::write(path, value).map_err(write_failed)?;
        }

        if let Some(usage) = usage.as_mut() {
            usage.record(key, footprint);
        }
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<bool> {
        let removed = match std::fs::remove_file(self.path_for(key)) {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        if let Some(usage) = self.usage.lock().as_mut() {
            usage.forget(key);
        }
        Ok(removed)
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for dir_entry in std::fs::read_dir(&self.dir)? {
            let path = dir_entry?.path();
            match stem_of(&path, ITEM_EXT) {
                Some(Stem::Key(key)) => keys.push(key),
                Some(Stem::Digest) => match Self::read_file(&path, Stem::Digest) {
                    Ok(Some((key, _))) => keys.push(key),
                    Ok(None) => {}
                    Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable item"),
                },
                None => {}
            }
        }
        Ok(keys)
    }
}

// == Fs Bulk Storage ==
/// Record store keeping each record as a JSON file, accessed via `tokio::fs`.
#[derive(Debug)]
pub struct FsBulkStorage {
    dir: PathBuf,
    capacity: Option<usize>,
    usage: tokio::sync::Mutex<Option<Usage>>,
}

impl FsBulkStorage {
    /// Creates a store rooted at `dir`. Nothing touches the disk until `open`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            capacity: None,
            usage: tokio::sync::Mutex::new(None),
        }
    }

    /// Rejects records once their summed sizes would exceed `capacity`.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(file_name(key, RECORD_EXT))
    }

    async fn record_files(&self) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(dir_entry) = entries.next_entry().await? {
            let path = dir_entry.path();
            if stem_of(&path, RECORD_EXT).is_some() {
                paths.push(path);
            }
        }
        Ok(paths)
    }

    async fn read_record(path: &Path) -> Result<Option<BulkRecord>> {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|err| CacheError::Corrupt(format!("{}: {}", path.display(), err)))
    }

    async fn scan_usage(&self) -> Result<Usage> {
        let mut usage = Usage::default();
        for record in self.get_all().await? {
            usage.record(&record.key, record.size as u64);
        }
        Ok(usage)
    }
}

#[async_trait]
impl BulkBackend for FsBulkStorage {
    async fn open(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|err| {
            CacheError::Unavailable(format!("cannot create {}: {}", self.dir.display(), err))
        })
    }

    async fn get(&self, key: &str) -> Result<Option<BulkRecord>> {
        Ok(Self::read_record(&self.path_for(key))
            .await?
            .filter(|record| record.key == key))
    }

    async fn put(&self, record: BulkRecord) -> Result<()> {
        let mut usage = self.usage.lock().await;

        if let Some(capacity) = self.capacity {
            if usage.is_none() {
                *usage = Some(self.scan_usage().await?);
            }
            let others = usage.as_ref().map_or(0, |usage| usage.excluding(&record.key));
            if others + record.size as u64 > capacity as u64 {
                return Err(CacheError::QuotaExceeded(format!(
                    "bulk capacity of {} bytes reached",
                    capacity
                )));
            }
        }

        let text = serde_json::to_string(&record)?;
        tokio::fs::write(self.path_for(&record.key), text)
            .await
            .map_err(write_failed)?;

        if let Some(usage) = usage.as_mut() {
            usage.record(&record.key, record.size as u64);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed = match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => true,
            Err(err) if err.kind() == ErrorKind::NotFound => false,
            Err(err) => return Err(err.into()),
        };
        if let Some(usage) = self.usage.lock().await.as_mut() {
            usage.forget(key);
        }
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        for path in self.record_files().await? {
            tokio::fs::remove_file(path).await?;
        }
        if let Some(usage) = self.usage.lock().await.as_mut() {
            *usage = Usage::default();
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for path in self.record_files().await? {
            match stem_of(&path, RECORD_EXT) {
                Some(Stem::Key(key)) => keys.push(key),
                Some(Stem::Digest) => match Self::read_record(&path).await {
                    Ok(Some(record)) => keys.push(record.key),
                    Ok(None) => {}
                    Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable bulk record"),
                },
                None => {}
            }
        }
        Ok(keys)
    }

    async fn get_all(&self) -> Result<Vec<BulkRecord>> {
        let mut records = Vec::new();
        for path in self.record_files().await? {
            match Self::read_record(&path).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable bulk record"),
            }
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use serde_json::json;

    #[test]
    fn test_file_name_roundtrip() {
        let name = file_name("users/42?full=1", ITEM_EXT);
        assert!(!name.contains('/'));

        let stem = stem_of(Path::new(&name), ITEM_EXT).unwrap();
        assert_eq!(stem, Stem::Key("users/42?full=1".to_string()));
        assert!(stem_of(Path::new(&name), RECORD_EXT).is_none());
    }

    #[test]
    fn test_long_keys_get_digest_names() {
        let ascii = "k".repeat(256);
        let wide = "ключ".repeat(20);

        for key in [ascii.as_str(), wide.as_str()] {
            let name = file_name(key, ITEM_EXT);
            assert!(name.len() <= MAX_NAME_LEN, "{} bytes", name.len());
            assert_eq!(stem_of(Path::new(&name), ITEM_EXT), Some(Stem::Digest));
        }
        assert_ne!(file_name(&ascii, ITEM_EXT), file_name(&wide, ITEM_EXT));
    }

    #[test]
    fn test_storage_full_maps_to_quota() {
        let err = write_failed(io::Error::from(ErrorKind::StorageFull));
        assert!(matches!(err, CacheError::QuotaExceeded(_)));

        let err = write_failed(io::Error::from(ErrorKind::PermissionDenied));
        assert!(matches!(err, CacheError::Io(_)));
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        let storage = FileStorage::open(dir.path()).unwrap();
        storage.set_item("ns_a", "hello").unwrap();
        drop(storage);

        let reopened = FileStorage::open(dir.path()).unwrap();
        assert_eq!(reopened.get_item("ns_a").unwrap(), Some("hello".to_string()));
        assert_eq!(reopened.keys().unwrap(), vec!["ns_a".to_string()]);
    }

    #[test]
    fn test_file_storage_long_key() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();
        let key = format!("ns_{}", "k".repeat(256));

        storage.set_item(&key, "first line\nsecond line").unwrap();

        assert_eq!(
            storage.get_item(&key).unwrap(),
            Some("first line\nsecond line".to_string())
        );
        assert_eq!(storage.keys().unwrap(), vec![key.clone()]);
        assert!(storage.remove_item(&key).unwrap());
        assert!(storage.keys().unwrap().is_empty());
    }

    #[test]
    fn test_file_storage_remove() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::open(dir.path()).unwrap();

        storage.set_item("k", "v").unwrap();

        assert!(storage.remove_item("k").unwrap());
        assert!(!storage.remove_item("k").unwrap());
        assert_eq!(storage.get_item("k").unwrap(), None);
    }

    #[test]
    fn test_file_storage_quota() {
        let dir = tempfile::tempdir().unwrap();
        // "k1" + "abc" -> 10 bytes each
        let storage = FileStorage::open(dir.path()).unwrap().with_quota(15);

        storage.set_item("k1", "abc").unwrap();
        let err = storage.set_item("k2", "abc").unwrap_err();

        assert!(matches!(err, CacheError::QuotaExceeded(_)));
        // Overwriting the existing key still fits
        storage.set_item("k1", "xyz").unwrap();
    }

    #[test]
    fn test_file_storage_quota_counts_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        FileStorage::open(dir.path())
            .unwrap()
            .set_item("k1", "abc")
            .unwrap();

        let storage = FileStorage::open(dir.path()).unwrap().with_quota(15);
        assert!(storage.set_item("k2", "abc").is_err());

        // Removal frees the tracked bytes
        assert!(storage.remove_item("k1").unwrap());
        storage.set_item("k2", "abc").unwrap();
    }

    #[test]
    fn test_file_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();

        let err = FileStorage::open(blocker.join("sub")).unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_fs_bulk_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsBulkStorage::new(dir.path().join("bulk"));
        storage.open().await.unwrap();

        let record = CacheEntry::wrap("big/one", json!({"rows": [1, 2, 3]}), 60_000);
        storage.put(record.clone()).await.unwrap();

        assert_eq!(storage.get("big/one").await.unwrap(), Some(record));
        assert_eq!(storage.keys().await.unwrap(), vec!["big/one".to_string()]);
        assert_eq!(storage.get_all().await.unwrap().len(), 1);

        storage.clear().await.unwrap();
        assert!(storage.keys().await.unwrap().is_empty());
        assert_eq!(storage.get("big/one").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_fs_bulk_long_key() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsBulkStorage::new(dir.path());
        storage.open().await.unwrap();
        let key = "é".repeat(100);

        storage
            .put(CacheEntry::wrap(key.as_str(), json!([1, 2]), 60_000))
            .await
            .unwrap();

        assert_eq!(storage.get(&key).await.unwrap().unwrap().data, json!([1, 2]));
        assert_eq!(storage.keys().await.unwrap(), vec![key.clone()]);
        assert!(storage.delete(&key).await.unwrap());
    }

    #[tokio::test]
    async fn test_fs_bulk_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsBulkStorage::new(dir.path()).with_capacity(100);
        storage.open().await.unwrap();
        let mut record = CacheEntry::wrap("a", json!("x"), 1_000);
        record.size = 60;

        storage.put(record.clone()).await.unwrap();
        // Same key replaces rather than accumulates
        storage.put(record.clone()).await.unwrap();

        let mut second = record.clone();
        second.key = "b".to_string();
        let err = storage.put(second.clone()).await.unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded(_)));

        assert!(storage.delete("a").await.unwrap());
        storage.put(second).await.unwrap();
        assert_eq!(storage.keys().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_fs_bulk_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsBulkStorage::new(dir.path());
        storage.open().await.unwrap();

        tokio::fs::write(storage.path_for("bad"), "{oops").await.unwrap();

        assert!(matches!(
            storage.get("bad").await,
            Err(CacheError::Corrupt(_))
        ));
        assert!(storage.get_all().await.unwrap().is_empty());
        assert!(storage.delete("bad").await.unwrap());
    }
}
