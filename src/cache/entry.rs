//! Cache Entry Module
//!
//! The unit of storage shared by every tier, plus the size heuristic used
//! for capacity accounting.

use serde::{Deserialize, Serialize};

/// Bytes charged per serialized character (UTF-16 approximation).
pub const BYTES_PER_CHAR: usize = 2;

/// Size charged for values that cannot be serialized.
pub const FALLBACK_ENTRY_SIZE: usize = 1024;

// == Cache Entry ==
/// A cached value with its timing and access metadata.
///
/// The serialized form (camelCase JSON) is self-describing, so records written
/// by one manager can be read back by another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    /// Caller-supplied key, without namespace prefix
    pub key: String,
    /// The stored value
    pub data: T,
    /// Creation timestamp (Unix milliseconds)
    pub timestamp: u64,
    /// Lifetime in milliseconds, counted from `timestamp`
    pub ttl: u64,
    /// Estimated footprint in bytes
    pub size: usize,
    /// Number of successful reads, starting at 1
    pub access_count: u64,
    /// Timestamp of the latest successful read (Unix milliseconds)
    pub last_accessed: u64,
}

impl<T: Serialize> CacheEntry<T> {
    // == Wrap ==
    /// Creates an entry stamped with the current time.
    pub fn wrap(key: impl Into<String>, data: T, ttl_ms: u64) -> Self {
        let now = now_ms();
        let size = estimate_size(&data);
        Self {
            key: key.into(),
            data,
            timestamp: now,
            ttl: ttl_ms,
            size,
            access_count: 1,
            last_accessed: now,
        }
    }
}

impl<T> CacheEntry<T> {
    // == Is Expired ==
    /// Checks the entry against the current wall clock.
    pub fn is_expired(&self) -> bool {
        is_expired(self, now_ms())
    }

    // == Touch ==
    /// Records a successful read.
    pub fn touch(&mut self, now: u64) {
        self.access_count += 1;
        self.last_accessed = now;
    }

    /// Absolute expiry time in Unix milliseconds.
    pub fn expires_at(&self) -> u64 {
        self.timestamp.saturating_add(self.ttl)
    }

    /// Milliseconds left before expiry, zero once expired.
    pub fn remaining_ttl(&self, now: u64) -> u64 {
        self.expires_at().saturating_sub(now)
    }
}

// == Expiry ==
/// Returns true once `now` has reached `timestamp + ttl`.
///
/// The boundary instant itself counts as expired, so an entry is readable
/// strictly before its deadline.
pub fn is_expired<T>(entry: &CacheEntry<T>, now: u64) -> bool {
    now >= entry.expires_at()
}

// == Size Estimation ==
/// Approximates the in-memory footprint of a value.
///
/// This is a heuristic, not a byte count: the value is rendered as JSON and
/// each character is charged [`BYTES_PER_CHAR`] bytes. Serialization failures
/// are charged [`FALLBACK_ENTRY_SIZE`]. The result is always positive.
pub fn estimate_size<T: Serialize + ?Sized>(data: &T) -> usize {
    match serde_json::to_string(data) {
        Ok(text) => (text.chars().count() * BYTES_PER_CHAR).max(1),
        Err(_) => FALLBACK_ENTRY_SIZE,
    }
}

// == Utility Functions ==
/// Returns current Unix timestamp in milliseconds.
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
