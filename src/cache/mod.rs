//! Cache Module
//!
//! Multi-tier caching: an LRU memory tier in front of a namespaced persistent
//! tier and an asynchronous bulk tier, all sharing one TTL model.

mod bulk;
mod entry;
mod lru;
mod manager;
mod persistent;
mod stats;
mod tier;
mod volatile;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use bulk::BulkStore;
pub use entry::{estimate_size, is_expired, now_ms, CacheEntry};
pub use lru::LruTracker;
pub use manager::{CacheManager, CacheManagerBuilder};
pub use persistent::PersistentStore;
pub use stats::{CacheStats, TierCounters};
pub use tier::{MemoryTier, SizeInfo, Tier, TierKind};
pub use volatile::VolatileStore;

// == Public Constants ==
/// Maximum allowed key length in bytes
pub const MAX_KEY_LENGTH: usize = 256;
