//! Configuration Module
//!
//! Typed cache tunables, partial updates, and process configuration loaded
//! from environment variables.

use std::env;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Default memory budget: 50 MB.
pub const DEFAULT_MAX_MEMORY_SIZE: usize = 50 * 1024 * 1024;
/// Default entry budget for the memory tier.
pub const DEFAULT_MAX_MEMORY_ENTRIES: usize = 1000;
/// Default TTL: one hour.
pub const DEFAULT_TTL_MS: u64 = 60 * 60 * 1000;
/// Values estimated above this size are also routed to the bulk tier.
pub const DEFAULT_BULK_THRESHOLD_BYTES: usize = 1024 * 1024;
/// Share of persistent records dropped when the backend reports a full quota.
pub const DEFAULT_QUOTA_EVICTION_RATIO: f64 = 0.25;
/// Key prefix separating cache records from unrelated data in the same store.
pub const DEFAULT_NAMESPACE: &str = "tiered_cache_";
/// Upper bound on how long the bulk backend may take to open.
pub const DEFAULT_BULK_OPEN_TIMEOUT_MS: u64 = 5000;

// == Eviction Policy ==
/// Eviction strategy for the memory tier. Only LRU is implemented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    #[default]
    Lru,
}

// == Cache Config ==
/// Cache engine tunables.
///
/// Constructed once with the manager and changed only through
/// [`merge_config`]. Changes apply to later operations and never resize
/// entries already stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Byte budget of the memory tier
    pub max_memory_size: usize,
    /// Entry budget of the memory tier
    pub max_memory_entries: usize,
    /// TTL applied when the caller passes none
    pub default_ttl_ms: u64,
    /// Write to and read from the persistent tier
    pub enable_persistence: bool,
    /// Write oversized values to and read from the bulk tier
    pub enable_bulk_store: bool,
    pub eviction_policy: EvictionPolicy,
    /// Estimated size above which a value also goes to the bulk tier
    pub bulk_threshold_bytes: usize,
    /// Fraction of persistent records evicted on a quota error
    pub quota_eviction_ratio: f64,
    /// Key prefix used by the persistent tier
    pub namespace: String,
    pub bulk_open_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_memory_size: DEFAULT_MAX_MEMORY_SIZE,
            max_memory_entries: DEFAULT_MAX_MEMORY_ENTRIES,
            default_ttl_ms: DEFAULT_TTL_MS,
            enable_persistence: true,
            enable_bulk_store: true,
            eviction_policy: EvictionPolicy::Lru,
            bulk_threshold_bytes: DEFAULT_BULK_THRESHOLD_BYTES,
            quota_eviction_ratio: DEFAULT_QUOTA_EVICTION_RATIO,
            namespace: DEFAULT_NAMESPACE.to_string(),
            bulk_open_timeout_ms: DEFAULT_BULK_OPEN_TIMEOUT_MS,
        }
    }
}

// == Cache Config Patch ==
/// Partial update to a [`CacheConfig`]. Unknown JSON keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheConfigPatch {
    pub max_memory_size: Option<usize>,
    pub max_memory_entries: Option<usize>,
    pub default_ttl_ms: Option<u64>,
    pub enable_persistence: Option<bool>,
    pub enable_bulk_store: Option<bool>,
    pub eviction_policy: Option<EvictionPolicy>,
    pub bulk_threshold_bytes: Option<usize>,
    pub quota_eviction_ratio: Option<f64>,
    pub namespace: Option<String>,
    pub bulk_open_timeout_ms: Option<u64>,
}

// == Merge ==
/// Returns `base` with every field set in `patch` replaced.
pub fn merge_config(base: &CacheConfig, patch: &CacheConfigPatch) -> CacheConfig {
    CacheConfig {
        max_memory_size: patch.max_memory_size.unwrap_or(base.max_memory_size),
        max_memory_entries: patch.max_memory_entries.unwrap_or(base.max_memory_entries),
        default_ttl_ms: patch.default_ttl_ms.unwrap_or(base.default_ttl_ms),
        enable_persistence: patch.enable_persistence.unwrap_or(base.enable_persistence),
        enable_bulk_store: patch.enable_bulk_store.unwrap_or(base.enable_bulk_store),
        eviction_policy: patch.eviction_policy.unwrap_or(base.eviction_policy),
        bulk_threshold_bytes: patch
            .bulk_threshold_bytes
            .unwrap_or(base.bulk_threshold_bytes),
        quota_eviction_ratio: patch
            .quota_eviction_ratio
            .map(|ratio| ratio.clamp(0.0, 1.0))
            .unwrap_or(base.quota_eviction_ratio),
        namespace: patch
            .namespace
            .clone()
            .unwrap_or_else(|| base.namespace.clone()),
        bulk_open_timeout_ms: patch
            .bulk_open_timeout_ms
            .unwrap_or(base.bulk_open_timeout_ms),
    }
}

/// Process configuration for the cache server binary.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Cache engine tunables
    pub cache: CacheConfig,
    /// HTTP server port
    pub server_port: u16,
    /// Background cleanup task interval in seconds
    pub cleanup_interval: u64,
    /// Directory for file-backed tiers; in-memory backends when unset
    pub storage_dir: Option<PathBuf>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `MAX_MEMORY_SIZE` - Memory tier byte budget (default: 50 MB)
    /// - `MAX_MEMORY_ENTRIES` - Memory tier entry budget (default: 1000)
    /// - `DEFAULT_TTL_MS` - Default TTL in milliseconds (default: 1 hour)
    /// - `ENABLE_PERSISTENCE` - Use the persistent tier (default: true)
    /// - `ENABLE_BULK_STORE` - Use the bulk tier (default: true)
    /// - `BULK_THRESHOLD_BYTES` - Bulk routing threshold (default: 1 MB)
    /// - `CACHE_NAMESPACE` - Persistent key prefix (default: `tiered_cache_`)
    /// - `SERVER_PORT` - HTTP server port (default: 3000)
    /// - `CLEANUP_INTERVAL` - Cleanup frequency in seconds (default: 60)
    /// - `STORAGE_DIR` - Directory for file-backed tiers (default: unset)
    pub fn from_env() -> Self {
        let defaults = CacheConfig::default();
        let cache = CacheConfig {
            max_memory_size: env_or("MAX_MEMORY_SIZE", defaults.max_memory_size),
            max_memory_entries: env_or("MAX_MEMORY_ENTRIES", defaults.max_memory_entries),
            default_ttl_ms: env_or("DEFAULT_TTL_MS", defaults.default_ttl_ms),
            enable_persistence: env_or("ENABLE_PERSISTENCE", defaults.enable_persistence),
            enable_bulk_store: env_or("ENABLE_BULK_STORE", defaults.enable_bulk_store),
            bulk_threshold_bytes: env_or("BULK_THRESHOLD_BYTES", defaults.bulk_threshold_bytes),
            namespace: env::var("CACHE_NAMESPACE").unwrap_or(defaults.namespace.clone()),
            ..defaults
        };

        Self {
            cache,
            server_port: env_or("SERVER_PORT", 3000),
            cleanup_interval: env_or("CLEANUP_INTERVAL", 60),
            storage_dir: env::var("STORAGE_DIR").ok().map(PathBuf::from),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            server_port: 3000,
            cleanup_interval: 60,
            storage_dir: None,
        }
    }
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
