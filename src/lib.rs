//! Tiered Cache - a multi-tier cache engine
//!
//! An LRU memory tier in front of a namespaced persistent tier and an
//! asynchronous bulk tier for oversized values, with TTL expiry, promotion of
//! slow-tier hits and unified hit/miss statistics. An optional HTTP server
//! exposes the engine to other processes.

pub mod api;
pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use api::AppState;
pub use cache::{CacheManager, CacheManagerBuilder, CacheStats};
pub use config::{CacheConfig, CacheConfigPatch, Config};
pub use error::{CacheError, Result};
pub use tasks::spawn_cleanup_task;
