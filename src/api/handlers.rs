//! API Handlers
//!
//! HTTP request handlers for each cache server endpoint.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    Json,
};
use tracing::warn;

use crate::backend::{FileStorage, FsBulkStorage};
use crate::cache::CacheManager;
use crate::config::{CacheConfig, CacheConfigPatch, Config};
use crate::error::{CacheError, Result};
use crate::models::{
    validate_key, CleanupResponse, DeleteResponse, GetResponse, HasResponse, HealthResponse,
    KeysResponse, MessageResponse, SetRequest, SetResponse, StatsResponse,
};

/// Application state shared across all handlers.
///
/// The manager synchronizes internally, so handlers share it through a plain
/// `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<CacheManager>,
}

impl AppState {
    /// Creates a new AppState with the given cache manager.
    pub fn new(cache: CacheManager) -> Self {
        Self {
            cache: Arc::new(cache),
        }
    }

    /// Creates a new AppState from configuration.
    ///
    /// With a storage directory the persistent and bulk tiers are file
    /// backed under `<dir>/items` and `<dir>/bulk`. Without one they live in
    /// process memory. A directory that cannot be opened disables persistence.
    pub fn from_config(config: &Config) -> Self {
        let Some(dir) = &config.storage_dir else {
            return Self::new(CacheManager::new(config.cache.clone()));
        };

        let mut cache_config: CacheConfig = config.cache.clone();
        let mut builder = CacheManager::builder();
        match FileStorage::open(dir.join("items")) {
            Ok(storage) => builder = builder.persistent_backend(Arc::new(storage)),
            Err(err) => {
                warn!(error = %err, "persistent storage unavailable, running without it");
                cache_config.enable_persistence = false;
            }
        }
        builder = builder.bulk_backend(Arc::new(FsBulkStorage::new(dir.join("bulk"))));

        Self::new(builder.config(cache_config).build())
    }
}

fn check_key(key: &str) -> Result<()> {
    match validate_key(key) {
        Some(message) => Err(CacheError::InvalidRequest(message)),
        None => Ok(()),
    }
}

/// Handler for PUT /set
///
/// Stores a JSON value with an optional TTL in milliseconds.
pub async fn set_handler(
    State(state): State<AppState>,
    Json(req): Json<SetRequest>,
) -> Result<Json<SetResponse>> {
    if let Some(error_msg) = req.validate() {
        return Err(CacheError::InvalidRequest(error_msg));
    }

    let ttl = req.ttl_ms.map(Duration::from_millis);
    state.cache.set_value(&req.key, req.value, ttl).await;

    Ok(Json(SetResponse::new(req.key)))
}

/// Handler for GET /get/:key
pub async fn get_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<GetResponse>> {
    check_key(&key)?;

    let value = state
        .cache
        .get_value(&key)
        .await
        .ok_or_else(|| CacheError::NotFound(key.clone()))?;

    Ok(Json(GetResponse::new(key, value)))
}

/// Handler for DELETE /del/:key
pub async fn delete_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<DeleteResponse>> {
    check_key(&key)?;

    if !state.cache.delete(&key).await {
        return Err(CacheError::NotFound(key));
    }
    Ok(Json(DeleteResponse::new(key)))
}

/// Handler for GET /has/:key
pub async fn has_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<HasResponse>> {
    check_key(&key)?;

    let exists = state.cache.has(&key).await;
    Ok(Json(HasResponse { key, exists }))
}

/// Handler for GET /keys
pub async fn keys_handler(State(state): State<AppState>) -> Json<KeysResponse> {
    Json(KeysResponse::new(state.cache.keys().await))
}

/// Handler for POST /clear
pub async fn clear_handler(State(state): State<AppState>) -> Json<MessageResponse> {
    state.cache.clear().await;
    Json(MessageResponse::new("Cache cleared"))
}

/// Handler for POST /cleanup
///
/// Sweeps expired entries now instead of waiting for the background task.
pub async fn cleanup_handler(State(state): State<AppState>) -> Json<CleanupResponse> {
    let removed = state.cache.cleanup().await;
    Json(CleanupResponse { removed })
}

/// Handler for GET /stats
pub async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    let stats = state.cache.stats();
    let tiers = state.cache.tier_sizes().await;
    Json(StatsResponse { stats, tiers })
}

/// Handler for GET /config
pub async fn get_config_handler(State(state): State<AppState>) -> Json<CacheConfig> {
    Json(state.cache.config())
}

/// Handler for PATCH /config
///
/// Merges the given fields into the running configuration. Unknown fields
/// are ignored.
pub async fn update_config_handler(
    State(state): State<AppState>,
    Json(patch): Json<CacheConfigPatch>,
) -> Json<CacheConfig> {
    Json(state.cache.update_config(&patch))
}

/// Handler for GET /health
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}
