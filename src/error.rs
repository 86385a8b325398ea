//! Error types for the cache engine
//!
//! Provides unified error handling using thiserror. Tier code returns these
//! errors internally; the cache manager absorbs them and degrades to a miss.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache engine and its HTTP surface.
#[derive(Error, Debug)]
pub enum CacheError {
    /// Key not found in any enabled tier
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Invalid request data
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Value could not be converted to or from its stored form
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Stored record exists but cannot be decoded
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// Backing store rejected a write for lack of space
    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Backing store is missing, blocked or failed to open
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// Backing store did not answer in time
    #[error("Storage timed out after {0} ms")]
    Timeout(u64),

    /// Filesystem failure in a file-backed store
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CacheError {
    /// Returns true for errors that should permanently disable a tier.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_) | CacheError::Timeout(_))
    }
}

// == IntoResponse Implementation ==
impl IntoResponse for CacheError {
    fn into_response(self) -> Response {
        let status = match &self {
            CacheError::NotFound(_) => StatusCode::NOT_FOUND,
            CacheError::InvalidRequest(_) | CacheError::Serialization(_) => {
                StatusCode::BAD_REQUEST
            }
            CacheError::QuotaExceeded(_)
            | CacheError::Unavailable(_)
            | CacheError::Timeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            CacheError::Corrupt(_) | CacheError::Io(_) | CacheError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache engine.
pub type Result<T> = std::result::Result<T, CacheError>;
