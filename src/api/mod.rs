//! API Module
//!
//! HTTP handlers and routing exposing the cache manager to other processes.
//!
//! # Endpoints
//! - `PUT /set` - Store a JSON value under a key
//! - `GET /get/:key` - Retrieve a value by key
//! - `DELETE /del/:key` - Delete a key from every tier
//! - `GET /has/:key` - Check for a live entry
//! - `GET /keys` - List keys across tiers
//! - `POST /clear` - Empty every tier and reset statistics
//! - `POST /cleanup` - Sweep expired entries
//! - `GET /stats` - Hit/miss statistics and tier sizes
//! - `GET /config`, `PATCH /config` - Read or update cache tunables
//! - `GET /health` - Health check endpoint

pub mod handlers;
pub mod routes;

pub use handlers::*;
pub use routes::create_router;
