//! Catalog Service Library
//!
//! HTTP API for the asset catalog, with the security boundary around it:
//!
//! - Bearer-token verification against the identity provider's key set
//! - The auth gate interceptor and its ordering relative to CORS
//! - Delegated storage credentials and scoped, read-only access grants
//! - Media ingestion with inline fallback when storage is unavailable
//!
//! # Architecture
//!
//! ```text
//! routes/mod.rs -> handlers/*.rs -> media/ -> storage/ -> repositories/*.rs
//! ```
//!
//! # Modules
//!
//! - `auth` - Key-set client and token verifier
//! - `config` - Service configuration from environment
//! - `errors` - Error types with HTTP status code mapping
//! - `handlers` - HTTP request handlers
//! - `media` - Media ingestion pipeline
//! - `middleware` - Auth gate and the ordered interceptor chain
//! - `models` - Request/response models
//! - `observability` - Metrics recording
//! - `repositories` - Asset persistence
//! - `routes` - Axum router setup
//! - `services` - Service construction and lifecycle
//! - `storage` - Blob client, delegation keys, access grants

pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod media;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod repositories;
pub mod routes;
pub mod services;
pub mod storage;
