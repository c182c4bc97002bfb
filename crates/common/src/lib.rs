//! Common utilities and types shared across the catalog components.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for bearer-token header utilities (size limit, kid extraction)
pub mod jwt;

/// Module for OAuth 2.0 client-credentials token management with automatic refresh
pub mod token_manager;
