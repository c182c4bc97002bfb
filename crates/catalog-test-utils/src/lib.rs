//! # Catalog Test Utilities
//!
//! Shared test utilities for the Catalog Service.
//!
//! This crate provides:
//! - Deterministic RSA signing keys and key-set JSON (`crypto_fixtures`)
//! - Signed access token builders (`token_builders`)
//! - Server test harness (`TestCatalogServer` for E2E tests)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use catalog_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestCatalogServer::spawn(TestServerOptions::default()).await?;
//!     let token = TokenBuilder::new().build();
//!
//!     let response = reqwest::Client::new()
//!         .get(format!("{}/api/me", server.url()))
//!         .bearer_auth(token)
//!         .send()
//!         .await?;
//!
//!     assert_eq!(response.status(), 200);
//!     Ok(())
//! }
//! ```

pub mod crypto_fixtures;
pub mod server_harness;
pub mod token_builders;

// Re-export commonly used items
pub use crypto_fixtures::{jwks_json, TestSigningKey, PRIMARY, ROTATED};
pub use server_harness::*;
pub use token_builders::{TokenBuilder, TEST_AUDIENCE, TEST_ISSUER, TEST_SUBJECT, TEST_TENANT};
