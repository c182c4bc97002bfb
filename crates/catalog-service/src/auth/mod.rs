//! Authentication module for the Catalog Service.
//!
//! Verifies bearer tokens issued by the identity provider against its
//! published RSA signing keys.
//!
//! # Components
//!
//! - `claims` - Claims extracted from verified tokens
//! - `jwks` - Key-set client with caching and refetch on unknown key id
//! - `jwt` - Token verifier (signature, issuer, audience, expiry)

pub mod claims;
pub mod jwks;
pub mod jwt;

pub use claims::{Audience, Claims};
pub use jwks::JwksClient;
pub use jwt::TokenVerifier;
