//! Object storage for asset media.
//!
//! # Components
//!
//! - `client` - Blob REST client and the `BlobStore`/`DelegationKeySource` seams
//! - `delegation` - Delegation key cache (`DelegatedCredentialManager`)
//! - `grant` - Scoped, read-only access grants signed with the delegation key
//!
//! No long-lived account secret is ever held: blobs are written with a
//! bearer token and read through grants signed by a short-lived key.

pub mod client;
pub mod delegation;
pub mod grant;

pub use client::{mock, AzureBlobClient, BlobStore, DelegationKeySource};
pub use delegation::{DelegatedCredentialManager, DelegationKey};
pub use grant::{AccessGrantIssuer, BlobReference, GrantPermissions};

use thiserror::Error;

/// Storage failures.
///
/// During ingestion these are absorbed by the inline fallback. Anywhere
/// else they propagate as a server error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    /// No storage account is configured.
    #[error("Storage is not configured")]
    NotConfigured,

    /// No bearer token has been acquired for the storage API yet.
    #[error("No storage access token available")]
    Unauthenticated,

    /// Transport-level failure talking to storage.
    #[error("Storage request failed: {0}")]
    Http(String),

    /// Storage answered with an unexpected status.
    #[error("Storage returned {status} for {operation}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Operation that failed (e.g. "put_blob").
        operation: &'static str,
    },

    /// Storage answered with a body we could not parse.
    #[error("Invalid storage response: {0}")]
    InvalidResponse(String),

    /// The delegation key value is not usable as an HMAC key.
    #[error("Invalid delegation key: {0}")]
    InvalidKey(String),

    /// The control plane returned a key that is already expired.
    #[error("Delegation key is already expired")]
    ExpiredKey,
}
