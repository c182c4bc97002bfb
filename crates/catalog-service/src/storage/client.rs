//! Blob storage REST client.
//!
//! Talks to the Blob service with a bearer token from the client-credentials
//! token manager:
//!
//! - `PUT {account}/{container}/{name}` uploads a block blob (overwrite)
//! - `DELETE {account}/{container}/{name}`; 404 means nothing to delete
//! - `POST {account}/?restype=service&comp=userdelegationkey` mints a
//!   delegation key for a time window
//!
//! # Security
//!
//! - The bearer token and the delegation key value are never logged
//! - Only connection setup is bounded; in-flight calls run to completion

use crate::storage::delegation::DelegationKey;
use crate::storage::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use common::secret::{ExposeSecret, SecretString};
use common::token_manager::TokenReceiver;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, instrument};

/// Blob service REST version; also the access grant's signed version.
pub const STORAGE_API_VERSION: &str = "2021-08-06";

/// Connection setup bound for storage calls.
const CONNECT_TIMEOUT_SECS: u64 = 5;

/// Blob data-plane operations.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload `data` as `name`, replacing any existing blob.
    async fn put_blob(&self, name: &str, content_type: &str, data: Vec<u8>)
        -> Result<(), StorageError>;

    /// Delete `name`. Returns `false` if there was nothing to delete.
    async fn delete_blob(&self, name: &str) -> Result<bool, StorageError>;

    /// Unsigned URL of `name`.
    fn blob_url(&self, name: &str) -> String;

    /// Storage account name (part of the grant's canonical resource).
    fn account_name(&self) -> &str;

    /// Container holding the blobs.
    fn container_name(&self) -> &str;
}

/// Storage control-plane operation minting delegation keys.
#[async_trait]
pub trait DelegationKeySource: Send + Sync {
    /// Request a key valid from `start` to `expiry`.
    async fn request_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<DelegationKey, StorageError>;
}

/// `KeyInfo` request body.
#[derive(Serialize)]
#[serde(rename = "KeyInfo", rename_all = "PascalCase")]
struct KeyInfo {
    start: String,
    expiry: String,
}

/// `UserDelegationKey` response body.
#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct UserDelegationKeyXml {
    signed_oid: String,
    signed_tid: String,
    signed_start: String,
    signed_expiry: String,
    signed_service: String,
    signed_version: String,
    value: String,
}

/// Format a timestamp the way the storage service expects (whole seconds, `Z`).
pub fn format_storage_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_storage_time(raw: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidResponse(format!("bad timestamp '{raw}': {e}")))
}

/// Parse a `UserDelegationKey` XML document.
pub fn parse_delegation_key(xml: &str) -> Result<DelegationKey, StorageError> {
    let parsed: UserDelegationKeyXml = quick_xml::de::from_str(xml)
        .map_err(|e| StorageError::InvalidResponse(format!("delegation key: {e}")))?;

    Ok(DelegationKey {
        signed_oid: parsed.signed_oid,
        signed_tid: parsed.signed_tid,
        signed_start: parse_storage_time(&parsed.signed_start)?,
        signed_expiry: parse_storage_time(&parsed.signed_expiry)?,
        signed_service: parsed.signed_service,
        signed_version: parsed.signed_version,
        value: SecretString::from(parsed.value),
    })
}

/// Blob REST client for one account and container.
#[derive(Clone)]
pub struct AzureBlobClient {
    http: Client,
    account_url: String,
    account_name: String,
    container_name: String,
    token_rx: TokenReceiver,
}

impl AzureBlobClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Http` if the HTTP client cannot be built.
    pub fn new(
        account_url: String,
        account_name: String,
        container_name: String,
        token_rx: TokenReceiver,
    ) -> Result<Self, StorageError> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| {
                error!(target: "catalog.storage.client", error = %e, "Failed to build HTTP client");
                StorageError::Http(e.to_string())
            })?;

        Ok(Self {
            http,
            account_url: account_url.trim_end_matches('/').to_string(),
            account_name,
            container_name,
            token_rx,
        })
    }

    fn bearer(&self) -> Result<String, StorageError> {
        let token = self.token_rx.token().ok_or(StorageError::Unauthenticated)?;
        Ok(format!("Bearer {}", token.expose_secret()))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> Result<reqwest::RequestBuilder, StorageError> {
        Ok(self
            .http
            .request(method, url)
            .header("Authorization", self.bearer()?)
            .header("x-ms-version", STORAGE_API_VERSION)
            .header("x-ms-date", Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()))
    }
}

fn transport_error(operation: &'static str, e: &reqwest::Error) -> StorageError {
    error!(target: "catalog.storage.client", operation, error = %e, "Storage request failed");
    StorageError::Http(e.to_string())
}

#[async_trait]
impl BlobStore for AzureBlobClient {
    #[instrument(skip(self, data), fields(name = %name, size = data.len()))]
    async fn put_blob(
        &self,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<(), StorageError> {
        let response = self
            .request(reqwest::Method::PUT, &self.blob_url(name))?
            .header("x-ms-blob-type", "BlockBlob")
            .header("Content-Type", content_type)
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error("put_blob", &e))?;

        if response.status().is_success() {
            tracing::debug!(target: "catalog.storage.client", name = %name, "Blob uploaded");
            Ok(())
        } else {
            Err(StorageError::Status {
                status: response.status().as_u16(),
                operation: "put_blob",
            })
        }
    }

    #[instrument(skip(self), fields(name = %name))]
    async fn delete_blob(&self, name: &str) -> Result<bool, StorageError> {
        let response = self
            .request(reqwest::Method::DELETE, &self.blob_url(name))?
            .send()
            .await
            .map_err(|e| transport_error("delete_blob", &e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StorageError::Status {
                status: status.as_u16(),
                operation: "delete_blob",
            }),
        }
    }

    fn blob_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.account_url, self.container_name, name)
    }

    fn account_name(&self) -> &str {
        &self.account_name
    }

    fn container_name(&self) -> &str {
        &self.container_name
    }
}

#[async_trait]
impl DelegationKeySource for AzureBlobClient {
    #[instrument(skip(self))]
    async fn request_delegation_key(
        &self,
        start: DateTime<Utc>,
        expiry: DateTime<Utc>,
    ) -> Result<DelegationKey, StorageError> {
        let body = quick_xml::se::to_string(&KeyInfo {
            start: format_storage_time(start),
            expiry: format_storage_time(expiry),
        })
        .map_err(|e| StorageError::InvalidResponse(format!("KeyInfo serialization: {e}")))?;

        let url = format!("{}/?restype=service&comp=userdelegationkey", self.account_url);
        let response = self
            .request(reqwest::Method::POST, &url)?
            .header("Content-Type", "application/xml")
            .body(format!("<?xml version=\"1.0\" encoding=\"utf-8\"?>{body}"))
            .send()
            .await
            .map_err(|e| transport_error("request_delegation_key", &e))?;

        if !response.status().is_success() {
            return Err(StorageError::Status {
                status: response.status().as_u16(),
                operation: "request_delegation_key",
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| transport_error("request_delegation_key", &e))?;
        parse_delegation_key(&text)
    }
}

/// In-memory implementations for tests.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// A stored blob: content type and bytes.
    pub type StoredBlob = (String, Vec<u8>);

    /// In-memory blob store.
    pub struct MockBlobStore {
        account_url: String,
        account_name: String,
        container_name: String,
        blobs: Mutex<HashMap<String, StoredBlob>>,
        fail_with: Option<StorageError>,
        put_count: AtomicUsize,
    }

    impl MockBlobStore {
        /// A working store for `https://{account}.blob.core.windows.net/{container}`.
        pub fn new(account_name: &str, container_name: &str) -> Self {
            Self {
                account_url: format!("https://{account_name}.blob.core.windows.net"),
                account_name: account_name.to_string(),
                container_name: container_name.to_string(),
                blobs: Mutex::new(HashMap::new()),
                fail_with: None,
                put_count: AtomicUsize::new(0),
            }
        }

        /// A store whose every operation fails with `error`.
        pub fn failing(account_name: &str, container_name: &str, error: StorageError) -> Self {
            Self {
                fail_with: Some(error),
                ..Self::new(account_name, container_name)
            }
        }

        /// Stored blob by name.
        pub fn blob(&self, name: &str) -> Option<StoredBlob> {
            self.blobs.lock().ok()?.get(name).cloned()
        }

        /// Number of upload attempts (including failed ones).
        pub fn put_count(&self) -> usize {
            self.put_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BlobStore for MockBlobStore {
        async fn put_blob(
            &self,
            name: &str,
            content_type: &str,
            data: Vec<u8>,
        ) -> Result<(), StorageError> {
            self.put_count.fetch_add(1, Ordering::SeqCst);
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            self.blobs
                .lock()
                .map_err(|_| StorageError::Http("mock poisoned".to_string()))?
                .insert(name.to_string(), (content_type.to_string(), data));
            Ok(())
        }

        async fn delete_blob(&self, name: &str) -> Result<bool, StorageError> {
            if let Some(err) = &self.fail_with {
                return Err(err.clone());
            }
            Ok(self
                .blobs
                .lock()
                .map_err(|_| StorageError::Http("mock poisoned".to_string()))?
                .remove(name)
                .is_some())
        }

        fn blob_url(&self, name: &str) -> String {
            format!("{}/{}/{}", self.account_url, self.container_name, name)
        }

        fn account_name(&self) -> &str {
            &self.account_name
        }

        fn container_name(&self) -> &str {
            &self.container_name
        }
    }

    /// Delegation key source that mints keys locally and counts calls.
    pub struct MockDelegationKeySource {
        call_count: AtomicUsize,
        lifetime_override: Option<chrono::Duration>,
        fail_with: Mutex<Option<StorageError>>,
    }

    /// Fixed base64 key value used by mock keys.
    pub const MOCK_KEY_VALUE: &str = "AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8=";

    impl MockDelegationKeySource {
        /// Grants exactly the requested window.
        pub fn new() -> Self {
            Self {
                call_count: AtomicUsize::new(0),
                lifetime_override: None,
                fail_with: Mutex::new(None),
            }
        }

        /// Ignores the requested expiry and issues keys expiring `lifetime` from now.
        pub fn with_lifetime(lifetime: chrono::Duration) -> Self {
            Self {
                lifetime_override: Some(lifetime),
                ..Self::new()
            }
        }

        /// Fails every request with `error`.
        pub fn failing(error: StorageError) -> Self {
            Self {
                fail_with: Mutex::new(Some(error)),
                ..Self::new()
            }
        }

        /// Fails every later request with `error`.
        pub fn fail_from_now(&self, error: StorageError) {
            if let Ok(mut fail_with) = self.fail_with.lock() {
                *fail_with = Some(error);
            }
        }

        /// Number of control-plane calls made.
        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    impl Default for MockDelegationKeySource {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl DelegationKeySource for MockDelegationKeySource {
        async fn request_delegation_key(
            &self,
            start: DateTime<Utc>,
            expiry: DateTime<Utc>,
        ) -> Result<DelegationKey, StorageError> {
            let n = self.call_count.fetch_add(1, Ordering::SeqCst);
            let failure = self
                .fail_with
                .lock()
                .map_err(|_| StorageError::Http("mock poisoned".to_string()))?
                .clone();
            if let Some(err) = failure {
                return Err(err);
            }
            let expiry = self
                .lifetime_override
                .map_or(expiry, |lifetime| Utc::now() + lifetime);
            Ok(DelegationKey {
                signed_oid: format!("00000000-0000-4000-8000-{n:012}"),
                signed_tid: "11111111-2222-4333-8444-555555555555".to_string(),
                signed_start: start,
                signed_expiry: expiry,
                signed_service: "b".to_string(),
                signed_version: STORAGE_API_VERSION.to_string(),
                value: SecretString::from(MOCK_KEY_VALUE),
            })
        }
    }
}
