//! Media ingestion pipeline.
//!
//! Per image:
//!
//! ```text
//! Received -> Decoded -> UploadAttempted -> Uploaded -> GrantIssued -> Done(url)
//!                                        \-> UploadFailed -> Done(inline)
//! ```
//!
//! Both `Done` states are terminal and there are no retries. Any failure
//! before a URL exists (no storage, bad payload, upload or grant error)
//! yields the original payload unchanged, so ingestion never fails the
//! create or update that owns the image.

use crate::observability::metrics;
use crate::storage::{AccessGrantIssuer, BlobStore, StorageError};
use base64::{engine::general_purpose::STANDARD, Engine};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Content type assumed when the payload carries no media-type prefix.
pub const DEFAULT_CONTENT_TYPE: &str = "image/png";

/// Which image of an entity a payload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRole {
    /// The entity's main picture.
    Main,
    /// The N-th screenshot (zero-based).
    Screenshot(usize),
}

impl ImageRole {
    /// Storage path of this image for entity `id`.
    pub fn blob_name(self, id: Uuid) -> String {
        match self {
            Self::Main => format!("{id}/main.png"),
            Self::Screenshot(index) => format!("{id}/screenshot_{index}.png"),
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Screenshot(index) => write!(f, "screenshot_{index}"),
        }
    }
}

/// Terminal state of one ingested image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Uploaded; `url` carries a read-only grant.
    Uploaded {
        /// Blob URL with the signed grant query.
        url: String,
    },
    /// Not uploaded; the original payload, byte for byte.
    Inline {
        /// The payload exactly as received.
        payload: String,
    },
}

impl IngestOutcome {
    /// The value to store on the owning entity.
    pub fn into_value(self) -> String {
        match self {
            Self::Uploaded { url } => url,
            Self::Inline { payload } => payload,
        }
    }
}

/// Why an image stayed inline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("storage not configured")]
    NotConfigured,

    #[error("invalid base64 image: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("empty image")]
    EmptyImage,

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A decoded inline image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedImage {
    /// Media type from the `data:` prefix, or the default.
    pub content_type: String,
    /// Raw image bytes.
    pub bytes: Vec<u8>,
}

/// Decode `data:<type>;base64,<data>` or bare base64.
///
/// Everything up to the first comma is treated as the prefix.
///
/// # Errors
///
/// `IngestError::Decode` for invalid base64, `IngestError::EmptyImage` when
/// nothing is left after decoding.
pub fn decode_inline_image(payload: &str) -> Result<DecodedImage, IngestError> {
    let (prefix, data) = match payload.split_once(',') {
        Some((prefix, data)) => (Some(prefix), data),
        None => (None, payload),
    };

    let content_type = prefix
        .and_then(|p| p.strip_prefix("data:"))
        .and_then(|p| p.split(';').next())
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string();

    let bytes = STANDARD.decode(data.trim())?;
    if bytes.is_empty() {
        return Err(IngestError::EmptyImage);
    }

    Ok(DecodedImage {
        content_type,
        bytes,
    })
}

/// Storage half of the pipeline; absent when storage is not configured.
struct StorageBackend {
    store: Arc<dyn BlobStore>,
    grants: Arc<AccessGrantIssuer>,
}

/// Media ingestion pipeline.
pub struct MediaIngestionPipeline {
    backend: Option<StorageBackend>,
}

impl MediaIngestionPipeline {
    /// Pipeline backed by `store`, issuing grants with `grants`.
    pub fn new(store: Arc<dyn BlobStore>, grants: Arc<AccessGrantIssuer>) -> Self {
        Self {
            backend: Some(StorageBackend { store, grants }),
        }
    }

    /// Pipeline with no storage: every image stays inline.
    pub fn inline_only() -> Self {
        Self { backend: None }
    }

    /// Whether storage is configured.
    pub fn is_storage_configured(&self) -> bool {
        self.backend.is_some()
    }

    /// Whether `value` (as stored on an entity) points at an uploaded blob.
    pub fn is_uploaded(&self, value: &str) -> bool {
        self.backend
            .as_ref()
            .is_some_and(|b| value.starts_with(&b.store.blob_url("")))
    }

    /// Ingest one image for entity `id`.
    ///
    /// Never fails: any fault yields `IngestOutcome::Inline` with `payload`
    /// unchanged.
    #[instrument(skip(self, payload), fields(id = %id, role = %role, size = payload.len()))]
    pub async fn ingest(&self, payload: &str, id: Uuid, role: ImageRole) -> IngestOutcome {
        match self.try_upload(payload, id, role).await {
            Ok(url) => {
                info!(target: "catalog.media", id = %id, role = %role, "Image uploaded");
                metrics::record_media_ingest("uploaded");
                IngestOutcome::Uploaded { url }
            }
            Err(reason) => {
                warn!(target: "catalog.media", id = %id, role = %role, reason = %reason, "Image kept inline");
                metrics::record_media_ingest("inline");
                IngestOutcome::Inline {
                    payload: payload.to_string(),
                }
            }
        }
    }

    async fn try_upload(
        &self,
        payload: &str,
        id: Uuid,
        role: ImageRole,
    ) -> Result<String, IngestError> {
        let backend = self.backend.as_ref().ok_or(IngestError::NotConfigured)?;

        let image = decode_inline_image(payload)?;
        let name = role.blob_name(id);

        backend
            .store
            .put_blob(&name, &image.content_type, image.bytes)
            .await?;

        Ok(backend.grants.issue(&name).await?)
    }

    /// Issue a fresh grant URL for an already uploaded image.
    ///
    /// # Errors
    ///
    /// Storage faults propagate; there is no inline payload to fall back to.
    #[instrument(skip(self), fields(id = %id, role = %role))]
    pub async fn reissue_grant(&self, id: Uuid, role: ImageRole) -> Result<String, StorageError> {
        let backend = self.backend.as_ref().ok_or(StorageError::NotConfigured)?;
        backend.grants.issue(&role.blob_name(id)).await
    }

    /// Delete an uploaded image.
    ///
    /// Returns `false` when there was nothing to delete, including when
    /// storage is not configured.
    ///
    /// # Errors
    ///
    /// Propagates storage faults other than "not found".
    #[instrument(skip(self), fields(id = %id, role = %role))]
    pub async fn remove(&self, id: Uuid, role: ImageRole) -> Result<bool, StorageError> {
        match &self.backend {
            Some(backend) => backend.store.delete_blob(&role.blob_name(id)).await,
            None => Ok(false),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::storage::client::mock::{MockBlobStore, MockDelegationKeySource};
    use crate::storage::{DelegatedCredentialManager, DelegationKeySource};

    // 1x1 transparent PNG
    const PNG_BASE64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    fn asset_id() -> Uuid {
        Uuid::parse_str("0b6f1a9e-0000-4000-8000-000000000001").unwrap()
    }

    fn pipeline_with(store: Arc<MockBlobStore>) -> MediaIngestionPipeline {
        let source: Arc<dyn DelegationKeySource> = Arc::new(MockDelegationKeySource::new());
        let credentials = Arc::new(DelegatedCredentialManager::new(source));
        let grants = Arc::new(AccessGrantIssuer::new(
            Arc::clone(&store) as Arc<dyn BlobStore>,
            credentials,
        ));
        MediaIngestionPipeline::new(store, grants)
    }

    #[test]
    fn test_blob_names() {
        assert_eq!(
            ImageRole::Main.blob_name(asset_id()),
            "0b6f1a9e-0000-4000-8000-000000000001/main.png"
        );
        assert_eq!(
            ImageRole::Screenshot(2).blob_name(asset_id()),
            "0b6f1a9e-0000-4000-8000-000000000001/screenshot_2.png"
        );
    }

    #[test]
    fn test_decode_data_url() {
        let image = decode_inline_image(&format!("data:image/jpeg;base64,{PNG_BASE64}")).unwrap();
        assert_eq!(image.content_type, "image/jpeg");
        assert_eq!(image.bytes.get(1..4), Some(&b"PNG"[..]));
    }

    #[test]
    fn test_decode_bare_base64_defaults_to_png() {
        let image = decode_inline_image(PNG_BASE64).unwrap();
        assert_eq!(image.content_type, DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(
            decode_inline_image("data:image/png;base64,@@@"),
            Err(IngestError::Decode(_))
        ));
        assert_eq!(
            decode_inline_image("data:image/png;base64,"),
            Err(IngestError::EmptyImage)
        );
    }

    #[tokio::test]
    async fn test_try_upload_reports_why_image_stayed_inline() {
        let pipeline = MediaIngestionPipeline::inline_only();
        assert_eq!(
            pipeline.try_upload(PNG_BASE64, asset_id(), ImageRole::Main).await,
            Err(IngestError::NotConfigured)
        );

        let failing = pipeline_with(Arc::new(MockBlobStore::failing(
            "a",
            "c",
            StorageError::Status {
                status: 503,
                operation: "put_blob",
            },
        )));
        assert_eq!(
            failing.try_upload(PNG_BASE64, asset_id(), ImageRole::Main).await,
            Err(IngestError::Storage(StorageError::Status {
                status: 503,
                operation: "put_blob",
            }))
        );
    }

    #[tokio::test]
    async fn test_upload_returns_grant_url() {
        let store = Arc::new(MockBlobStore::new("aiflixmedia", "asset-images"));
        let pipeline = pipeline_with(Arc::clone(&store));
        let payload = format!("data:image/png;base64,{PNG_BASE64}");

        let outcome = pipeline.ingest(&payload, asset_id(), ImageRole::Main).await;

        let IngestOutcome::Uploaded { url } = outcome else {
            panic!("expected upload, got {outcome:?}");
        };
        assert!(url.starts_with(
            "https://aiflixmedia.blob.core.windows.net/asset-images/0b6f1a9e-0000-4000-8000-000000000001/main.png?"
        ));
        assert!(pipeline.is_uploaded(&url));

        let (content_type, bytes) = store
            .blob("0b6f1a9e-0000-4000-8000-000000000001/main.png")
            .unwrap();
        assert_eq!(content_type, "image/png");
        assert_eq!(bytes, STANDARD.decode(PNG_BASE64).unwrap());
    }

    #[tokio::test]
    async fn test_upload_failure_returns_payload_unchanged() {
        let store = Arc::new(MockBlobStore::failing(
            "aiflixmedia",
            "asset-images",
            StorageError::Status {
                status: 503,
                operation: "put_blob",
            },
        ));
        let pipeline = pipeline_with(Arc::clone(&store));
        let payload = format!("data:image/png;base64,{PNG_BASE64}");

        let outcome = pipeline.ingest(&payload, asset_id(), ImageRole::Screenshot(0)).await;

        assert_eq!(outcome, IngestOutcome::Inline { payload: payload.clone() });
        assert_eq!(outcome.into_value(), payload);
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn test_no_storage_keeps_inline() {
        let pipeline = MediaIngestionPipeline::inline_only();
        let payload = format!("data:image/png;base64,{PNG_BASE64}");

        let outcome = pipeline.ingest(&payload, asset_id(), ImageRole::Main).await;

        assert_eq!(outcome, IngestOutcome::Inline { payload: payload.clone() });
        assert!(!pipeline.is_uploaded(&payload));
    }

    #[tokio::test]
    async fn test_undecodable_payload_keeps_inline_without_upload() {
        let store = Arc::new(MockBlobStore::new("a", "c"));
        let pipeline = pipeline_with(Arc::clone(&store));

        let outcome = pipeline.ingest("not an image", asset_id(), ImageRole::Main).await;

        assert_eq!(
            outcome,
            IngestOutcome::Inline {
                payload: "not an image".to_string()
            }
        );
        assert_eq!(store.put_count(), 0);
    }

    #[tokio::test]
    async fn test_grant_failure_keeps_inline() {
        let store = Arc::new(MockBlobStore::new("a", "c"));
        let source: Arc<dyn DelegationKeySource> = Arc::new(MockDelegationKeySource::failing(
            StorageError::Http("control plane down".to_string()),
        ));
        let grants = Arc::new(AccessGrantIssuer::new(
            Arc::clone(&store) as Arc<dyn BlobStore>,
            Arc::new(DelegatedCredentialManager::new(source)),
        ));
        let pipeline = MediaIngestionPipeline::new(store, grants);

        let outcome = pipeline.ingest(PNG_BASE64, asset_id(), ImageRole::Main).await;
        assert_eq!(
            outcome,
            IngestOutcome::Inline {
                payload: PNG_BASE64.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_reissue_without_storage_fails() {
        let pipeline = MediaIngestionPipeline::inline_only();
        assert_eq!(
            pipeline.reissue_grant(asset_id(), ImageRole::Main).await,
            Err(StorageError::NotConfigured)
        );
    }

    #[tokio::test]
    async fn test_remove_tolerates_nothing_to_delete() {
        assert!(!MediaIngestionPipeline::inline_only()
            .remove(asset_id(), ImageRole::Main)
            .await
            .unwrap());

        let store = Arc::new(MockBlobStore::new("a", "c"));
        let pipeline = pipeline_with(Arc::clone(&store));
        assert!(!pipeline.remove(asset_id(), ImageRole::Main).await.unwrap());

        pipeline.ingest(PNG_BASE64, asset_id(), ImageRole::Main).await;
        assert!(pipeline.remove(asset_id(), ImageRole::Main).await.unwrap());
    }
}
