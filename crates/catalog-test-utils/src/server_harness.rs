//! Test server harness for E2E testing
//!
//! Provides `TestCatalogServer` for spawning real Catalog Service instances
//! in tests. The identity provider's key-set endpoint is a wiremock server
//! publishing [`PRIMARY`]; storage is an in-memory mock that can be made to
//! fail.

use crate::crypto_fixtures::{jwks_json, TestSigningKey, PRIMARY};
use crate::token_builders::{TEST_AUDIENCE, TEST_ISSUER};
use catalog_service::auth::{JwksClient, TokenVerifier};
use catalog_service::media::MediaIngestionPipeline;
use catalog_service::middleware::{cors_layer, AuthGateState};
use catalog_service::repositories::{AssetRepository, InMemoryAssetRepository};
use catalog_service::routes::{build_routes, AppState};
use catalog_service::storage::mock::{MockBlobStore, MockDelegationKeySource};
use catalog_service::storage::{
    AccessGrantIssuer, BlobStore, DelegatedCredentialManager, DelegationKeySource, StorageError,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Storage account used by the mock store.
pub const TEST_ACCOUNT: &str = "aiflixmedia";

/// Container used by the mock store.
pub const TEST_CONTAINER: &str = "asset-images";

/// Origin allowed by the test CORS policy.
pub const TEST_ORIGIN: &str = "http://localhost:3000";

/// Path the key set is served from.
pub const JWKS_PATH: &str = "/discovery/v2.0/keys";

/// How the harness wires storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageMode {
    /// Storage not configured: permanent inline fallback.
    #[default]
    Unconfigured,
    /// Working in-memory store.
    Working,
    /// Every upload fails with a 503.
    FailingUploads,
    /// Working store whose delegation keys live 30 minutes, so every
    /// grant goes back to the key source. Pair with
    /// [`MockDelegationKeySource::fail_from_now`] to break grants after
    /// an upload.
    ShortLivedKeys,
}

/// Options for [`TestCatalogServer::spawn`].
#[derive(Debug, Clone)]
pub struct TestServerOptions {
    /// Global auth enforcement flag.
    pub auth_enabled: bool,
    /// Storage wiring.
    pub storage: StorageMode,
    /// Keys published at the key-set endpoint.
    pub published_keys: Vec<TestSigningKey>,
}

impl Default for TestServerOptions {
    fn default() -> Self {
        Self {
            auth_enabled: true,
            storage: StorageMode::Unconfigured,
            published_keys: vec![PRIMARY],
        }
    }
}

impl TestServerOptions {
    pub fn auth_disabled(mut self) -> Self {
        self.auth_enabled = false;
        self
    }

    pub fn storage(mut self, storage: StorageMode) -> Self {
        self.storage = storage;
        self
    }

    pub fn published_keys(mut self, keys: &[TestSigningKey]) -> Self {
        self.published_keys = keys.to_vec();
        self
    }
}

/// Test harness for spawning the Catalog Service in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_health_flow_e2e() -> Result<()> {
///     let server = TestCatalogServer::spawn(TestServerOptions::default()).await?;
///
///     let response = reqwest::get(format!("{}/health", server.url())).await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestCatalogServer {
    addr: SocketAddr,
    jwks_server: MockServer,
    blob_store: Option<Arc<MockBlobStore>>,
    delegation_source: Option<Arc<MockDelegationKeySource>>,
    _handle: JoinHandle<()>,
}

impl TestCatalogServer {
    /// Spawn a new test server instance.
    ///
    /// The server will:
    /// - Serve the key set from a wiremock server
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn(options: TestServerOptions) -> Result<Self, anyhow::Error> {
        let jwks_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(JWKS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(jwks_json(&options.published_keys)))
            .mount(&jwks_server)
            .await;

        let auth = if options.auth_enabled {
            let jwks = Arc::new(JwksClient::new(format!("{}{JWKS_PATH}", jwks_server.uri())));
            let verifier = TokenVerifier::new(
                jwks,
                TEST_ISSUER.to_string(),
                TEST_AUDIENCE.to_string(),
                60,
            );
            AuthGateState::enforcing(Arc::new(verifier))
        } else {
            AuthGateState::disabled()
        };

        let (media, blob_store, delegation_source) = match options.storage {
            StorageMode::Unconfigured => (MediaIngestionPipeline::inline_only(), None, None),
            StorageMode::Working | StorageMode::FailingUploads | StorageMode::ShortLivedKeys => {
                let store = Arc::new(if options.storage == StorageMode::FailingUploads {
                    MockBlobStore::failing(
                        TEST_ACCOUNT,
                        TEST_CONTAINER,
                        StorageError::Status {
                            status: 503,
                            operation: "put_blob",
                        },
                    )
                } else {
                    MockBlobStore::new(TEST_ACCOUNT, TEST_CONTAINER)
                });
                let source = Arc::new(if options.storage == StorageMode::ShortLivedKeys {
                    MockDelegationKeySource::with_lifetime(chrono::Duration::minutes(30))
                } else {
                    MockDelegationKeySource::new()
                });
                let credentials = Arc::new(DelegatedCredentialManager::new(
                    Arc::clone(&source) as Arc<dyn DelegationKeySource>,
                ));
                let grants = Arc::new(AccessGrantIssuer::new(
                    Arc::clone(&store) as Arc<dyn BlobStore>,
                    credentials,
                ));
                (
                    MediaIngestionPipeline::new(Arc::clone(&store) as Arc<dyn BlobStore>, grants),
                    Some(store),
                    Some(source),
                )
            }
        };

        let assets: Arc<dyn AssetRepository> = Arc::new(InMemoryAssetRepository::new());
        let state = Arc::new(AppState {
            assets,
            media: Arc::new(media),
            auth_enabled: options.auth_enabled,
        });

        // Handle without a global recorder; tests may spawn many servers
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();

        let app = build_routes(
            state,
            Arc::new(auth),
            cors_layer(&[TEST_ORIGIN.to_string()]),
            metrics_handle,
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            jwks_server,
            blob_store,
            delegation_source,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The mock identity provider.
    pub fn jwks_server(&self) -> &MockServer {
        &self.jwks_server
    }

    /// The in-memory blob store, if storage is configured.
    pub fn blob_store(&self) -> Option<&MockBlobStore> {
        self.blob_store.as_deref()
    }

    /// The mock delegation key source, if storage is configured.
    pub fn delegation_source(&self) -> Option<&MockDelegationKeySource> {
        self.delegation_source.as_deref()
    }

    /// Number of key-set fetches the server has made.
    pub async fn jwks_fetch_count(&self) -> usize {
        self.jwks_server
            .received_requests()
            .await
            .map(|requests| requests.len())
            .unwrap_or(0)
    }
}

impl Drop for TestCatalogServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
