//! Service construction and lifecycle.
//!
//! [`CatalogServices::start`] wires every long-lived component from the
//! configuration: key-set client, token verifier, storage clients,
//! delegated credential manager, grant issuer and ingestion pipeline. Each
//! owns its own cache state; nothing is global. Background tasks are
//! stopped by [`CatalogServices::shutdown`].

use crate::auth::{JwksClient, TokenVerifier};
use crate::config::{Config, StorageConfig};
use crate::media::MediaIngestionPipeline;
use crate::middleware::{cors_layer, AuthGateState};
use crate::repositories::{AssetRepository, InMemoryAssetRepository};
use crate::routes::{build_routes, AppState};
use crate::storage::{
    AccessGrantIssuer, AzureBlobClient, BlobStore, DelegatedCredentialManager,
    DelegationKeySource, StorageError,
};
use axum::Router;
use common::token_manager::{spawn_token_manager, TokenError, TokenManagerConfig};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// OAuth scope for storage bearer tokens.
pub const STORAGE_TOKEN_SCOPE: &str = "https://storage.azure.com/.default";

/// Startup failures.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Auth is enabled but no identity provider is configured")]
    MissingIdentity,

    #[error("Storage token manager failed to start: {0}")]
    TokenManager(#[from] TokenError),

    #[error("Storage client failed to start: {0}")]
    Storage(#[from] StorageError),
}

/// Running service components.
pub struct CatalogServices {
    /// Handler state.
    pub state: Arc<AppState>,

    /// Auth gate state.
    pub auth: Arc<AuthGateState>,

    /// CORS policy.
    pub cors: CorsLayer,

    background: Vec<JoinHandle<()>>,
}

impl CatalogServices {
    /// Build every component from `config`.
    ///
    /// Never blocks on the network: the key set is fetched on first use and
    /// the storage token manager acquires its first token in the background.
    ///
    /// # Errors
    ///
    /// Returns `StartupError` if a component cannot be constructed.
    pub fn start(config: &Config) -> Result<Self, StartupError> {
        let auth = Arc::new(Self::auth_gate(config)?);

        let mut background = Vec::new();
        let media = match &config.storage {
            Some(storage) => {
                let (handle, pipeline) = Self::storage_pipeline(config, storage)?;
                background.push(handle);
                pipeline
            }
            None => {
                warn!(target: "catalog.services", "Blob storage not configured; images stay inline");
                MediaIngestionPipeline::inline_only()
            }
        };

        let assets: Arc<dyn AssetRepository> = Arc::new(InMemoryAssetRepository::new());
        let state = Arc::new(AppState {
            assets,
            media: Arc::new(media),
            auth_enabled: config.auth_enabled,
        });

        info!(
            target: "catalog.services",
            auth_enabled = config.auth_enabled,
            blob_connected = state.media.is_storage_configured(),
            "Catalog services started"
        );

        Ok(Self {
            state,
            auth,
            cors: cors_layer(&config.cors_allowed_origins),
            background,
        })
    }

    fn auth_gate(config: &Config) -> Result<AuthGateState, StartupError> {
        if !config.auth_enabled {
            warn!(target: "catalog.services", "Authentication DISABLED; development use only");
            return Ok(AuthGateState::disabled());
        }

        let identity = config.identity.as_ref().ok_or(StartupError::MissingIdentity)?;
        let jwks = Arc::new(JwksClient::new(identity.jwks_url.clone()));
        let verifier = TokenVerifier::new(
            jwks,
            identity.issuer.clone(),
            identity.client_id.clone(),
            config.jwt_clock_skew_seconds,
        );
        Ok(AuthGateState::enforcing(Arc::new(verifier)))
    }

    fn storage_pipeline(
        config: &Config,
        storage: &StorageConfig,
    ) -> Result<(JoinHandle<()>, MediaIngestionPipeline), StartupError> {
        let (handle, token_rx) = spawn_token_manager(TokenManagerConfig::new(
            storage.token_url.clone(),
            storage.client_id.clone(),
            storage.client_secret.clone(),
            STORAGE_TOKEN_SCOPE.to_string(),
        ))?;

        let client = match AzureBlobClient::new(
            storage.account_url.clone(),
            storage.account_name.clone(),
            storage.container_name.clone(),
            token_rx,
        ) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                handle.abort();
                return Err(e.into());
            }
        };

        let store: Arc<dyn BlobStore> = client.clone();
        let source: Arc<dyn DelegationKeySource> = client;
        let credentials = Arc::new(DelegatedCredentialManager::new(source));
        let grants = AccessGrantIssuer::new(Arc::clone(&store), credentials)
            .with_lifetime(chrono::Duration::days(config.grant_lifetime_days))
            .with_cap_to_key_lifetime(config.grant_cap_to_key_lifetime);

        info!(
            target: "catalog.services",
            account = %storage.account_name,
            container = %storage.container_name,
            grant_lifetime_days = config.grant_lifetime_days,
            "Blob storage configured"
        );

        Ok((handle, MediaIngestionPipeline::new(store, Arc::new(grants))))
    }

    /// The full router, behind the interceptor chain.
    pub fn router(&self, metrics_handle: PrometheusHandle) -> Router {
        build_routes(
            Arc::clone(&self.state),
            Arc::clone(&self.auth),
            self.cors.clone(),
            metrics_handle,
        )
    }

    /// Stop background tasks.
    pub fn shutdown(self) {
        for handle in self.background {
            handle.abort();
        }
        info!(target: "catalog.services", "Catalog services stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Config::from_vars(&vars).unwrap()
    }

    #[tokio::test]
    async fn test_start_without_storage_is_inline_only() {
        let services = CatalogServices::start(&config(&[
            ("AZURE_TENANT_ID", "T1"),
            ("AZURE_CLIENT_ID", "C1"),
        ]))
        .unwrap();

        assert!(services.auth.enabled);
        assert!(services.state.auth_enabled);
        assert!(!services.state.media.is_storage_configured());
        services.shutdown();
    }

    #[tokio::test]
    async fn test_start_with_auth_disabled() {
        let services = CatalogServices::start(&config(&[("AUTH_ENABLED", "false")])).unwrap();
        assert!(!services.auth.enabled);
        assert!(services.auth.verifier.is_none());
        services.shutdown();
    }

    #[tokio::test]
    async fn test_start_with_storage_spawns_token_manager() {
        let services = CatalogServices::start(&config(&[
            ("AZURE_TENANT_ID", "T1"),
            ("AZURE_CLIENT_ID", "C1"),
            ("BLOB_ACCOUNT_URL", "https://aiflixmedia.blob.core.windows.net"),
            ("STORAGE_CLIENT_ID", "storage-client"),
            ("STORAGE_CLIENT_SECRET", "storage-secret"),
            ("STORAGE_TOKEN_URL", "http://127.0.0.1:9/token"),
        ]))
        .unwrap();

        assert!(services.state.media.is_storage_configured());
        assert_eq!(services.background.len(), 1);
        services.shutdown();
    }
}
