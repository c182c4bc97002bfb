//! HTTP routes for the Catalog Service.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::media::MediaIngestionPipeline;
use crate::middleware::{interceptor_chain, AuthGateState};
use crate::repositories::AssetRepository;
use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    /// Asset persistence.
    pub assets: Arc<dyn AssetRepository>,

    /// Media ingestion pipeline (inline-only when storage is not configured).
    pub media: Arc<MediaIngestionPipeline>,

    /// Whether the auth gate enforces tokens; reported by `/health`.
    pub auth_enabled: bool,
}

/// Build the application routes.
///
/// - `/health` - Liveness probe, never authenticated
/// - `/metrics` - Prometheus scrape, never authenticated
/// - `/api/me` - Claims carried by the request
/// - `/api/assets[/...]` - Asset and media endpoints
///
/// Every route sits behind the interceptor chain (CORS, tracing, auth gate);
/// the gate itself lets the two operational paths through.
pub fn build_routes(
    state: Arc<AppState>,
    auth: Arc<AuthGateState>,
    cors: CorsLayer,
    metrics_handle: PrometheusHandle,
) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/me", get(handlers::get_me))
        .route(
            "/api/assets",
            get(handlers::list_assets).post(handlers::create_asset),
        )
        .route("/api/assets/:id", get(handlers::get_asset))
        .route(
            "/api/assets/:id/media/main",
            get(handlers::main_media_url).delete(handlers::delete_main_media),
        )
        .route(
            "/api/assets/:id/media/screenshots/:index",
            get(handlers::screenshot_media_url),
        )
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    interceptor_chain(api_routes.merge(metrics_routes), cors, auth)
}
