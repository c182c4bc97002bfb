//! Liveness handler.
//!
//! `/health` never requires a bearer token and checks no dependencies.

use crate::models::HealthResponse;
use crate::routes::AppState;
use axum::extract::State;
use axum::Json;
use std::sync::Arc;

/// Handler for GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        auth_enabled: state.auth_enabled,
        blob_connected: state.media.is_storage_configured(),
    })
}
