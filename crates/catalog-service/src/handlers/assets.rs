//! Asset handlers.
//!
//! - `POST /api/assets` - Create asset; images go through the ingestion pipeline
//! - `GET /api/assets` - List assets, newest first
//! - `GET /api/assets/{id}` - One asset
//! - `GET /api/assets/{id}/media/main` - Fresh grant URL for the main image
//! - `GET /api/assets/{id}/media/screenshots/{index}` - Fresh grant URL for a screenshot
//! - `DELETE /api/assets/{id}/media/main` - Remove the main image blob
//!
//! Ingestion never fails a create. Re-issuing a grant has no inline payload
//! to fall back to, so storage faults there surface as 500.

use crate::errors::CatalogError;
use crate::media::ImageRole;
use crate::models::{Asset, AssetCreate, MediaUrlResponse};
use crate::routes::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// Handler for POST /api/assets
#[instrument(skip_all, name = "catalog.handlers.create_asset")]
pub async fn create_asset(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AssetCreate>,
) -> Result<Json<Asset>, CatalogError> {
    if body.asset_name.trim().is_empty() {
        return Err(CatalogError::BadRequest("assetName is required".to_string()));
    }

    let id = Uuid::new_v4();

    let asset_picture = match body.asset_picture.as_deref() {
        Some(payload) if !payload.is_empty() => Some(
            state
                .media
                .ingest(payload, id, ImageRole::Main)
                .await
                .into_value(),
        ),
        _ => None,
    };

    let mut screenshots = Vec::with_capacity(body.screenshots.len());
    for (index, payload) in body.screenshots.iter().enumerate() {
        let outcome = state
            .media
            .ingest(payload, id, ImageRole::Screenshot(index))
            .await;
        screenshots.push(outcome.into_value());
    }

    let asset = state
        .assets
        .insert(Asset {
            id,
            asset_name: body.asset_name,
            asset_description: body.asset_description,
            created_by: body.created_by,
            tags: body.tags,
            architecture_url: body.architecture_url,
            presentation_url: body.presentation_url,
            github_url: body.github_url,
            asset_picture,
            screenshots,
            created_at: Utc::now(),
        })
        .await?;

    info!(target: "catalog.handlers.assets", id = %asset.id, "Asset created");
    Ok(Json(asset))
}

/// Handler for GET /api/assets
pub async fn list_assets(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Asset>>, CatalogError> {
    Ok(Json(state.assets.list().await?))
}

/// Handler for GET /api/assets/{id}
pub async fn get_asset(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Asset>, CatalogError> {
    Ok(Json(find_asset(&state, id).await?))
}

async fn find_asset(state: &AppState, id: Uuid) -> Result<Asset, CatalogError> {
    state
        .assets
        .get(id)
        .await?
        .ok_or_else(|| CatalogError::NotFound("Asset not found".to_string()))
}

/// Handler for GET /api/assets/{id}/media/main
///
/// Stores and returns a fresh grant URL, replacing one that may have
/// outlived its signing key.
#[instrument(skip(state), name = "catalog.handlers.main_media_url")]
pub async fn main_media_url(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<MediaUrlResponse>, CatalogError> {
    let mut asset = find_asset(&state, id).await?;

    let uploaded = asset
        .asset_picture
        .as_deref()
        .is_some_and(|value| state.media.is_uploaded(value));
    if !uploaded {
        return Err(CatalogError::NotFound("No uploaded image".to_string()));
    }

    let url = state.media.reissue_grant(id, ImageRole::Main).await?;
    asset.asset_picture = Some(url.clone());
    state.assets.update(asset).await?;

    Ok(Json(MediaUrlResponse { url }))
}

/// Handler for GET /api/assets/{id}/media/screenshots/{index}
#[instrument(skip(state), name = "catalog.handlers.screenshot_media_url")]
pub async fn screenshot_media_url(
    State(state): State<Arc<AppState>>,
    Path((id, index)): Path<(Uuid, usize)>,
) -> Result<Json<MediaUrlResponse>, CatalogError> {
    let mut asset = find_asset(&state, id).await?;

    let uploaded = asset
        .screenshots
        .get(index)
        .is_some_and(|value| state.media.is_uploaded(value));
    if !uploaded {
        return Err(CatalogError::NotFound("No uploaded image".to_string()));
    }

    let url = state
        .media
        .reissue_grant(id, ImageRole::Screenshot(index))
        .await?;
    if let Some(slot) = asset.screenshots.get_mut(index) {
        slot.clone_from(&url);
    }
    state.assets.update(asset).await?;

    Ok(Json(MediaUrlResponse { url }))
}

/// Handler for DELETE /api/assets/{id}/media/main
///
/// Returns 204 whether or not a blob existed. An inline picture is left
/// on the asset untouched.
#[instrument(skip(state), name = "catalog.handlers.delete_main_media")]
pub async fn delete_main_media(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, CatalogError> {
    let mut asset = find_asset(&state, id).await?;

    let deleted = state.media.remove(id, ImageRole::Main).await?;
    if asset
        .asset_picture
        .as_deref()
        .is_some_and(|value| state.media.is_uploaded(value))
    {
        asset.asset_picture = None;
        state.assets.update(asset).await?;
    }

    info!(target: "catalog.handlers.assets", id = %id, deleted, "Main image removed");
    Ok(StatusCode::NO_CONTENT)
}
