//! Catalog Service models.
//!
//! Field names are camelCase on the wire to match the catalog frontend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for `POST /api/assets`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetCreate {
    pub asset_name: String,
    pub asset_description: String,
    pub created_by: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub architecture_url: Option<String>,
    #[serde(default)]
    pub presentation_url: Option<String>,
    #[serde(default)]
    pub github_url: Option<String>,

    /// Inline image payload (`data:<type>;base64,...` or bare base64).
    #[serde(default)]
    pub asset_picture: Option<String>,

    /// Inline screenshot payloads, in display order.
    #[serde(default)]
    pub screenshots: Vec<String>,
}

/// A stored asset.
///
/// `asset_picture` and each screenshot hold either a blob URL with a
/// read-only grant, or the original inline payload if upload failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Asset {
    pub id: Uuid,
    pub asset_name: String,
    pub asset_description: String,
    pub created_by: String,
    pub tags: Vec<String>,
    pub architecture_url: Option<String>,
    pub presentation_url: Option<String>,
    pub github_url: Option<String>,
    pub asset_picture: Option<String>,
    pub screenshots: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process serves requests.
    pub status: String,

    /// Whether the auth gate enforces tokens.
    pub auth_enabled: bool,

    /// Whether blob storage is configured.
    pub blob_connected: bool,
}

/// Response for `GET /api/me`.
#[derive(Debug, Clone, Serialize)]
pub struct MeResponse {
    /// False when the auth gate is disabled and no claims exist.
    pub authenticated: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,

    pub scopes: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Response for the grant re-issue endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaUrlResponse {
    /// Blob URL with a fresh read-only grant.
    pub url: String,
}
