//! Current user handler.
//!
//! Echoes the claims the auth gate carried into the request.

use crate::auth::Claims;
use crate::models::MeResponse;
use axum::{Extension, Json};
use tracing::instrument;

/// Handler for GET /api/me
///
/// With the auth gate disabled there are no claims and the response is
/// `{"authenticated": false, "scopes": []}`.
#[instrument(skip_all, name = "catalog.handlers.me")]
pub async fn get_me(claims: Option<Extension<Claims>>) -> Json<MeResponse> {
    let Some(Extension(claims)) = claims else {
        return Json(MeResponse {
            authenticated: false,
            sub: None,
            name: None,
            preferred_username: None,
            tid: None,
            scopes: Vec::new(),
            exp: None,
        });
    };

    let scopes = claims.scopes().iter().map(|s| s.to_string()).collect();
    Json(MeResponse {
        authenticated: true,
        sub: Some(claims.sub),
        name: claims.name,
        preferred_username: claims.preferred_username,
        tid: claims.tid,
        scopes,
        exp: Some(claims.exp),
    })
}
