//! Auth gate for every inbound request.
//!
//! Extracts the Bearer token from the Authorization header, verifies it with
//! the token verifier, and injects the claims into request extensions.
//!
//! # Contract
//!
//! - The liveness path, the metrics scrape path and pre-flight `OPTIONS`
//!   requests always pass
//! - With enforcement disabled every request passes, header or not
//! - Otherwise a missing or malformed header, or any verifier failure, is
//!   rejected with 401 and a reason; the handler never runs

use crate::auth::{Claims, TokenVerifier};
use crate::errors::{AuthFailure, CatalogError};
use crate::observability::metrics;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::instrument;

/// Liveness probe path.
pub const HEALTH_PATH: &str = "/health";

/// Prometheus scrape path.
pub const METRICS_PATH: &str = "/metrics";

/// State for the auth gate.
#[derive(Clone)]
pub struct AuthGateState {
    /// Global enforcement flag.
    pub enabled: bool,

    /// Token verifier; `None` only when enforcement is disabled.
    pub verifier: Option<Arc<TokenVerifier>>,
}

impl AuthGateState {
    /// Gate that enforces authentication with the given verifier.
    pub fn enforcing(verifier: Arc<TokenVerifier>) -> Self {
        Self {
            enabled: true,
            verifier: Some(verifier),
        }
    }

    /// Gate that lets everything through (local development only).
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            verifier: None,
        }
    }
}

/// Whether a request skips authentication regardless of configuration.
fn is_exempt(req: &Request) -> bool {
    req.method() == Method::OPTIONS
        || matches!(req.uri().path(), HEALTH_PATH | METRICS_PATH)
}

/// Extract the token from `Authorization: Bearer <token>`.
fn bearer_token(req: &Request) -> Result<&str, AuthFailure> {
    let value = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(AuthFailure::MissingHeader)?
        .to_str()
        .map_err(|_| AuthFailure::MalformedHeader)?;

    let (scheme, token) = value.split_once(' ').ok_or(AuthFailure::MalformedHeader)?;
    let token = token.trim();
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return Err(AuthFailure::MalformedHeader);
    }
    Ok(token)
}

/// Auth gate middleware.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
#[instrument(skip_all, name = "catalog.middleware.auth")]
pub async fn auth_gate(
    State(state): State<Arc<AuthGateState>>,
    mut req: Request,
    next: Next,
) -> Response {
    if is_exempt(&req) || !state.enabled {
        return next.run(req).await;
    }

    // Owned so no borrow of the request is held across the await
    let token = bearer_token(&req).map(ToString::to_string);

    let result = match (token, state.verifier.as_ref()) {
        (Err(failure), _) => Err(failure),
        (Ok(token), Some(verifier)) => verifier.verify(&token).await,
        // Enforcing without a verifier is a wiring fault; never let it through
        (Ok(_), None) => Err(AuthFailure::KeySetUnavailable),
    };

    match result {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        }
        Err(failure) => {
            tracing::debug!(
                target: "catalog.middleware.auth",
                reason = failure.reason(),
                path = %req.uri().path(),
                "Request rejected"
            );
            metrics::record_auth_failure(failure.reason());
            CatalogError::Unauthorized(failure).into_response()
        }
    }
}

/// Extension trait for extracting claims from a request.
pub trait ClaimsExt {
    /// Get the verified claims from request extensions.
    ///
    /// Returns `None` when enforcement is disabled or the path is exempt.
    fn claims(&self) -> Option<&Claims>;
}

impl<B> ClaimsExt for axum::http::Request<B> {
    fn claims(&self) -> Option<&Claims> {
        self.extensions().get::<Claims>()
    }
}
