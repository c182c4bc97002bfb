//! Middleware for the Catalog Service.
//!
//! # Components
//!
//! - `auth` - The auth gate
//!
//! # Interceptor order
//!
//! [`interceptor_chain`] applies, outermost first:
//!
//! 1. Request tracing
//! 2. CORS policy
//! 3. Auth gate
//!
//! CORS wraps the auth gate, so a 401 from the gate still carries the
//! cross-origin headers the browser needs to read it. Tracing sits outside
//! CORS: `Cors` needs a response body with `Default`, which the trace
//! layer's body does not implement.

pub mod auth;

pub use auth::{auth_gate, AuthGateState, ClaimsExt};

use axum::http::HeaderValue;
use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

/// CORS policy for the configured browser origins.
///
/// Origins that do not parse as header values are skipped with a warning.
pub fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(target: "catalog.middleware.cors", origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Wrap `router` in the ordered interceptor chain.
///
/// `ServiceBuilder` layers run in the order they are added, so the first
/// layer listed is the outermost.
pub fn interceptor_chain<S>(router: Router<S>, cors: CorsLayer, auth: Arc<AuthGateState>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router.layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors)
            .layer(axum::middleware::from_fn_with_state(auth, auth_gate)),
    )
}
