//! Catalog Service error types.
//!
//! All errors map to appropriate HTTP status codes via the `IntoResponse` impl.
//! Authentication failures carry a machine-readable reason so clients can tell
//! an expired token from a misconfigured audience. Storage and internal error
//! details are logged server-side and replaced with generic messages.

use crate::storage::StorageError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Why a request failed authentication.
///
/// Every variant surfaces as 401; none of them is ever a server error.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("Missing Authorization header")]
    MissingHeader,

    /// Present, but not `Bearer <token>`.
    #[error("Authorization header is not a Bearer token")]
    MalformedHeader,

    #[error("The access token is malformed")]
    MalformedToken,

    #[error("The access token was signed with an unknown key")]
    UnknownSigningKey,

    #[error("The access token has expired")]
    ExpiredSignature,

    #[error("The access token signature is invalid")]
    InvalidSignature,

    #[error("The access token was issued for a different audience")]
    AudienceMismatch,

    #[error("The access token was issued by an unexpected issuer")]
    IssuerMismatch,

    /// The signing keys could not be obtained. Fails closed.
    #[error("The access token could not be verified")]
    KeySetUnavailable,
}

impl AuthFailure {
    /// Short, stable reason code (response body and metric label).
    pub fn reason(&self) -> &'static str {
        match self {
            AuthFailure::MissingHeader => "missing_header",
            AuthFailure::MalformedHeader => "malformed_header",
            AuthFailure::MalformedToken => "malformed_token",
            AuthFailure::UnknownSigningKey => "unknown_signing_key",
            AuthFailure::ExpiredSignature => "expired",
            AuthFailure::InvalidSignature => "invalid_signature",
            AuthFailure::AudienceMismatch => "audience_mismatch",
            AuthFailure::IssuerMismatch => "issuer_mismatch",
            AuthFailure::KeySetUnavailable => "key_set_unavailable",
        }
    }
}

/// Catalog Service error type.
///
/// Maps to appropriate HTTP status codes:
/// - Unauthorized: 401 Unauthorized
/// - NotFound: 404 Not Found
/// - BadRequest: 400 Bad Request
/// - Storage, Internal: 500 Internal Server Error
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthFailure),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Internal server error")]
    Internal,
}

impl CatalogError {
    /// Returns the HTTP status code for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            CatalogError::Unauthorized(_) => 401,
            CatalogError::NotFound(_) => 404,
            CatalogError::BadRequest(_) => 400,
            CatalogError::Storage(_) | CatalogError::Internal => 500,
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<&'static str>,
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let (status, code, message, reason) = match &self {
            CatalogError::Unauthorized(failure) => (
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                failure.to_string(),
                Some(failure.reason()),
            ),
            CatalogError::NotFound(resource) => {
                (StatusCode::NOT_FOUND, "NOT_FOUND", resource.clone(), None)
            }
            CatalogError::BadRequest(reason) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", reason.clone(), None)
            }
            CatalogError::Storage(err) => {
                // Log actual error server-side, return generic message to client
                tracing::error!(target: "catalog.storage", error = %err, "Storage operation failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "STORAGE_ERROR",
                    "An internal storage error occurred".to_string(),
                    None,
                )
            }
            CatalogError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
                None,
            ),
        };

        let error_response = ErrorResponse {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                reason,
            },
        };

        let mut response = (status, Json(error_response)).into_response();

        if let CatalogError::Unauthorized(failure) = &self {
            let challenge = match failure {
                AuthFailure::MissingHeader => "Bearer realm=\"catalog-api\"".to_string(),
                AuthFailure::MalformedHeader => {
                    "Bearer realm=\"catalog-api\", error=\"invalid_request\"".to_string()
                }
                other => format!(
                    "Bearer realm=\"catalog-api\", error=\"invalid_token\", error_description=\"{}\"",
                    other.reason()
                ),
            };
            if let Ok(header_value) = challenge.parse() {
                response
                    .headers_mut()
                    .insert("WWW-Authenticate", header_value);
            }
        }

        response
    }
}
