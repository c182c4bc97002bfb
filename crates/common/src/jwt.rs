//! Pre-verification handling of bearer tokens.
//!
//! Nothing here checks a signature. The catalog reads the unverified JOSE
//! header only to pick which published signing key the token claims, then
//! hands the token to `jsonwebtoken` for the real checks. Oversized input
//! is refused before any base64 or JSON work happens.
//!
//! ```rust
//! use common::jwt::{extract_kid, JwtValidationError};
//!
//! // "eyJhbGciOiJSUzI1NiJ9" is {"alg":"RS256"}: no kid
//! assert_eq!(
//!     extract_kid("eyJhbGciOiJSUzI1NiJ9.e30.c2ln"),
//!     Err(JwtValidationError::MissingKid)
//! );
//! ```

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Largest bearer token accepted, in bytes.
///
/// Access tokens carrying group claims sit around 1.5-3KB.
pub const MAX_JWT_SIZE_BYTES: usize = 8 * 1024;

/// Leeway applied to `exp` when none is configured.
pub const DEFAULT_CLOCK_SKEW: Duration = Duration::from_secs(60);

/// Upper bound on configurable leeway.
pub const MAX_CLOCK_SKEW: Duration = Duration::from_secs(10 * 60);

/// Why a token's header could not be read.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JwtValidationError {
    #[error("token is larger than 8KB")]
    TokenTooLarge,

    #[error("token is not a compact JWS")]
    MalformedToken,

    #[error("token header carries no usable kid")]
    MissingKid,
}

/// The only header field the catalog looks at before verification.
///
/// `kid` is kept as raw JSON so a number or `null` reports `MissingKid`
/// rather than a parse failure.
#[derive(Deserialize)]
struct UnverifiedHeader {
    #[serde(default)]
    kid: Option<serde_json::Value>,
}

/// Return the `kid` named in the token header.
///
/// The result selects a key for signature verification and must not be
/// trusted for anything else.
///
/// # Errors
///
/// - [`JwtValidationError::TokenTooLarge`] above [`MAX_JWT_SIZE_BYTES`]
/// - [`JwtValidationError::MalformedToken`] unless the token is three
///   dot-separated segments with a base64url JSON header
/// - [`JwtValidationError::MissingKid`] when `kid` is absent, empty, or
///   not a string
pub fn extract_kid(token: &str) -> Result<String, JwtValidationError> {
    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            "Rejecting oversized bearer token"
        );
        return Err(JwtValidationError::TokenTooLarge);
    }

    let header = unverified_header(token)?;

    match header.kid {
        Some(serde_json::Value::String(kid)) if !kid.is_empty() => Ok(kid),
        _ => Err(JwtValidationError::MissingKid),
    }
}

fn unverified_header(token: &str) -> Result<UnverifiedHeader, JwtValidationError> {
    let mut segments = token.split('.');
    let (Some(header), Some(_payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        tracing::debug!(target: "common.jwt", "Bearer token is not three segments");
        return Err(JwtValidationError::MalformedToken);
    };

    let raw = URL_SAFE_NO_PAD.decode(header).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Header is not base64url");
        JwtValidationError::MalformedToken
    })?;

    serde_json::from_slice(&raw).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Header is not a JSON object");
        JwtValidationError::MalformedToken
    })
}
