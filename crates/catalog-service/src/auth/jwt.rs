//! Bearer-token verification.
//!
//! Verifies RS256 access tokens against the identity provider's published
//! keys and the configured tenant issuer and client audience.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing (DoS prevention)
//! - Only RS256 is accepted; the header `alg` never selects the algorithm
//! - Signature, issuer, audience and expiry must all pass; there is no
//!   partially valid token
//! - Every failure is an `AuthFailure`, never a server error

use crate::auth::claims::Claims;
use crate::auth::jwks::{Jwk, JwksClient};
use crate::errors::AuthFailure;
use common::jwt::{extract_kid, JwtValidationError};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::sync::Arc;
use tracing::instrument;

/// Claims every accepted token must carry.
const REQUIRED_CLAIMS: [&str; 4] = ["exp", "iss", "aud", "sub"];

/// Token verifier backed by the key-set client.
pub struct TokenVerifier {
    /// Key-set client for fetching public keys.
    jwks_client: Arc<JwksClient>,

    /// Expected `iss`.
    issuer: String,

    /// Expected `aud` (the API's client id).
    audience: String,

    /// Leeway in seconds applied to `exp`.
    clock_skew_seconds: u64,
}

impl TokenVerifier {
    /// Create a new verifier.
    pub fn new(
        jwks_client: Arc<JwksClient>,
        issuer: String,
        audience: String,
        clock_skew_seconds: i64,
    ) -> Self {
        Self {
            jwks_client,
            issuer,
            audience,
            clock_skew_seconds: u64::try_from(clock_skew_seconds).unwrap_or(0),
        }
    }

    /// Verify a bearer token and return its claims.
    ///
    /// # Security Checks
    ///
    /// 1. Size check and `kid` extraction from the unverified header
    /// 2. Public key lookup, refetching the key set once on an unknown `kid`
    /// 3. RS256 signature
    /// 4. `exp` (with clock skew leeway), then `iss`, then `aud`
    ///
    /// # Errors
    ///
    /// Returns the `AuthFailure` naming the first check that failed.
    #[instrument(skip_all)]
    pub async fn verify(&self, token: &str) -> Result<Claims, AuthFailure> {
        let kid = extract_kid(token).map_err(|e| {
            tracing::debug!(target: "catalog.auth.jwt", error = %e, "Token kid extraction failed");
            match e {
                JwtValidationError::TokenTooLarge
                | JwtValidationError::MalformedToken
                | JwtValidationError::MissingKid => AuthFailure::MalformedToken,
            }
        })?;

        let jwk = self.jwks_client.get_key(&kid).await?;

        let claims = self.verify_with_key(token, &jwk)?;

        tracing::debug!(target: "catalog.auth.jwt", "Token verified successfully");
        Ok(claims)
    }

    /// Verify signature and claims against one published key.
    fn verify_with_key(&self, token: &str, jwk: &Jwk) -> Result<Claims, AuthFailure> {
        let decoding_key = decoding_key(jwk)?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.leeway = self.clock_skew_seconds;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&REQUIRED_CLAIMS);

        decode::<Claims>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                let failure = classify(e.kind());
                tracing::debug!(
                    target: "catalog.auth.jwt",
                    error = %e,
                    reason = failure.reason(),
                    "Token verification failed"
                );
                failure
            })
    }
}

/// Build an RSA decoding key from a published JWK.
fn decoding_key(jwk: &Jwk) -> Result<DecodingKey, AuthFailure> {
    if jwk.kty != "RSA" {
        tracing::warn!(target: "catalog.auth.jwt", kty = %jwk.kty, "Unexpected JWK key type");
        return Err(AuthFailure::UnknownSigningKey);
    }
    if let Some(alg) = &jwk.alg {
        if alg != "RS256" {
            tracing::warn!(target: "catalog.auth.jwt", alg = %alg, "Unexpected JWK algorithm");
            return Err(AuthFailure::UnknownSigningKey);
        }
    }

    let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
        tracing::error!(target: "catalog.auth.jwt", kid = %jwk.kid, "JWK missing RSA components");
        return Err(AuthFailure::UnknownSigningKey);
    };

    DecodingKey::from_rsa_components(n, e).map_err(|err| {
        tracing::error!(target: "catalog.auth.jwt", error = %err, "Invalid RSA public key encoding");
        AuthFailure::UnknownSigningKey
    })
}

/// Map a `jsonwebtoken` failure to the failure kind reported to callers.
fn classify(kind: &ErrorKind) -> AuthFailure {
    match kind {
        ErrorKind::ExpiredSignature => AuthFailure::ExpiredSignature,
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => AuthFailure::InvalidSignature,
        ErrorKind::InvalidAudience => AuthFailure::AudienceMismatch,
        ErrorKind::InvalidIssuer => AuthFailure::IssuerMismatch,
        _ => AuthFailure::MalformedToken,
    }
}
