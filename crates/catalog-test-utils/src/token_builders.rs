//! Builders for RS256 access tokens shaped like the identity provider's.
//!
//! Defaults produce a token that passes every check for
//! [`TEST_ISSUER`]/[`TEST_AUDIENCE`]; each setter breaks exactly one thing.

use crate::crypto_fixtures::{TestSigningKey, PRIMARY};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use serde_json::Value;

/// Tenant used by the default test identity.
pub const TEST_TENANT: &str = "T1";

/// Client id (audience) used by the default test identity.
pub const TEST_AUDIENCE: &str = "C1";

/// Subject placed in default tokens.
pub const TEST_SUBJECT: &str = "user-7f3a";

/// Issuer for [`TEST_TENANT`] under the given authority.
pub fn issuer_for(authority: &str) -> String {
    format!("{}/{TEST_TENANT}/v2.0", authority.trim_end_matches('/'))
}

/// Issuer used by default tokens.
pub const TEST_ISSUER: &str = "https://idp/T1/v2.0";

#[derive(Serialize)]
struct TokenClaims {
    sub: String,
    aud: Value,
    iss: String,
    exp: i64,
    iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

/// Fluent builder for signed test tokens.
#[derive(Debug, Clone)]
pub struct TokenBuilder {
    key: TestSigningKey,
    kid: Option<String>,
    subject: String,
    audience: Value,
    issuer: String,
    expires_in: Duration,
    name: Option<String>,
}

impl Default for TokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenBuilder {
    /// A valid token signed by [`PRIMARY`], expiring in one hour.
    pub fn new() -> Self {
        Self {
            key: PRIMARY,
            kid: None,
            subject: TEST_SUBJECT.to_string(),
            audience: Value::from(TEST_AUDIENCE),
            issuer: TEST_ISSUER.to_string(),
            expires_in: Duration::hours(1),
            name: None,
        }
    }

    /// Sign with a different key (its kid goes in the header unless overridden).
    pub fn signed_with(mut self, key: TestSigningKey) -> Self {
        self.key = key;
        self
    }

    /// Override the header kid, e.g. to claim a key that did not sign the token.
    pub fn kid(mut self, kid: &str) -> Self {
        self.kid = Some(kid.to_string());
        self
    }

    pub fn subject(mut self, subject: &str) -> Self {
        self.subject = subject.to_string();
        self
    }

    pub fn audience(mut self, audience: &str) -> Self {
        self.audience = Value::from(audience);
        self
    }

    /// Emit `aud` in array form.
    pub fn audiences(mut self, audiences: &[&str]) -> Self {
        self.audience = Value::from(audiences.to_vec());
        self
    }

    pub fn issuer(mut self, issuer: &str) -> Self {
        self.issuer = issuer.to_string();
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    /// Expiry relative to now; negative values produce an expired token.
    pub fn expires_in(mut self, expires_in: Duration) -> Self {
        self.expires_in = expires_in;
        self
    }

    /// Sign and serialize the token.
    pub fn build(self) -> String {
        let now = Utc::now();
        let claims = TokenClaims {
            sub: self.subject,
            aud: self.audience,
            iss: self.issuer,
            exp: (now + self.expires_in).timestamp(),
            iat: now.timestamp(),
            name: self.name,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.typ = Some("JWT".to_string());
        header.kid = Some(self.kid.unwrap_or_else(|| self.key.kid.to_string()));

        let encoding_key = EncodingKey::from_rsa_pem(self.key.private_pem.as_bytes())
            .expect("test RSA key should parse");
        encode(&header, &claims, &encoding_key).expect("test token should sign")
    }
}
