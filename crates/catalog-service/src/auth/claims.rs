//! JWT claims structure.
//!
//! Contains the claims extracted from verified access tokens. The `sub` and
//! `oid` fields are redacted in Debug output to prevent exposure in logs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Claims of a verified access token.
///
/// Only produced after signature, issuer, audience and expiry all passed.
#[derive(Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (pairwise user id) - redacted in Debug output.
    pub sub: String,

    /// Audience; contains the configured client id once verified.
    pub aud: Audience,

    /// Issuer; equals `{authority}/{tenant}/v2.0` once verified.
    pub iss: String,

    /// Expiration timestamp (Unix epoch seconds).
    pub exp: i64,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Display name of the signed-in user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Preferred username (usually the UPN or email).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_username: Option<String>,

    /// Directory object id of the user - redacted in Debug output.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oid: Option<String>,

    /// Tenant id the user signed in from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<String>,

    /// Space-separated delegated scopes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scp: Option<String>,
}

impl fmt::Debug for Claims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Claims")
            .field("sub", &"[REDACTED]")
            .field("aud", &self.aud)
            .field("iss", &self.iss)
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("name", &self.name)
            .field("preferred_username", &self.preferred_username)
            .field("oid", &self.oid.as_ref().map(|_| "[REDACTED]"))
            .field("tid", &self.tid)
            .field("scp", &self.scp)
            .finish()
    }
}

/// The `aud` claim, which RFC 7519 allows as a string or an array.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Audience {
    Single(String),
    Many(Vec<String>),
}

impl Audience {
    /// Whether `client_id` is one of the audiences.
    pub fn contains(&self, client_id: &str) -> bool {
        match self {
            Self::Single(aud) => aud == client_id,
            Self::Many(auds) => auds.iter().any(|aud| aud == client_id),
        }
    }
}

impl From<&str> for Audience {
    fn from(aud: &str) -> Self {
        Self::Single(aud.to_string())
    }
}

impl Claims {
    /// Get all delegated scopes.
    pub fn scopes(&self) -> Vec<&str> {
        self.scp
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn claims() -> Claims {
        Claims {
            sub: "secret-user-id".to_string(),
            aud: Audience::from("C1"),
            iss: "https://idp/T1/v2.0".to_string(),
            exp: 1_900_000_000,
            iat: Some(1_899_990_000),
            name: Some("Ada".to_string()),
            preferred_username: None,
            oid: Some("object-id-1".to_string()),
            tid: Some("T1".to_string()),
            scp: Some("Assets.Read Assets.Write".to_string()),
        }
    }

    #[test]
    fn test_claims_debug_redacts_identifiers() {
        let debug_str = format!("{:?}", claims());

        assert!(!debug_str.contains("secret-user-id"));
        assert!(!debug_str.contains("object-id-1"));
        assert!(debug_str.contains("[REDACTED]"));
        assert!(debug_str.contains("https://idp/T1/v2.0"));
    }

    #[test]
    fn test_scopes() {
        assert_eq!(claims().scopes(), vec!["Assets.Read", "Assets.Write"]);

        let mut no_scopes = claims();
        no_scopes.scp = None;
        assert!(no_scopes.scopes().is_empty());
    }

    #[test]
    fn test_deserialize_minimal_token_payload() {
        let json = r#"{"sub":"u","aud":"C1","iss":"https://idp/T1/v2.0","exp":1}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();
        assert_eq!(claims.aud, Audience::from("C1"));
        assert!(claims.name.is_none());

        let round_trip = serde_json::to_string(&claims).unwrap();
        assert!(!round_trip.contains("name"));
    }

    #[test]
    fn test_array_audience_deserializes() {
        let json = r#"{"sub":"u","aud":["C0","C1"],"iss":"https://idp/T1/v2.0","exp":1}"#;
        let claims: Claims = serde_json::from_str(json).unwrap();

        assert_eq!(
            claims.aud,
            Audience::Many(vec!["C0".to_string(), "C1".to_string()])
        );
        assert!(claims.aud.contains("C1"));
        assert!(!claims.aud.contains("C2"));
        assert!(Audience::from("C1").contains("C1"));
    }
}
