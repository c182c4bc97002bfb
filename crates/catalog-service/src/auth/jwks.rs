//! Signing keys published by the identity provider.
//!
//! [`JwksClient`] holds the last key set it fetched, keyed by `kid`, for a
//! fixed TTL. Looking up a `kid` the snapshot does not contain forces one
//! refetch before the token is refused, which is how signing-key rotation
//! reaches a running process. Any fetch failure maps to
//! [`AuthFailure::KeySetUnavailable`] and the request is refused.

use crate::errors::AuthFailure;
use crate::observability::metrics;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::instrument;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One published key. Only RSA keys are usable for RS256.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    /// Modulus, base64url.
    #[serde(default)]
    pub n: Option<String>,
    /// Public exponent, base64url.
    #[serde(default)]
    pub e: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default, rename = "use")]
    pub key_use: Option<String>,
}

/// Body of the key-set endpoint. Unknown members (`x5c`, `issuer`) are ignored.
#[derive(Deserialize)]
struct KeySetDocument {
    keys: Vec<Jwk>,
}

/// Keys from one successful fetch.
struct KeySet {
    by_kid: HashMap<String, Jwk>,
    fetched_at: Instant,
}

impl KeySet {
    fn from_document(doc: KeySetDocument) -> Self {
        Self {
            by_kid: doc.keys.into_iter().map(|k| (k.kid.clone(), k)).collect(),
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Cached view of the provider's key-set endpoint.
///
/// Concurrent refetches are not coalesced; each replaces the snapshot whole.
pub struct JwksClient {
    url: String,
    http: reqwest::Client,
    snapshot: RwLock<Option<KeySet>>,
    ttl: Duration,
}

impl JwksClient {
    pub fn new(url: String) -> Self {
        Self::with_ttl(url, DEFAULT_CACHE_TTL)
    }

    pub fn with_ttl(url: String, ttl: Duration) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(target: "catalog.auth.jwks", error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            url,
            http,
            snapshot: RwLock::new(None),
            ttl,
        }
    }

    /// Key for `kid`, refetching at most once per call.
    ///
    /// # Errors
    ///
    /// `UnknownSigningKey` when the freshly fetched set still lacks `kid`;
    /// `KeySetUnavailable` when the set cannot be fetched or parsed.
    #[instrument(skip(self), fields(kid = %kid))]
    pub async fn get_key(&self, kid: &str) -> Result<Jwk, AuthFailure> {
        if let Some(key) = self.cached(kid).await {
            return Ok(key);
        }

        let fresh = KeySet::from_document(self.fetch().await?);
        let found = fresh.by_kid.get(kid).cloned();
        tracing::info!(
            target: "catalog.auth.jwks",
            key_count = fresh.by_kid.len(),
            "Key set refreshed"
        );
        *self.snapshot.write().await = Some(fresh);

        found.ok_or_else(|| {
            tracing::warn!(target: "catalog.auth.jwks", kid = %kid, "kid not published after refetch");
            AuthFailure::UnknownSigningKey
        })
    }

    async fn cached(&self, kid: &str) -> Option<Jwk> {
        let snapshot = self.snapshot.read().await;
        let set = snapshot.as_ref().filter(|set| set.is_fresh(self.ttl))?;
        let key = set.by_kid.get(kid).cloned();
        if key.is_none() {
            tracing::debug!(target: "catalog.auth.jwks", kid = %kid, "kid not in cached set, refetching");
        }
        key
    }

    async fn fetch(&self) -> Result<KeySetDocument, AuthFailure> {
        let outcome = self.try_fetch().await;
        metrics::record_jwks_refresh(if outcome.is_ok() { "success" } else { "error" });
        outcome.map_err(|reason| {
            tracing::error!(target: "catalog.auth.jwks", url = %self.url, reason = %reason, "Key set fetch failed");
            AuthFailure::KeySetUnavailable
        })
    }

    async fn try_fetch(&self) -> Result<KeySetDocument, String> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("status {status}"));
        }
        response.json().await.map_err(|e| e.to_string())
    }

    #[cfg(test)]
    pub async fn clear_cache(&self) {
        *self.snapshot.write().await = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEYS_PATH: &str = "/T1/discovery/v2.0/keys";

    fn rsa_jwk(kid: &str) -> serde_json::Value {
        serde_json::json!({
            "kty": "RSA",
            "use": "sig",
            "kid": kid,
            "n": "sXchDaQebHnPiGvyDOAT4saGEUetSyo9MKLOoWFsueri23bOdgWp4Dy1WlUzewbgBHod5pcM9H95GQRV3JDXboIRROSBigeC5yjU1hGzHHyXss8UDprecbAYxknTcQkhslANGRUZmdTOQ5qTRsLAt6BTYuyvVRdhS8exSZEy_c4gs_7svlJJQ4H9_NxsiIoLwAEk7-Q3UXERGYw_75IDrGA84-lA_-Ct4eTlXHBIY2EaV7t7LjJaynVJCpkv4LKjTTAumiGUIuQhrNhZLuF_RJLqHpM2kgWFLU7-VTdL1VbC2tejvcI2BlMkEpk1BzBZI0KQB0GaDWFLN-aEAw3vRw",
            "e": "AQAB"
        })
    }

    async fn mount_keys(server: &MockServer, kids: &[&str], times: Option<u64>) {
        let body = serde_json::json!({
            "keys": kids.iter().map(|k| rsa_jwk(k)).collect::<Vec<_>>()
        });
        let mock = Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(body));
        let mock = match times {
            Some(n) => mock.up_to_n_times(n),
            None => mock,
        };
        mock.mount(server).await;
    }

    #[test]
    fn test_jwk_deserialization() {
        let jwk: Jwk = serde_json::from_value(rsa_jwk("key-1")).unwrap();

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.kid, "key-1");
        assert_eq!(jwk.e.as_deref(), Some("AQAB"));
        assert!(jwk.n.is_some());
        assert_eq!(jwk.key_use.as_deref(), Some("sig"));
        assert!(jwk.alg.is_none());
    }

    #[test]
    fn test_key_set_ignores_extra_members() {
        let json = r#"{
            "keys": [
                {"kty": "RSA", "kid": "key-1", "x5t": "abc", "x5c": ["MIIC"], "issuer": "https://idp/T1/v2.0"},
                {"kty": "RSA", "kid": "key-2"}
            ]
        }"#;

        let doc: KeySetDocument = serde_json::from_str(json).unwrap();
        let set = KeySet::from_document(doc);
        assert_eq!(set.by_kid.len(), 2);
        assert_eq!(set.by_kid.get("key-2").unwrap().kty, "RSA");
        assert!(set.is_fresh(Duration::from_secs(1)));
        assert!(!set.is_fresh(Duration::ZERO));
    }

    #[test]
    fn test_jwks_client_custom_ttl() {
        let client = JwksClient::with_ttl("http://localhost/keys".to_string(), Duration::from_secs(60));
        assert_eq!(client.ttl, Duration::from_secs(60));
        assert_eq!(client.url, "http://localhost/keys");
    }

    #[tokio::test]
    async fn test_cache_hit_does_not_refetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"keys": [rsa_jwk("k1")]})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}{KEYS_PATH}", server.uri()));
        assert_eq!(client.get_key("k1").await.unwrap().kid, "k1");
        assert_eq!(client.get_key("k1").await.unwrap().kid, "k1");
    }

    #[tokio::test]
    async fn test_unknown_kid_triggers_single_refetch() {
        let server = MockServer::start().await;
        // First fetch publishes only k1; after rotation k2 is published too
        mount_keys(&server, &["k1"], Some(1)).await;
        mount_keys(&server, &["k1", "k2"], None).await;

        let client = JwksClient::new(format!("{}{KEYS_PATH}", server.uri()));
        assert!(client.get_key("k1").await.is_ok());
        assert_eq!(client.get_key("k2").await.unwrap().kid, "k2");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn test_kid_absent_after_refetch_is_unknown() {
        let server = MockServer::start().await;
        mount_keys(&server, &["k1"], None).await;

        let client = JwksClient::new(format!("{}{KEYS_PATH}", server.uri()));
        assert_eq!(
            client.get_key("rotated-away").await.unwrap_err(),
            AuthFailure::UnknownSigningKey
        );
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_closed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}{KEYS_PATH}", server.uri()));
        assert_eq!(
            client.get_key("k1").await.unwrap_err(),
            AuthFailure::KeySetUnavailable
        );
    }

    #[tokio::test]
    async fn test_invalid_body_fails_closed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(KEYS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}{KEYS_PATH}", server.uri()));
        assert_eq!(
            client.get_key("k1").await.unwrap_err(),
            AuthFailure::KeySetUnavailable
        );
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refetch() {
        let server = MockServer::start().await;
        mount_keys(&server, &["k1"], None).await;

        let client = JwksClient::new(format!("{}{KEYS_PATH}", server.uri()));
        client.get_key("k1").await.unwrap();
        client.clear_cache().await;
        client.get_key("k1").await.unwrap();

        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
