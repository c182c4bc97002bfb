//! Access grant issuer.
//!
//! Produces a URL granting time-limited read access to a single blob,
//! signed with the current delegation key (user-delegation SAS, version
//! `2021-08-06`). Signing is a pure function of its inputs: the same key,
//! reference, permissions and expiry always yield the same URL.
//!
//! # String-to-sign
//!
//! Twenty-four newline-separated fields, in this order:
//!
//! ```text
//! sp, st, se, canonicalized resource,
//! skoid, sktid, skt, ske, sks, skv,
//! saoid, suoid, scid, sip, spr,
//! sv, sr, snapshot, encryption scope,
//! rscc, rscd, rsce, rscl, rsct
//! ```
//!
//! The canonicalized resource is `/blob/{account}/{container}/{blob}`.

use crate::storage::client::{format_storage_time, BlobStore, STORAGE_API_VERSION};
use crate::storage::delegation::{DelegatedCredentialManager, DelegationKey};
use crate::storage::StorageError;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Duration, Utc};
use common::secret::ExposeSecret;
use ring::hmac;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Default grant lifetime.
pub const DEFAULT_GRANT_LIFETIME: Duration = Duration::days(365);

/// Signed resource type for a single blob.
const SIGNED_RESOURCE_BLOB: &str = "b";

/// Scratch URL used only to form-encode the grant query.
const QUERY_BASE: &str = "http://localhost/";

/// A single blob in a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobReference {
    /// Storage account name.
    pub account: String,
    /// Container name.
    pub container: String,
    /// Blob name within the container.
    pub blob: String,
}

impl BlobReference {
    /// Canonicalized resource for the string-to-sign.
    fn canonical_resource(&self) -> String {
        format!("/blob/{}/{}/{}", self.account, self.container, self.blob)
    }
}

/// Permissions carried by a grant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GrantPermissions {
    pub read: bool,
    pub add: bool,
    pub create: bool,
    pub write: bool,
    pub delete: bool,
}

impl GrantPermissions {
    /// Read-only; the only set the catalog ever issues.
    pub const fn read_only() -> Self {
        Self {
            read: true,
            add: false,
            create: false,
            write: false,
            delete: false,
        }
    }

    /// The `sp` value. Letters appear in the order the service requires.
    pub fn as_sp(&self) -> String {
        [
            (self.read, 'r'),
            (self.add, 'a'),
            (self.create, 'c'),
            (self.write, 'w'),
            (self.delete, 'd'),
        ]
        .iter()
        .filter(|(enabled, _)| *enabled)
        .map(|(_, letter)| *letter)
        .collect()
    }
}

/// Build the string-to-sign for a blob grant.
fn string_to_sign(
    key: &DelegationKey,
    blob: &BlobReference,
    permissions: &str,
    expiry: &str,
) -> String {
    let skt = format_storage_time(key.signed_start);
    let ske = format_storage_time(key.signed_expiry);
    let resource = blob.canonical_resource();

    [
        permissions,
        "", // st
        expiry,
        resource.as_str(),
        key.signed_oid.as_str(),
        key.signed_tid.as_str(),
        skt.as_str(),
        ske.as_str(),
        key.signed_service.as_str(),
        key.signed_version.as_str(),
        "", // saoid
        "", // suoid
        "", // scid
        "", // sip
        "", // spr
        STORAGE_API_VERSION,
        SIGNED_RESOURCE_BLOB,
        "", // snapshot time
        "", // encryption scope
        "", // rscc
        "", // rscd
        "", // rsce
        "", // rscl
        "", // rsct
    ]
    .join("\n")
}

/// Sign a grant and return its query string (without the leading `?`).
///
/// # Errors
///
/// Returns `StorageError::InvalidKey` if the key value is not base64.
pub fn sign_grant(
    key: &DelegationKey,
    blob: &BlobReference,
    permissions: GrantPermissions,
    expiry: DateTime<Utc>,
) -> Result<String, StorageError> {
    let key_bytes = STANDARD
        .decode(key.value.expose_secret())
        .map_err(|e| StorageError::InvalidKey(e.to_string()))?;

    let sp = permissions.as_sp();
    let se = format_storage_time(expiry);
    let to_sign = string_to_sign(key, blob, &sp, &se);

    let hmac_key = hmac::Key::new(hmac::HMAC_SHA256, &key_bytes);
    let sig = STANDARD.encode(hmac::sign(&hmac_key, to_sign.as_bytes()).as_ref());

    let skt = format_storage_time(key.signed_start);
    let ske = format_storage_time(key.signed_expiry);

    let mut url = reqwest::Url::parse(QUERY_BASE)
        .map_err(|e| StorageError::InvalidKey(e.to_string()))?;
    url.query_pairs_mut()
        .append_pair("sp", &sp)
        .append_pair("se", &se)
        .append_pair("skoid", &key.signed_oid)
        .append_pair("sktid", &key.signed_tid)
        .append_pair("skt", &skt)
        .append_pair("ske", &ske)
        .append_pair("sks", &key.signed_service)
        .append_pair("skv", &key.signed_version)
        .append_pair("sv", STORAGE_API_VERSION)
        .append_pair("sr", SIGNED_RESOURCE_BLOB)
        .append_pair("sig", &sig);
    Ok(url.query().unwrap_or_default().to_string())
}

/// Issues read-only grant URLs for blobs in the configured container.
pub struct AccessGrantIssuer {
    store: Arc<dyn BlobStore>,
    credentials: Arc<DelegatedCredentialManager>,
    lifetime: Duration,
    cap_to_key_lifetime: bool,
}

impl AccessGrantIssuer {
    /// Create an issuer with the default one-year lifetime.
    pub fn new(store: Arc<dyn BlobStore>, credentials: Arc<DelegatedCredentialManager>) -> Self {
        Self {
            store,
            credentials,
            lifetime: DEFAULT_GRANT_LIFETIME,
            cap_to_key_lifetime: false,
        }
    }

    /// Override the grant lifetime.
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Never let a grant outlive the key that signs it.
    #[must_use]
    pub fn with_cap_to_key_lifetime(mut self, cap: bool) -> Self {
        self.cap_to_key_lifetime = cap;
        self
    }

    /// Reference to `blob_name` in the configured container.
    pub fn reference(&self, blob_name: &str) -> BlobReference {
        BlobReference {
            account: self.store.account_name().to_string(),
            container: self.store.container_name().to_string(),
            blob: blob_name.to_string(),
        }
    }

    /// Issue a read-only grant URL for `blob_name`.
    ///
    /// # Errors
    ///
    /// Propagates delegation key refresh failures and key decoding errors.
    #[instrument(skip(self), name = "catalog.storage.grant")]
    pub async fn issue(&self, blob_name: &str) -> Result<String, StorageError> {
        let key = self.credentials.get_or_refresh().await?;

        let mut expiry = Utc::now() + self.lifetime;
        if expiry > key.signed_expiry {
            if self.cap_to_key_lifetime {
                expiry = key.signed_expiry;
            } else {
                // The storage service rejects the grant once the key expires
                warn!(
                    target: "catalog.storage.grant",
                    grant_expiry = %expiry,
                    key_expiry = %key.signed_expiry,
                    "Grant outlives its signing key"
                );
            }
        }

        let query = sign_grant(
            &key,
            &self.reference(blob_name),
            GrantPermissions::read_only(),
            expiry,
        )?;
        Ok(format!("{}?{}", self.store.blob_url(blob_name), query))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::client::mock::{MockBlobStore, MockDelegationKeySource};
    use crate::storage::client::DelegationKeySource;
    use common::secret::SecretString;

    fn ts(raw: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
    }

    fn fixed_key() -> DelegationKey {
        DelegationKey {
            signed_oid: "6b2f0b8e-1111-4c3a-9f00-0123456789ab".to_string(),
            signed_tid: "72f988bf-86f1-41af-91ab-2d7cd011db47".to_string(),
            signed_start: ts("2026-10-16T11:55:00Z"),
            signed_expiry: ts("2026-10-23T12:00:00Z"),
            signed_service: "b".to_string(),
            signed_version: "2021-08-06".to_string(),
            value: SecretString::from("AAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8="),
        }
    }

    fn fixed_blob() -> BlobReference {
        BlobReference {
            account: "aiflixmedia".to_string(),
            container: "asset-images".to_string(),
            blob: "0b6f1a9e-0000-4000-8000-000000000001/main.png".to_string(),
        }
    }

    fn query_value(query: &str, name: &str) -> Option<String> {
        reqwest::Url::parse(&format!("{QUERY_BASE}?{query}"))
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_permissions_order() {
        assert_eq!(GrantPermissions::read_only().as_sp(), "r");
        let all = GrantPermissions {
            read: true,
            add: true,
            create: true,
            write: true,
            delete: true,
        };
        assert_eq!(all.as_sp(), "racwd");
        let some = GrantPermissions {
            delete: true,
            read: true,
            ..GrantPermissions::default()
        };
        assert_eq!(some.as_sp(), "rd");
    }

    #[test]
    fn test_string_to_sign_layout() {
        let s = string_to_sign(&fixed_key(), &fixed_blob(), "r", "2027-10-16T12:00:00Z");
        let fields: Vec<&str> = s.split('\n').collect();
        assert_eq!(fields.len(), 24);
        assert_eq!(fields.first().copied(), Some("r"));
        assert_eq!(
            fields.get(3).copied(),
            Some("/blob/aiflixmedia/asset-images/0b6f1a9e-0000-4000-8000-000000000001/main.png")
        );
        assert_eq!(fields.get(15).copied(), Some("2021-08-06"));
        assert_eq!(fields.get(16).copied(), Some("b"));
    }

    #[test]
    fn test_signature_matches_known_vector() {
        let query = sign_grant(
            &fixed_key(),
            &fixed_blob(),
            GrantPermissions::read_only(),
            ts("2027-10-16T12:00:00Z"),
        )
        .unwrap();

        assert_eq!(
            query_value(&query, "sig").as_deref(),
            Some("lMlRM9OG2RGogYAWakryDl1R4VpqAUue8fa7v7IOWKg=")
        );
        assert_eq!(query_value(&query, "sp").as_deref(), Some("r"));
        assert_eq!(query_value(&query, "se").as_deref(), Some("2027-10-16T12:00:00Z"));
        assert_eq!(query_value(&query, "sr").as_deref(), Some("b"));
        assert_eq!(query_value(&query, "sv").as_deref(), Some("2021-08-06"));
        assert_eq!(query_value(&query, "skt").as_deref(), Some("2026-10-16T11:55:00Z"));
        assert!(query_value(&query, "st").is_none());
    }

    #[test]
    fn test_signing_is_deterministic() {
        let expiry = ts("2027-10-16T12:00:00Z");
        let a = sign_grant(&fixed_key(), &fixed_blob(), GrantPermissions::read_only(), expiry).unwrap();
        let b = sign_grant(&fixed_key(), &fixed_blob(), GrantPermissions::read_only(), expiry).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_depends_on_each_input() {
        let expiry = ts("2027-10-16T12:00:00Z");
        let sig = |key: &DelegationKey, blob: &BlobReference, permissions, expiry| {
            let query = sign_grant(key, blob, permissions, expiry).unwrap();
            query_value(&query, "sig").unwrap()
        };
        let baseline = sig(&fixed_key(), &fixed_blob(), GrantPermissions::read_only(), expiry);

        let mut blob = fixed_blob();
        blob.blob = "0b6f1a9e-0000-4000-8000-000000000001/screenshot_0.png".to_string();
        let mut container = fixed_blob();
        container.container = "asset-thumbnails".to_string();
        let mut account = fixed_blob();
        account.account = "aiflixstaging".to_string();
        for (case, other) in [("blob", blob), ("container", container), ("account", account)] {
            assert_ne!(
                sig(&fixed_key(), &other, GrantPermissions::read_only(), expiry),
                baseline,
                "{case}"
            );
        }

        let later = expiry + Duration::seconds(1);
        assert_ne!(
            sig(&fixed_key(), &fixed_blob(), GrantPermissions::read_only(), later),
            baseline,
            "expiry"
        );

        let read_write = GrantPermissions {
            write: true,
            ..GrantPermissions::read_only()
        };
        assert_ne!(
            sig(&fixed_key(), &fixed_blob(), read_write, expiry),
            baseline,
            "permissions"
        );

        let mut rotated = fixed_key();
        rotated.value = SecretString::from(STANDARD.encode([7u8; 32]));
        assert_ne!(
            sig(&rotated, &fixed_blob(), GrantPermissions::read_only(), expiry),
            baseline,
            "key value"
        );
    }

    #[test]
    fn test_invalid_key_value() {
        let mut key = fixed_key();
        key.value = SecretString::from("not base64!!");
        let err = sign_grant(&key, &fixed_blob(), GrantPermissions::read_only(), Utc::now());
        assert!(matches!(err, Err(StorageError::InvalidKey(_))));
    }

    fn issuer(cap: bool) -> (AccessGrantIssuer, Arc<MockDelegationKeySource>) {
        let source = Arc::new(MockDelegationKeySource::new());
        let credentials = Arc::new(DelegatedCredentialManager::new(
            Arc::clone(&source) as Arc<dyn DelegationKeySource>
        ));
        let store = Arc::new(MockBlobStore::new("aiflixmedia", "asset-images"));
        (
            AccessGrantIssuer::new(store, credentials).with_cap_to_key_lifetime(cap),
            source,
        )
    }

    #[tokio::test]
    async fn test_issue_returns_read_only_blob_url() {
        let (issuer, source) = issuer(false);
        let url = issuer.issue("abc/main.png").await.unwrap();

        let (base, query) = url.split_once('?').unwrap();
        assert_eq!(
            base,
            "https://aiflixmedia.blob.core.windows.net/asset-images/abc/main.png"
        );
        assert_eq!(query_value(query, "sp").as_deref(), Some("r"));

        // Roughly a year out
        let se = ts(&query_value(query, "se").unwrap());
        assert!(se > Utc::now() + Duration::days(364));

        // Second grant reuses the cached key
        issuer.issue("abc/screenshot_0.png").await.unwrap();
        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_issue_caps_to_key_lifetime() {
        let (issuer, _) = issuer(true);
        let url = issuer.issue("abc/main.png").await.unwrap();
        let (_, query) = url.split_once('?').unwrap();

        let se = ts(&query_value(query, "se").unwrap());
        let ske = ts(&query_value(query, "ske").unwrap());
        assert_eq!(se, ske);
    }

    #[tokio::test]
    async fn test_issue_propagates_key_failure() {
        let source = Arc::new(MockDelegationKeySource::failing(StorageError::Http(
            "connection refused".to_string(),
        )));
        let credentials = Arc::new(DelegatedCredentialManager::new(source));
        let store = Arc::new(MockBlobStore::new("a", "c"));
        let issuer = AccessGrantIssuer::new(store, credentials);

        assert!(matches!(
            issuer.issue("abc/main.png").await,
            Err(StorageError::Http(_))
        ));
    }
}
