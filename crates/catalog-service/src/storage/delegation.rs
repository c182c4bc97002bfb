//! Delegation key cache.
//!
//! Holds at most one delegation key and hands it out until it comes within
//! the refresh window of its expiry. A key is minted valid from
//! `now - 5 minutes` (absorbs clock skew against the storage service) to
//! `now + 7 days`, and is replaced once fewer than 60 minutes remain.
//!
//! Concurrent callers that all see a stale key coalesce onto a single
//! control-plane request: the refresh guard is taken, the cache re-checked,
//! and only the first caller through actually refreshes.

use crate::observability::metrics;
use crate::storage::client::DelegationKeySource;
use crate::storage::StorageError;
use chrono::{DateTime, Duration, Utc};
use common::secret::SecretString;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

/// How far before "now" a new key's validity starts.
pub const KEY_START_BACKDATE: Duration = Duration::minutes(5);

/// Requested lifetime of a new key (the service maximum).
pub const KEY_LIFETIME: Duration = Duration::days(7);

/// Remaining validity below which the cached key is replaced.
pub const REFRESH_WINDOW: Duration = Duration::minutes(60);

/// A storage delegation key.
#[derive(Clone)]
pub struct DelegationKey {
    /// Object id of the identity the key was issued to.
    pub signed_oid: String,
    /// Tenant of that identity.
    pub signed_tid: String,
    /// Start of validity.
    pub signed_start: DateTime<Utc>,
    /// End of validity.
    pub signed_expiry: DateTime<Utc>,
    /// Service the key is scoped to (`b` for blob).
    pub signed_service: String,
    /// REST version the key was issued under.
    pub signed_version: String,
    /// Base64 HMAC key material.
    pub value: SecretString,
}

impl DelegationKey {
    /// Whether the key is still valid at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.signed_expiry > now
    }

    /// Whether the key should be replaced at `now`: usable keys have more
    /// than the refresh window left.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.signed_expiry - now <= REFRESH_WINDOW
    }
}

impl std::fmt::Debug for DelegationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DelegationKey")
            .field("signed_oid", &self.signed_oid)
            .field("signed_tid", &self.signed_tid)
            .field("signed_start", &self.signed_start)
            .field("signed_expiry", &self.signed_expiry)
            .field("signed_service", &self.signed_service)
            .field("signed_version", &self.signed_version)
            .field("value", &"[REDACTED]")
            .finish()
    }
}

/// Delegated credential manager.
///
/// The cached key is replaced wholesale, never mutated in place, so a
/// caller holding an `Arc<DelegationKey>` keeps a consistent key.
pub struct DelegatedCredentialManager {
    source: Arc<dyn DelegationKeySource>,
    cached: RwLock<Option<Arc<DelegationKey>>>,
    refresh_guard: Mutex<()>,
}

impl DelegatedCredentialManager {
    /// Create a manager with an empty cache.
    pub fn new(source: Arc<dyn DelegationKeySource>) -> Self {
        Self {
            source,
            cached: RwLock::new(None),
            refresh_guard: Mutex::new(()),
        }
    }

    /// Return a key with at least the refresh window of validity left,
    /// minting a new one when the cache is empty or stale.
    ///
    /// # Errors
    ///
    /// Propagates the control-plane failure if a refresh is needed and
    /// fails. A stale key is never returned in that case.
    #[instrument(skip(self), name = "catalog.storage.delegation")]
    pub async fn get_or_refresh(&self) -> Result<Arc<DelegationKey>, StorageError> {
        if let Some(key) = self.fresh_cached(Utc::now()).await {
            return Ok(key);
        }

        let _guard = self.refresh_guard.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(key) = self.fresh_cached(Utc::now()).await {
            debug!(target: "catalog.storage.delegation", "Key refreshed by concurrent caller");
            return Ok(key);
        }

        let now = Utc::now();
        let start = now - KEY_START_BACKDATE;
        let expiry = now + KEY_LIFETIME;

        let key = match self.source.request_delegation_key(start, expiry).await {
            Ok(key) => key,
            Err(e) => {
                warn!(target: "catalog.storage.delegation", error = %e, "Delegation key refresh failed");
                metrics::record_delegation_key_refresh("error");
                return Err(e);
            }
        };

        if !key.is_valid_at(Utc::now()) {
            warn!(
                target: "catalog.storage.delegation",
                signed_expiry = %key.signed_expiry,
                "Control plane returned an expired delegation key"
            );
            metrics::record_delegation_key_refresh("error");
            return Err(StorageError::ExpiredKey);
        }

        if key.needs_refresh(Utc::now()) {
            // Usable, but the next call will refresh again
            warn!(
                target: "catalog.storage.delegation",
                signed_expiry = %key.signed_expiry,
                "Delegation key issued with less than the refresh window remaining"
            );
        }

        info!(
            target: "catalog.storage.delegation",
            signed_start = %key.signed_start,
            signed_expiry = %key.signed_expiry,
            "Delegation key refreshed"
        );
        metrics::record_delegation_key_refresh("success");

        let key = Arc::new(key);
        *self.cached.write().await = Some(Arc::clone(&key));
        Ok(key)
    }

    async fn fresh_cached(&self, now: DateTime<Utc>) -> Option<Arc<DelegationKey>> {
        self.cached
            .read()
            .await
            .as_ref()
            .filter(|key| !key.needs_refresh(now))
            .cloned()
    }

    /// Drop the cached key so the next call mints a new one.
    #[cfg(test)]
    pub async fn clear_cache(&self) {
        *self.cached.write().await = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::storage::client::mock::MockDelegationKeySource;

    fn manager(source: &Arc<MockDelegationKeySource>) -> DelegatedCredentialManager {
        DelegatedCredentialManager::new(Arc::clone(source) as Arc<dyn DelegationKeySource>)
    }

    #[tokio::test]
    async fn test_first_call_mints_key_with_backdated_window() {
        let source = Arc::new(MockDelegationKeySource::new());
        let mgr = manager(&source);

        let before = Utc::now();
        let key = mgr.get_or_refresh().await.unwrap();
        let after = Utc::now();

        assert_eq!(source.call_count(), 1);
        assert!(key.signed_start >= before - KEY_START_BACKDATE);
        assert!(key.signed_start <= after - KEY_START_BACKDATE);
        assert!(key.signed_expiry >= before + KEY_LIFETIME);
        assert!(key.signed_expiry <= after + KEY_LIFETIME);
    }

    #[tokio::test]
    async fn test_fresh_key_is_reused() {
        let source = Arc::new(MockDelegationKeySource::new());
        let mgr = manager(&source);

        let first = mgr.get_or_refresh().await.unwrap();
        let second = mgr.get_or_refresh().await.unwrap();

        assert_eq!(source.call_count(), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_key_inside_refresh_window_is_replaced() {
        // 30 minutes left is inside the 60-minute window
        let source = Arc::new(MockDelegationKeySource::with_lifetime(Duration::minutes(30)));
        let mgr = manager(&source);

        let first = mgr.get_or_refresh().await.unwrap();
        let second = mgr.get_or_refresh().await.unwrap();

        assert_eq!(source.call_count(), 2);
        assert_ne!(first.signed_oid, second.signed_oid);
    }

    #[tokio::test]
    async fn test_key_just_outside_refresh_window_is_reused() {
        let source = Arc::new(MockDelegationKeySource::with_lifetime(Duration::minutes(61)));
        let mgr = manager(&source);

        mgr.get_or_refresh().await.unwrap();
        mgr.get_or_refresh().await.unwrap();

        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_failure_propagates() {
        let source = Arc::new(MockDelegationKeySource::failing(StorageError::Status {
            status: 403,
            operation: "request_delegation_key",
        }));
        let mgr = manager(&source);

        let err = mgr.get_or_refresh().await.unwrap_err();
        assert!(matches!(err, StorageError::Status { status: 403, .. }));
    }

    #[tokio::test]
    async fn test_expired_key_is_never_returned() {
        let source = Arc::new(MockDelegationKeySource::with_lifetime(Duration::minutes(-1)));
        let mgr = manager(&source);

        assert_eq!(mgr.get_or_refresh().await.unwrap_err(), StorageError::ExpiredKey);
        // Nothing cached, so the next call asks again
        assert!(mgr.get_or_refresh().await.is_err());
        assert_eq!(source.call_count(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_refresh() {
        let source = Arc::new(MockDelegationKeySource::new());
        let mgr = Arc::new(manager(&source));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let mgr = Arc::clone(&mgr);
                tokio::spawn(async move { mgr.get_or_refresh().await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(source.call_count(), 1);
    }

    #[tokio::test]
    async fn test_clear_cache_forces_refresh() {
        let source = Arc::new(MockDelegationKeySource::new());
        let mgr = manager(&source);

        mgr.get_or_refresh().await.unwrap();
        mgr.clear_cache().await;
        mgr.get_or_refresh().await.unwrap();

        assert_eq!(source.call_count(), 2);
    }

    #[test]
    fn test_refresh_boundary_is_exactly_one_hour() {
        let now = Utc::now();
        let key_expiring_at = |expiry| DelegationKey {
            signed_oid: "oid".to_string(),
            signed_tid: "tid".to_string(),
            signed_start: now - KEY_START_BACKDATE,
            signed_expiry: expiry,
            signed_service: "b".to_string(),
            signed_version: "2021-08-06".to_string(),
            value: SecretString::from("k"),
        };

        assert!(key_expiring_at(now + REFRESH_WINDOW).needs_refresh(now));
        assert!(!key_expiring_at(now + REFRESH_WINDOW + Duration::seconds(1)).needs_refresh(now));
        assert!(key_expiring_at(now + Duration::minutes(59)).needs_refresh(now));
    }

    #[test]
    fn test_debug_redacts_value() {
        let key = DelegationKey {
            signed_oid: "oid".to_string(),
            signed_tid: "tid".to_string(),
            signed_start: Utc::now(),
            signed_expiry: Utc::now(),
            signed_service: "b".to_string(),
            signed_version: "2021-08-06".to_string(),
            value: SecretString::from("super-secret-key"),
        };
        let debug = format!("{key:?}");
        assert!(!debug.contains("super-secret-key"));
        assert!(debug.contains("[REDACTED]"));
    }
}
