//! Metrics definitions for the Catalog Service.
//!
//! All metrics follow Prometheus naming conventions:
//! - `catalog_` prefix
//! - `_total` suffix for counters
//!
//! # Cardinality
//!
//! Labels are bounded to prevent cardinality explosion:
//! - `reason`: one value per authentication failure kind
//! - `status`: 2 values (success, error)
//! - `outcome`: 2 values (uploaded, inline)

use metrics::counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the global Prometheus recorder.
///
/// Must be called once per process, before any metric is recorded.
///
/// # Errors
///
/// Returns an error string if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {e}"))
}

/// Record a request rejected by the auth gate.
///
/// Metric: `catalog_auth_failures_total`
/// Labels: `reason`
pub fn record_auth_failure(reason: &'static str) {
    counter!("catalog_auth_failures_total", "reason" => reason).increment(1);
}

/// Record a fetch of the identity provider's key set.
///
/// Metric: `catalog_jwks_refresh_total`
/// Labels: `status`
pub fn record_jwks_refresh(status: &'static str) {
    counter!("catalog_jwks_refresh_total", "status" => status).increment(1);
}

/// Record a delegation key request to the storage control plane.
///
/// Metric: `catalog_delegation_key_refresh_total`
/// Labels: `status`
pub fn record_delegation_key_refresh(status: &'static str) {
    counter!("catalog_delegation_key_refresh_total", "status" => status).increment(1);
}

/// Record the terminal state of one ingested image.
///
/// Metric: `catalog_media_ingest_total`
/// Labels: `outcome`
pub fn record_media_ingest(outcome: &'static str) {
    counter!("catalog_media_ingest_total", "outcome" => outcome).increment(1);
}
