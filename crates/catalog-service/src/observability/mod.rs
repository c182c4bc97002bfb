//! Observability module for the Catalog Service.
//!
//! Provides metrics definitions and the Prometheus recorder.

pub mod metrics;
