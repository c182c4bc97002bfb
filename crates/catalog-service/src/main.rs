//! Catalog Service
//!
//! Entry point for the asset catalog API.

use catalog_service::config::Config;
use catalog_service::observability::metrics::init_metrics_recorder;
use catalog_service::services::CatalogServices;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "catalog_service=debug,tower_http=debug";
const DEFAULT_DRAIN: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config = Config::from_env().inspect_err(|e| error!(error = %e, "Invalid configuration"))?;
    info!(
        bind_address = %config.bind_address,
        auth_enabled = config.auth_enabled,
        blob_configured = config.storage.is_some(),
        jwt_clock_skew_seconds = config.jwt_clock_skew_seconds,
        "Catalog Service starting"
    );

    let metrics_handle =
        init_metrics_recorder().inspect_err(|e| error!(error = %e, "Metrics recorder unavailable"))?;
    let services = CatalogServices::start(&config)
        .inspect_err(|e| error!(error = %e, "Catalog services failed to start"))?;

    let addr: SocketAddr = config
        .bind_address
        .parse()
        .inspect_err(|e| error!(error = %e, "Unparseable bind address"))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Listening");

    axum::serve(
        listener,
        services
            .router(metrics_handle)
            .into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(drain_period()))
    .await?;

    services.shutdown();
    info!("Catalog Service stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// `CATALOG_DRAIN_SECONDS`, or 30s when unset or unparseable.
fn drain_period() -> Duration {
    std::env::var("CATALOG_DRAIN_SECONDS")
        .ok()
        .and_then(|s| s.parse().ok())
        .map_or(DEFAULT_DRAIN, Duration::from_secs)
}

/// Resolves after SIGINT or SIGTERM plus the drain period.
async fn shutdown_signal(drain: Duration) {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("SIGINT received"),
        () = terminate => info!("SIGTERM received"),
    }

    if drain.is_zero() {
        return;
    }
    warn!(drain_secs = drain.as_secs(), "Draining in-flight requests");
    tokio::time::sleep(drain).await;
}
