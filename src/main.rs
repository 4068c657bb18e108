//! Binary entry point: wires the risk-control core to its external
//! collaborators and runs it until told to stop. Grounded on
//! `services/risk-manager/src/main.rs`'s tracing/metrics/shutdown shape,
//! minus the gRPC server this crate has no wire contract for.

use anyhow::Result;
use prometheus::{Encoder, TextEncoder};
use risk_core::config::RiskCoreSettings;
use risk_core::manager::RiskCore;
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warp::Filter;

const SERVICE_NAME: &str = "risk-core";

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    info!("starting {SERVICE_NAME} v{}", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::var("RISK_CORE_CONFIG").ok();
    let settings = RiskCoreSettings::load(config_path.as_deref())?;

    let (quotes, portfolio, outbox, alerts) = external_collaborators(&settings)?;
    let core = std::sync::Arc::new(RiskCore::new(&settings, quotes, portfolio, outbox, alerts));

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let metrics_addr: SocketAddr = settings
        .metrics_addr
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics_addr {}: {e}", settings.metrics_addr))?;
    let metrics_core = core.clone();
    tokio::spawn(async move {
        info!("metrics/health server listening on {metrics_addr}");
        serve_metrics(metrics_addr, metrics_core).await;
    });

    let run_handle = tokio::spawn(core.run(shutdown_rx));

    shutdown_signal(shutdown_tx).await;
    if let Err(e) = run_handle.await {
        error!("core run task panicked: {e}");
    }

    info!("{SERVICE_NAME} shutdown complete");
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("{}=info,warp=info", SERVICE_NAME.replace('-', "_")).into()
        }))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();
    Ok(())
}

/// Constructs the external collaborators this crate consumes through narrow
/// interfaces (spec.md §6). News ingestion, the broker adapter, and the
/// quote provider's wire protocol are out of scope here; a production
/// deployment supplies real implementations at this seam.
fn external_collaborators(
    _settings: &RiskCoreSettings,
) -> Result<(
    std::sync::Arc<dyn risk_core::interfaces::QuoteAdapter>,
    std::sync::Arc<dyn risk_core::interfaces::PortfolioStore>,
    std::sync::Arc<dyn risk_core::interfaces::OutboxWriter>,
    std::sync::Arc<dyn risk_core::interfaces::AlertsSink>,
)> {
    Err(anyhow::anyhow!(
        "no external collaborators configured; wire a QuoteAdapter, PortfolioStore, \
         OutboxWriter, and AlertsSink before running this binary"
    ))
}

async fn serve_metrics(addr: SocketAddr, core: std::sync::Arc<RiskCore>) {
    let metrics_route = warp::path("metrics").map(|| {
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        match encoder.encode(&metric_families, &mut buffer) {
            Ok(()) => String::from_utf8(buffer).unwrap_or_else(|_| "error encoding metrics".to_string()),
            Err(_) => "error gathering metrics".to_string(),
        }
    });

    let health_route = warp::path("health").map(move || {
        let status = core.observability.health().overall();
        match status {
            risk_core::observability::HealthStatus::Healthy => warp::reply::with_status(
                "healthy",
                warp::http::StatusCode::OK,
            ),
            risk_core::observability::HealthStatus::Degraded => warp::reply::with_status(
                "degraded",
                warp::http::StatusCode::OK,
            ),
            risk_core::observability::HealthStatus::Unhealthy => warp::reply::with_status(
                "unhealthy",
                warp::http::StatusCode::SERVICE_UNAVAILABLE,
            ),
        }
    });

    let routes = metrics_route.or(health_route);
    warp::serve(routes).run(addr).await;
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to install ctrl-c handler: {e}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!("failed to install SIGTERM handler: {e}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("received ctrl-c, shutting down"),
        () = terminate => info!("received SIGTERM, shutting down"),
    }

    let _ = shutdown_tx.send(());
    tokio::time::sleep(tokio::time::Duration::from_secs(5)).await;
}
