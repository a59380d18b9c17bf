use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use ldap_check::config::Configuration;
use ldap_check::{app, initialize_state, telemetry};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const OTLP_ENDPOINT: &str = "OTEL_EXPORTER_OTLP_ENDPOINT";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Export logs and spans only when a collector is configured.
    let endpoint = std::env::var(OTLP_ENDPOINT).ok();
    let otel_logs = endpoint
        .as_deref()
        .map(telemetry::setup_logging)
        .transpose()?;
    let tracer = endpoint
        .as_deref()
        .map(telemetry::setup_tracer)
        .transpose()?;

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .with(otel_logs)
        .init();

    let config = Configuration::default()
        .path(
            std::env::var("CONFIG_PATH")
                .map(PathBuf::from)
                .unwrap_or_default(),
        )
        .read()?;

    let metrics = match telemetry::setup_metrics_recorder() {
        Ok(handle) => Some(handle),
        Err(error) => {
            tracing::warn!(%error, "prometheus recorder not installed");
            None
        },
    };

    let port = match std::env::var("PORT") {
        Ok(port) => port.parse::<u16>()?,
        Err(_) => config.port,
    };

    let state = initialize_state(config, metrics);
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(tracer) = tracer {
        if let Err(error) = tracer.shutdown() {
            tracing::warn!(%error, "tracer did not flush");
        }
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(%error, "cannot listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
