//! Main entry point for the ProjectX bridge.

use anyhow::Result;
use bridge::{Bridge, BridgeConfig, Credentials, HttpSink};
use external_services::projectx::ProjectXClient;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting ProjectX bridge...");

    let config = match BridgeConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(metrics_port) = config.metrics_port {
        PrometheusBuilder::new()
            .with_http_listener(([0, 0, 0, 0], metrics_port))
            .install()?;
        info!(
            "Prometheus metrics available at http://0.0.0.0:{}/metrics",
            metrics_port
        );
    }

    let access_token = match &config.credentials {
        Credentials::Token(token) => token.clone(),
        Credentials::ApiKey { user_name, api_key } => {
            let client = ProjectXClient::with_base_url(&config.api_url);
            match client.login_key(user_name, api_key).await {
                Ok(token) => token,
                Err(e) => {
                    error!("Login failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
    };

    let sink = Arc::new(HttpSink::new(&config.sink_url));
    info!("Forwarding events to {}", sink.url());
    let bridge = Bridge::start(&config, access_token, sink);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.control_port)).await?;
    info!(
        "Control API listening on http://0.0.0.0:{}",
        config.control_port
    );

    axum::serve(listener, bridge.router())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    bridge.shutdown().await;

    info!("Bridge stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
