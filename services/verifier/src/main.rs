use anyhow::{Context, Result};
use signature_verifier::{
    start_api_server, AppState, ArtifactStore, Config, ProcessClassifier, StagingSweeper,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting signature verifier"
    );

    // Initialize metrics
    if config.service.metrics_enabled {
        init_metrics(config.service.metrics_port)?;
    }

    // Initialize components
    let store = Arc::new(ArtifactStore::new(&config.staging.dir));
    store
        .ensure_staging_area()
        .await
        .context("Failed to create staging area")?;

    let classifier = Arc::new(ProcessClassifier::new(&config.classifier));
    info!(
        program = %config.classifier.program,
        timeout_secs = config.classifier.timeout_secs,
        "Classifier configured"
    );

    let api_state = AppState {
        store: store.clone(),
        classifier,
    };

    // Spawn staging sweeper task
    let sweeper_handle = if config.staging.sweep_enabled {
        let sweeper =
            StagingSweeper::new(store.clone(), config.sweep_interval(), config.max_artifact_age());
        Some(tokio::spawn(sweeper.run()))
    } else {
        None
    };

    // Spawn API server task
    let api_config = config.api.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Signature verifier started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down signature verifier");

    // Abort tasks
    api_handle.abort();
    if let Some(handle) = sweeper_handle {
        handle.abort();
    }

    info!("Signature verifier stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
