//! Worker entry point.

use std::sync::Arc;

use event_store::InMemoryEventStore;
use tokio::signal;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use worker::config::{Config, LogFormat};

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();
    init_tracing(&config);

    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus recorder");
    worker::routes::metrics::describe();

    let store = Arc::new(InMemoryEventStore::new());
    let worker = worker::build_worker(config.saga_config(), store);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = worker.sweeper.spawn(shutdown_rx);

    match worker.engine.recover_all().await {
        Ok(resumed) => tracing::info!(count = resumed.len(), "journal recovery finished"),
        Err(e) => tracing::error!(error = %e, "journal recovery failed"),
    }

    let app = worker::create_app(worker.engine.clone(), metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting worker");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeper.await {
        tracing::warn!(error = %e, "reservation sweeper stopped abnormally");
    }
    tracing::info!(
        running = worker.engine.running_count().await,
        "worker shut down gracefully"
    );
}
