//! Transaction sentry - retry sessions for unconfirmed jobs
//!
//! Polls the scheduler for pending top-level jobs and keeps one retry
//! session per job until it is mined, failed or out of budget.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use tx_sentry::api;
use tx_sentry::config::{Settings, StoreBackend, StoreConfig};
use tx_sentry::metrics::MetricsServer;
use tx_sentry::nonce::{MemoryNonceStore, NonceStore, PgNonceStore};
use tx_sentry::scheduler::{HttpSchedulerClient, SchedulerClient};
use tx_sentry::sentry::{BackoffPolicy, PendingJobListener, RetrySessionJob, SessionManager};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting transaction sentry v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;

    let scheduler: Arc<dyn SchedulerClient> = Arc::new(HttpSchedulerClient::new(
        &settings.scheduler.url,
        Duration::from_secs(settings.scheduler.request_timeout_secs),
    )?);
    info!(url = %settings.scheduler.url, "scheduler client initialized");

    // The sentry owns the shared nonce store: it runs the migrations at boot
    // and reports the backend's health through /ready.
    let store = build_nonce_store(&settings.store).await?;

    let shutdown = CancellationToken::new();

    let retry_job = Arc::new(RetrySessionJob::new(scheduler.clone()));
    let (manager, completions) = SessionManager::new(
        scheduler.clone(),
        retry_job,
        BackoffPolicy::from_config(&settings.sentry),
        shutdown.clone(),
    );
    let manager = Arc::new(manager);

    let listener = PendingJobListener::new(
        scheduler,
        manager.clone(),
        completions,
        Duration::from_secs(settings.sentry.refresh_interval_secs),
    );

    // Start API server
    let api_handle = tokio::spawn({
        let api_config = settings.api.clone();
        let manager = manager.clone();
        async move {
            if let Err(e) = api::run_server(api_config, manager, store).await {
                error!("API server error: {}", e);
            }
        }
    });

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    // Start the listener loop
    let listener_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = listener.run(shutdown).await {
                error!("Pending-job listener error: {}", e);
            }
        }
    });

    info!("Transaction sentry is running");
    info!("API server: http://{}:{}", settings.api.host, settings.api.port);
    if settings.metrics.enabled {
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
    }

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutdown signal received, stopping...");

    // Sessions and the listener exit cooperatively
    shutdown.cancel();
    if let Err(e) = listener_handle.await {
        error!("Listener task join error: {}", e);
    }

    api_handle.abort();
    if let Some(handle) = metrics_handle {
        handle.abort();
    }

    info!("Transaction sentry stopped");
    Ok(())
}

async fn build_nonce_store(config: &StoreConfig) -> Result<Arc<dyn NonceStore>> {
    match config.backend {
        StoreBackend::Memory => {
            info!(ttl_secs = config.ttl_secs, "using in-memory nonce store");
            Ok(Arc::new(MemoryNonceStore::new(Duration::from_secs(
                config.ttl_secs,
            ))))
        }
        StoreBackend::Postgres => {
            let url = config
                .url
                .as_deref()
                .context("store.url is required for the postgres backend")?;
            let store = PgNonceStore::new(url, config.max_connections).await?;
            store.run_migrations().await?;
            info!("using postgres nonce store");
            Ok(Arc::new(store))
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tx_sentry=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
