//! Secrets generator controller entry point.
//!
//! Bootstraps the storage backend, enqueues every stored spec, starts the
//! reconcile workers, then serves the HTTP API until a shutdown signal
//! arrives. Workers are stopped after the server drains.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use esg_core::controller::{Controller, Scheduler, SecretStore, SpecSource};
use esg_core::store::ResourceStore;
use esg_storage::{MemoryBackend, StorageBackend};

use esg_controller::build_router;
use esg_controller::config::{ControllerConfig, StorageBackendType};
use esg_controller::queue::{WorkQueue, run_worker};
use esg_controller::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ControllerConfig::from_env().context("invalid configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .json()
        .init();

    info!(
        storage = ?config.storage_backend,
        workers = config.workers,
        resync_secs = config.reconcile.resync_interval.as_secs(),
        retry_secs = config.reconcile.retry_interval.as_secs(),
        "secrets generator controller starting"
    );

    let storage = open_storage(&config)?;
    let store = ResourceStore::new(storage);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let queue = WorkQueue::new(config.max_backoff, shutdown_rx.clone());

    let controller = Arc::new(Controller::new(
        Arc::new(store.clone()) as Arc<dyn SpecSource>,
        Arc::new(store.clone()) as Arc<dyn SecretStore>,
        Arc::new(queue.clone()) as Arc<dyn Scheduler>,
        config.reconcile,
    ));

    // Initial list: every stored spec gets a pass.
    let existing = store
        .list_specs()
        .await
        .context("failed to list stored specs")?;
    let orphans = store
        .collect_orphans()
        .await
        .context("failed to collect orphaned secrets")?;
    if !orphans.is_empty() {
        info!(collected = orphans.len(), "removed secrets left behind by deleted specs");
    }
    info!(specs = existing.len(), "enqueueing stored specs");
    for key in &existing {
        queue.add(key);
    }

    let workers: Vec<_> = (0..config.workers)
        .map(|id| {
            tokio::spawn(run_worker(
                id,
                queue.clone(),
                Arc::clone(&controller),
                shutdown_rx.clone(),
            ))
        })
        .collect();

    let state = Arc::new(AppState {
        store,
        queue: queue.clone(),
    });
    let app = build_router(state);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", config.bind_addr))?;

    info!(addr = %config.bind_addr, "controller API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx))
        .await
        .context("server error")?;

    queue.shut_down();
    info!("waiting for reconcile workers to stop");
    for worker in workers {
        if tokio::time::timeout(Duration::from_secs(10), worker)
            .await
            .is_err()
        {
            warn!("reconcile worker did not stop within 10s");
        }
    }

    info!("secrets generator controller stopped");
    Ok(())
}

fn open_storage(config: &ControllerConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "rocksdb-backend")]
        StorageBackendType::RocksDb { path } => {
            info!(path = %path, "using RocksDB storage");
            Ok(Arc::new(
                esg_storage::RocksDbBackend::open(path).context("failed to open RocksDB storage")?,
            ))
        }
        #[cfg(not(feature = "rocksdb-backend"))]
        StorageBackendType::RocksDb { .. } => {
            anyhow::bail!("RocksDB backend requested but feature 'rocksdb-backend' is not enabled");
        }
    }
}

/// Wait for Ctrl+C or SIGTERM, then flip the shutdown channel.
async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("shutdown signal received, stopping controller");
    let _ = shutdown_tx.send(true);
}
