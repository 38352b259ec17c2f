use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use process_api::backends::ProviderBackendFactory;
use process_api::config::Config;
use process_api::jobs::active::ActiveJobs;
use process_api::jobs::cache::JobsCache;
use process_api::jobs::{snapshot, Job};
use process_api::processes::load_processes;
use process_api::server::{create_router, AppState};
use process_api::storage::logs::FsLogStore;
use process_api::storage::s3::S3Store;
use process_api::storage::ObjectStore;

#[derive(Parser, Debug)]
#[command(name = "process-api")]
#[command(about = "OGC API - Processes server for containerized jobs")]
struct Args {
    /// Directory containing process definitions
    #[arg(long, default_value = "plugins")]
    plugins_dir: PathBuf,

    /// Maximum jobs-cache size in bytes
    #[arg(long)]
    cache_size: Option<u64>,

    /// Start with a clean cache, ignoring any existing snapshot
    #[arg(short = 'o', long)]
    override_snapshot: bool,

    /// Host to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to bind
    #[arg(long)]
    port: Option<u16>,
}

/// Returns a token cancelled on SIGINT or SIGTERM.
fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let handler_token = token.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    let _ = ctrl_c.await;
                    handler_token.cancel();
                    return;
                }
            };
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
        }
        tracing::info!("Shutdown signal received");
        handler_token.cancel();
    });
    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = Config::from_env();
    config.plugins_dir = args.plugins_dir;
    config.override_snapshot = args.override_snapshot;
    if let Some(cache_size) = args.cache_size {
        config.max_cache_size = cache_size;
    }
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    let config = Arc::new(config);

    let processes = load_processes(&config.plugins_dir)
        .await
        .context("failed to load process definitions")?;
    tracing::info!("Loaded {} process definitions", processes.len());

    let cache = Arc::new(JobsCache::new(config.max_cache_size));
    let registry = Arc::new(ActiveJobs::new());
    let store: Arc<dyn ObjectStore> = Arc::new(S3Store::new(&config));
    let log_store = Arc::new(
        FsLogStore::new(config.data_dir.clone())
            .await
            .context("failed to initialize the log store")?,
    );

    let state = Arc::new(AppState {
        processes: Arc::new(processes),
        cache: Arc::clone(&cache),
        registry: Arc::clone(&registry),
        store,
        log_store,
        backends: Arc::new(ProviderBackendFactory),
        config: Arc::clone(&config),
    });

    if config.override_snapshot {
        tracing::info!("Starting with a clean jobs cache (snapshot override)");
    } else {
        // a load failure other than "missing" aborts startup: booting with
        // a half-empty cache would overwrite the snapshot at shutdown
        match snapshot::load(&config.snapshot_path())
            .await
            .context("failed to load the jobs snapshot; pass -o to start clean")?
        {
            Some(records) => {
                let count = records.len();
                let restored = records
                    .into_iter()
                    .map(|record| Job::from_record(record, state.job_context()))
                    .collect();
                cache.restore(restored).await;
                tracing::info!(
                    "Restored {} terminal jobs from {}",
                    count,
                    config.snapshot_path().display()
                );
            }
            None => tracing::info!("Starting with a clean jobs cache"),
        }
    }

    let router = create_router(Arc::clone(&state));
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    tracing::info!("Listening on {}", addr);

    let shutdown = install_shutdown_handler();
    let serve_token = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { serve_token.cancelled().await })
        .await
        .context("server error")?;

    // graceful shutdown: dismiss the active set, let monitors finish their
    // terminal cleanup, then persist the cache
    tracing::info!("Beginning graceful shutdown sequence...");
    if let Err(e) = registry.kill_all().await {
        tracing::error!("Failed to kill all active jobs: {}", e);
    }

    let drain_deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    while !registry.is_empty().await {
        if tokio::time::Instant::now() >= drain_deadline {
            tracing::warn!(
                "{} jobs still active after the 30s grace period",
                registry.len().await
            );
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let records = cache.terminal_records().await;
    snapshot::save(&config.snapshot_path(), &records)
        .await
        .context("failed to save the jobs snapshot")?;

    tracing::info!("Graceful shutdown complete");
    Ok(())
}
