//! interchatd - InterChat relay daemon.
//!
//! Startup: load and validate configuration, connect the database and the
//! shared KV, build the runtime, spawn the background sweepers, then wait
//! for shutdown. Inbound chat events reach the runtime through the
//! platform gateway adapter embedding this library.

use interchatd::config::{Config, KvBackend, LogFormat};
use interchatd::db::Database;
use interchatd::kv::memory::MemoryKv;
use interchatd::kv::redis_store::RedisKv;
use interchatd::kv::KvStore;
use interchatd::transport::http::HttpTransport;
use interchatd::{Runtime, RuntimeParams};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `config.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    // Canonicalize to avoid relying on the current working directory.
    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so we can use log_format)
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
        e
    })?;

    // Initialize tracing based on config
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    // Validate configuration
    if let Err(errors) = interchatd::config::validate(&config) {
        for err in &errors {
            error!(error = %err, "Configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(instance = %config.server.name, "Starting interchatd");

    // Initialize database
    let db_path = config
        .database
        .as_ref()
        .map(|d| d.path.as_str())
        .unwrap_or("interchat.db");
    let db = Database::new(db_path).await?;

    // Initialize the shared KV
    let (kv, memory_kv): (Arc<dyn KvStore>, Option<Arc<MemoryKv>>) = match config.kv.backend {
        KvBackend::Redis => {
            let redis = RedisKv::connect(&config.kv.url).await?;
            (Arc::new(redis), None)
        }
        KvBackend::Memory => {
            info!("KV backend 'memory': state is process-local");
            let memory = Arc::new(MemoryKv::new());
            (memory.clone(), Some(memory))
        }
    };

    // Outbound chat transport
    let transport = Arc::new(HttpTransport::new(&config.transport)?);

    // Prometheus metrics are optional.
    // Convention: metrics_port = 0 disables the HTTP endpoint (used by tests).
    let metrics_port = config.server.metrics_port.unwrap_or(9090);

    let runtime = Arc::new(Runtime::build(RuntimeParams {
        config,
        db,
        kv,
        transport,
        content: None,
    }));
    info!("Runtime initialized");

    // Spawn signal handler for graceful shutdown
    {
        let shutdown_tx = runtime.shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => info!("Received SIGINT - initiating graceful shutdown"),
                _ = sigterm.recv() => info!("Received SIGTERM - initiating graceful shutdown"),
            }

            let _ = shutdown_tx.send(());
        });
    }

    if metrics_port == 0 {
        info!("Metrics disabled");
    } else {
        interchatd::metrics::init();
        info!("Metrics initialized");

        tokio::spawn(async move {
            interchatd::http::run_http_server(metrics_port).await;
        });
        info!(port = metrics_port, "Prometheus HTTP server started");
    }

    // Matchmaker sweeper: prune stale queue entries and idle calls (every 30s)
    {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut shutdown_rx = runtime.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = runtime.matchmaker.sweep().await {
                            tracing::warn!(error = %e, "Matchmaker sweep failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });
    }
    info!("Matchmaker sweeper started");

    // Sibling health probe: revive or escalate skipped siblings (every minute)
    {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut shutdown_rx = runtime.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = runtime.broadcast.probe_unhealthy().await {
                            tracing::warn!(error = %e, "Sibling health probe failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });
    }
    info!("Sibling health probe started");

    // Ban expiry sweeper: rewrite due temporary bans (every minute)
    {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            let mut shutdown_rx = runtime.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        match runtime.moderation.expire_due_bans().await {
                            Ok(rewritten) if rewritten > 0 => {
                                info!(rewritten = rewritten, "Expired temporary bans rewritten");
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::warn!(error = %e, "Ban expiry sweep failed");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });
    }
    info!("Ban expiry sweeper started");

    // Cache and rate limiter pruning task (every 5 minutes)
    {
        let runtime = Arc::clone(&runtime);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
            let mut shutdown_rx = runtime.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        runtime.prune();
                        if let Some(memory) = &memory_kv {
                            let removed = memory.prune_expired();
                            if removed > 0 {
                                info!(removed = removed, "Expired KV entries pruned");
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });
    }
    info!("Pruning task started");

    // The gateway adapter drives the runtime from here; this task only has
    // to stay alive until shutdown.
    let mut shutdown_rx = runtime.shutdown_tx.subscribe();
    let _ = shutdown_rx.recv().await;

    info!("Shutting down, waiting for tasks to finish...");
    // Give tasks a moment to flush buffers and close connections
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

    Ok(())
}
