//! ModelMeter backend entry point: configuration, store, provider registry,
//! scheduler, and the read API server.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use modelmeter_backend::{
    api::{self, AppState},
    bench::Engine,
    config::Config,
    drift::DriftCache,
    providers::ProviderRegistry,
    sandbox::Evaluator,
    scheduler::Scheduler,
    store::ScoreStore,
};

#[derive(Debug, Parser)]
#[command(name = "modelmeter", about = "LLM benchmark and drift engine")]
struct Args {
    /// HTTP port (overrides PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Database path (overrides DATABASE_PATH).
    #[arg(long)]
    db: Option<String>,

    /// Run a single sweep and exit instead of starting the scheduler.
    #[arg(long)]
    sweep_once: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "modelmeter_backend=info,modelmeter=info,tower_http=warn".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(db) = args.db {
        config.database_path = db;
    }

    info!("opening store at {}", config.database_path);
    let store = ScoreStore::open(&config.database_path)?;

    let http = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .context("build http client")?;
    let registry = ProviderRegistry::from_env(http);
    if registry.configured_vendors().is_empty() {
        warn!("no provider credentials configured; sweeps will only skip models");
    }

    let evaluator = Evaluator::new(config.sandbox_python.clone());
    let engine = Arc::new(Engine::new(store.clone(), registry, evaluator, &config));

    if args.sweep_once {
        let summary = engine.run_sweep().await?;
        info!(
            "one-shot sweep {}: {} scored, {} sentinels, {} skipped, {} failed",
            summary.batch_ts, summary.scored, summary.sentinels, summary.skipped, summary.failed
        );
        return Ok(());
    }

    let drift_cache = Arc::new(DriftCache::new());
    let scheduler = Scheduler::new(Arc::clone(&engine), Arc::clone(&drift_cache));

    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let scheduler_handles = scheduler.spawn(&shutdown_tx);

    let state = AppState {
        store,
        drift_cache,
        scheduler,
        started_at: Utc::now(),
    };
    let app = api::router(state);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("listening on {addr}");

    let server_shutdown = shutdown_tx.clone();
    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        let mut rx = server_shutdown.subscribe();
        let _ = rx.recv().await;
    });

    // First signal drains in-flight work; a second aborts the process.
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        info!("shutdown signal received, draining");
        let _ = shutdown_tx.send(());
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("second signal, aborting");
            std::process::exit(130);
        }
    });

    if let Err(e) = server.await {
        error!("server error: {e}");
    }
    for handle in scheduler_handles {
        let _ = handle.await;
    }
    info!("shutdown complete");
    Ok(())
}
