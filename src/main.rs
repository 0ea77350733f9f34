mod api;
mod catalog;
mod config;
mod db;
mod detector;
mod error;
mod notify;
mod retention;
mod retry;
mod sampler;
mod scrape;
mod state;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::routes::{router, ApiState};
use crate::catalog::{load_catalog_file, sync_catalog};
use crate::config::{Config, RETENTION_INTERVAL_SECS};
use crate::db::{CatalogStore, SqliteStore};
use crate::detector::AnomalyDetector;
use crate::error::Result;
use crate::notify::{Notifier, TelegramChannel};
use crate::retention::RetentionPruner;
use crate::retry::RetryPolicy;
use crate::sampler::{CircularSampler, RunController};
use crate::scrape::JsonCcuScraper;
use crate::state::CcuBoard;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store = SqliteStore::open(&cfg.db_path).await?;

    // --- Catalog import ---
    if let Some(path) = &cfg.catalog_path {
        let entries = load_catalog_file(path).await?;
        let report = sync_catalog(&store, &entries).await?;
        info!(
            "Catalog {path}: {} entries ({} new, {} updated)",
            entries.len(),
            report.inserted,
            report.updated
        );
    }
    let games = store.list_games().await?;
    if games.is_empty() {
        warn!("Catalog is empty: set CATALOG_PATH to import games before sampling");
    } else {
        info!("Tracking {} games", games.len());
    }

    // --- Shared telemetry ---
    let board = CcuBoard::new();
    let latency = Arc::new(LatencyStats::new());
    let health = Arc::new(HealthState::new());

    // --- Core wiring ---
    let shared = Arc::new(store.clone());
    let scrape_retry = RetryPolicy::new(cfg.scrape_max_attempts, Duration::from_millis(cfg.scrape_backoff_ms));
    let scraper = JsonCcuScraper::new(
        Duration::from_secs(cfg.scrape_timeout_secs),
        cfg.scrape_ccu_pointer.clone(),
        scrape_retry,
    )?;
    let detector = AnomalyDetector::new(shared.clone(), shared.clone(), shared.clone())
        .with_min_points(cfg.min_points_in_window);
    let sampler = CircularSampler::new(shared.clone(), Arc::new(scraper), detector.clone(), scrape_retry)
        .with_telemetry(Arc::clone(&board), Arc::clone(&latency), Arc::clone(&health));
    let controller = RunController::new(Arc::new(sampler));

    let channel = TelegramChannel::new(
        cfg.telegram_bot_token.clone(),
        cfg.telegram_chat_id.clone(),
        Duration::from_secs(cfg.scrape_timeout_secs),
    )?;
    let notifier = Arc::new(Notifier::new(
        shared.clone(),
        shared,
        Arc::new(channel),
        Arc::clone(&health),
    ));

    // --- Background loops ---
    let shutdown = CancellationToken::new();

    // Notifier (every NOTIFY_INTERVAL_SECS)
    let notify_loop = Arc::clone(&notifier);
    let notify_cancel = shutdown.clone();
    let notify_interval = Duration::from_secs(cfg.notify_interval_secs);
    let notify_task = tokio::spawn(async move { notify_loop.run(notify_interval, notify_cancel).await });

    // Retention pruner (hourly)
    let pruner = RetentionPruner::new(store.clone(), cfg.sample_retention_days, cfg.anomaly_retention_days);
    let prune_cancel = shutdown.clone();
    let prune_task = tokio::spawn(async move {
        pruner
            .run(Duration::from_secs(RETENTION_INTERVAL_SECS), prune_cancel)
            .await
    });

    if cfg.sampler_autostart {
        let run_id = controller.start(None)?;
        info!("SAMPLER_AUTOSTART set: sampling run {run_id} started");
    }

    // --- HTTP API server ---
    let api_state = ApiState {
        store,
        controller: Arc::clone(&controller),
        notifier,
        detector,
        board,
        latency,
        health,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Shutdown ---
    info!("Shutting down: stopping sampler and background loops");
    controller.shutdown().await;
    shutdown.cancel();
    let _ = tokio::join!(notify_task, prune_task);
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
