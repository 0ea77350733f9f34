use std::time::Duration;

use crate::error::{AppError, Result};

/// Trailing window of samples used to compute a game's baseline.
pub const BASELINE_WINDOW: Duration = Duration::from_secs(24 * 3600);

/// Fewer samples than this inside the window means no verdict.
pub const MIN_POINTS_IN_WINDOW: usize = 5;

/// Politeness delay after every sampled game. Fixed pacing floor toward the scraped source.
pub const SAMPLE_PACE: Duration = Duration::from_millis(2000);

/// Delay between two deliveries inside one notifier batch.
pub const NOTIFY_MESSAGE_DELAY: Duration = Duration::from_millis(1000);

/// Backoff jitter: delays are scaled by a uniform factor in `1 ± BACKOFF_JITTER`.
pub const BACKOFF_JITTER: f64 = 0.2;

/// Retry defaults for a single scrape.
pub const SCRAPE_MAX_ATTEMPTS: u32 = 3;
pub const SCRAPE_BACKOFF_MS: u64 = 1000;
pub const SCRAPE_TIMEOUT_SECS: u64 = 15;

/// Most recent per-item diagnostics kept in a `RunSummary`.
pub const MAX_RUN_ERRORS: usize = 500;

/// Background notifier pass interval (seconds).
pub const NOTIFY_INTERVAL_SECS: u64 = 60;

/// Retention pruner interval (seconds).
pub const RETENTION_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// JSON catalog synced at startup (CATALOG_PATH)
    pub catalog_path: Option<String>,
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    /// JSON pointer to the CCU value in the reference endpoint body (SCRAPE_CCU_POINTER)
    pub scrape_ccu_pointer: String,
    pub scrape_max_attempts: u32,
    pub scrape_backoff_ms: u64,
    pub scrape_timeout_secs: u64,
    pub min_points_in_window: usize,
    pub notify_interval_secs: u64,
    /// Start an unbounded sampling run at boot (SAMPLER_AUTOSTART)
    pub sampler_autostart: bool,
    pub sample_retention_days: u64,
    pub anomaly_retention_days: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let telegram_bot_token = required("TELEGRAM_BOT_TOKEN")?;
        let telegram_chat_id = required("TELEGRAM_CHAT_ID")?;

        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "ccu_watch.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            catalog_path: std::env::var("CATALOG_PATH")
                .ok()
                .filter(|p| !p.trim().is_empty()),
            telegram_bot_token,
            telegram_chat_id,
            scrape_ccu_pointer: std::env::var("SCRAPE_CCU_POINTER")
                .unwrap_or_else(|_| "/playing".to_string()),
            scrape_max_attempts: std::env::var("SCRAPE_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(SCRAPE_MAX_ATTEMPTS),
            scrape_backoff_ms: std::env::var("SCRAPE_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(SCRAPE_BACKOFF_MS),
            scrape_timeout_secs: std::env::var("SCRAPE_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(SCRAPE_TIMEOUT_SECS),
            min_points_in_window: std::env::var("MIN_POINTS_IN_WINDOW")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .unwrap_or(MIN_POINTS_IN_WINDOW),
            notify_interval_secs: std::env::var("NOTIFY_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|n| *n > 0)
                .unwrap_or(NOTIFY_INTERVAL_SECS),
            sampler_autostart: std::env::var("SAMPLER_AUTOSTART")
                .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            sample_retention_days: std::env::var("SAMPLE_RETENTION_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<u64>()
                .unwrap_or(30),
            anomaly_retention_days: std::env::var("ANOMALY_RETENTION_DAYS")
                .unwrap_or_else(|_| "90".to_string())
                .parse::<u64>()
                .unwrap_or(90),
        })
    }
}

fn required(name: &str) -> Result<String> {
    match std::env::var(name) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::Config(format!("{name} must be set"))),
    }
}
