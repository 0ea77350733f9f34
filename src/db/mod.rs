//! Storage collaborators consumed by the sampler, detector and notifier.
//!
//! Each concern is a trait so the core can run against SQLite in production
//! and an in-memory double in tests.

pub mod models;
pub mod store;

#[cfg(test)]
pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Anomaly, AnomalySettings, AnomalyWithGame, GameRef, Sample};

pub use store::SqliteStore;

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn list_games(&self) -> Result<Vec<GameRef>>;

    async fn append_sample(&self, game_id: i64, timestamp_ms: i64, ccu: i64) -> Result<()>;

    /// Samples with `timestamp_ms >= since_ms`, ascending by time.
    async fn recent_samples(&self, game_id: i64, since_ms: i64) -> Result<Vec<Sample>>;
}

#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn anomaly_settings(&self) -> Result<AnomalySettings>;
}

#[async_trait]
pub trait AnomalyLedger: Send + Sync {
    /// Persist a new anomaly and return its id.
    async fn record_anomaly(&self, anomaly: &Anomaly) -> Result<i64>;

    /// Undelivered anomalies, oldest first.
    async fn list_undelivered_anomalies(&self) -> Result<Vec<AnomalyWithGame>>;

    /// Set the delivered latch. Returns false if it was already set or the id is unknown.
    async fn mark_anomaly_delivered(&self, id: i64) -> Result<bool>;
}
