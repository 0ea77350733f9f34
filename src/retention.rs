//! Hourly housekeeping: drop old samples and old delivered anomalies.
//! Undelivered anomalies are kept regardless of age, and samples inside the
//! baseline window are never pruned whatever the configured retention.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::BASELINE_WINDOW;
use crate::db::SqliteStore;
use crate::error::Result;
use crate::types::now_ms;

const DAY_MS: i64 = 24 * 3_600_000;

pub struct RetentionPruner {
    store: SqliteStore,
    sample_retention_days: u64,
    anomaly_retention_days: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub samples: u64,
    pub anomalies: u64,
}

impl RetentionPruner {
    pub fn new(store: SqliteStore, sample_retention_days: u64, anomaly_retention_days: u64) -> Self {
        Self {
            store,
            sample_retention_days,
            anomaly_retention_days,
        }
    }

    pub async fn prune_once(&self, now_ms: i64) -> Result<PruneReport> {
        let window_start = now_ms - BASELINE_WINDOW.as_millis() as i64;
        let sample_cutoff = (now_ms - self.sample_retention_days as i64 * DAY_MS).min(window_start);
        let anomaly_cutoff = now_ms - self.anomaly_retention_days as i64 * DAY_MS;
        let report = PruneReport {
            samples: self.store.prune_samples_before(sample_cutoff).await?,
            anomalies: self.store.prune_delivered_anomalies_before(anomaly_cutoff).await?,
        };
        if report.samples > 0 || report.anomalies > 0 {
            info!(
                samples = report.samples,
                anomalies = report.anomalies,
                "[RETENTION] pruned {} samples, {} delivered anomalies",
                report.samples,
                report.anomalies
            );
        } else {
            debug!("[RETENTION] nothing to prune");
        }
        Ok(report)
    }

    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => return,
            }
            if let Err(e) = self.prune_once(now_ms()).await {
                error!("[RETENTION] prune failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AnomalyLedger, CatalogStore};
    use crate::types::{Anomaly, Direction};

    const NOW: i64 = 1_700_000_000_000;

    fn anomaly(timestamp_ms: i64) -> Anomaly {
        Anomaly {
            id: None,
            game_id: 1,
            timestamp_ms,
            delta: 50.0,
            mean: 100.0,
            stddev: 10.0,
            threshold: 30.0,
            direction: Direction::Up,
            delivered: false,
        }
    }

    #[tokio::test]
    async fn keeps_recent_and_undelivered() {
        let store = SqliteStore::in_memory().await;
        store.upsert_game("g1", "Alpha", "https://a").await.unwrap();

        store.append_sample(1, NOW - 40 * DAY_MS, 10).await.unwrap();
        store.append_sample(1, NOW - DAY_MS, 20).await.unwrap();

        let old_delivered = store.record_anomaly(&anomaly(NOW - 100 * DAY_MS)).await.unwrap();
        store.mark_anomaly_delivered(old_delivered).await.unwrap();
        store.record_anomaly(&anomaly(NOW - 200 * DAY_MS)).await.unwrap();

        let pruner = RetentionPruner::new(store.clone(), 30, 90);
        let report = pruner.prune_once(NOW).await.unwrap();
        assert_eq!(report, PruneReport { samples: 1, anomalies: 1 });

        let samples = store.recent_samples(1, 0).await.unwrap();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].ccu, 20);
        let pending = store.list_undelivered_anomalies().await.unwrap();
        assert_eq!(pending.len(), 1);

        assert_eq!(pruner.prune_once(NOW).await.unwrap(), PruneReport::default());
    }

    #[tokio::test]
    async fn zero_day_retention_keeps_baseline_window() {
        let store = SqliteStore::in_memory().await;
        store.upsert_game("g1", "Alpha", "https://a").await.unwrap();

        store.append_sample(1, NOW - 2 * DAY_MS, 5).await.unwrap();
        for (i, ccu) in [90, 90, 100, 110, 110].into_iter().enumerate() {
            store.append_sample(1, NOW - 60_000 * (i as i64 + 1), ccu).await.unwrap();
        }

        let report = RetentionPruner::new(store.clone(), 0, 90).prune_once(NOW).await.unwrap();
        assert_eq!(report.samples, 1);

        let window = store.recent_samples(1, NOW - DAY_MS).await.unwrap();
        assert_eq!(window.len(), 5);
    }
}
