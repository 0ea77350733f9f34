pub mod baseline;
pub mod classifier;

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::{BASELINE_WINDOW, MIN_POINTS_IN_WINDOW};
use crate::db::{AnomalyLedger, CatalogStore, SettingsSource};
use crate::error::Result;
use crate::types::{now_ms, Anomaly, Baseline};

/// Rolling-baseline anomaly detector over the sample store.
///
/// Settings are fetched from the [`SettingsSource`] on every classification and
/// never cached, so operator changes apply to the very next reading.
#[derive(Clone)]
pub struct AnomalyDetector {
    samples: Arc<dyn CatalogStore>,
    settings: Arc<dyn SettingsSource>,
    ledger: Arc<dyn AnomalyLedger>,
    window: Duration,
    min_points: usize,
}

impl AnomalyDetector {
    pub fn new(
        samples: Arc<dyn CatalogStore>,
        settings: Arc<dyn SettingsSource>,
        ledger: Arc<dyn AnomalyLedger>,
    ) -> Self {
        Self {
            samples,
            settings,
            ledger,
            window: BASELINE_WINDOW,
            min_points: MIN_POINTS_IN_WINDOW,
        }
    }

    pub fn with_min_points(mut self, min_points: usize) -> Self {
        self.min_points = min_points;
        self
    }

    /// Baseline over the trailing window ending at `now_ms`.
    pub async fn baseline(&self, game_id: i64, now_ms: i64) -> Result<Baseline> {
        let history = self.samples.recent_samples(game_id, self.window_start(now_ms)).await?;
        Ok(baseline::compute(&history))
    }

    /// Classify a reading taken now. Storage errors surface as `Err`; missing
    /// evidence is `Ok(None)`.
    pub async fn classify(&self, game_id: i64, current_ccu: i64) -> Result<Option<Anomaly>> {
        self.classify_at(game_id, current_ccu, now_ms()).await
    }

    pub async fn classify_at(&self, game_id: i64, current_ccu: i64, now_ms: i64) -> Result<Option<Anomaly>> {
        let history = self.samples.recent_samples(game_id, self.window_start(now_ms)).await?;
        let settings = self.settings.anomaly_settings().await?;
        Ok(classifier::classify(
            game_id,
            current_ccu,
            &history,
            &settings,
            self.min_points,
            now_ms,
        ))
    }

    /// Persist a classified anomaly, returning it with its ledger id.
    pub async fn record(&self, mut anomaly: Anomaly) -> Result<Anomaly> {
        let id = self.ledger.record_anomaly(&anomaly).await?;
        anomaly.id = Some(id);
        info!(
            event = "ANOMALY",
            anomaly_id = id,
            game_id = anomaly.game_id,
            direction = %anomaly.direction,
            delta = anomaly.delta,
            threshold = anomaly.threshold,
            "ANOMALY {} | game {} | delta {:+.1} vs threshold {:.1} (mean {:.1}, stddev {:.1})",
            anomaly.direction.glyph(),
            anomaly.game_id,
            anomaly.delta,
            anomaly.threshold,
            anomaly.mean,
            anomaly.stddev,
        );
        Ok(anomaly)
    }

    pub async fn classify_and_record(&self, game_id: i64, current_ccu: i64) -> Result<Option<Anomaly>> {
        match self.classify(game_id, current_ccu).await? {
            Some(anomaly) => Ok(Some(self.record(anomaly).await?)),
            None => Ok(None),
        }
    }

    fn window_start(&self, now_ms: i64) -> i64 {
        now_ms - self.window.as_millis() as i64
    }
}
