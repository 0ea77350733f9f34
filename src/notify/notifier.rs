use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::config::NOTIFY_MESSAGE_DELAY;
use crate::db::{AnomalyLedger, SettingsSource};
use crate::error::{AppError, Result};
use crate::notify::template::render_message;
use crate::notify::MessageChannel;
use crate::types::{now_ms, DeliveryReport};

/// Drains the anomaly ledger into a [`MessageChannel`].
///
/// The delivered latch is set only after the channel confirms a send, so a
/// failed delivery is retried on the next pass and a delivered anomaly is never
/// sent again. Passes are serialized: an on-demand pass and the periodic loop
/// never work the same batch concurrently.
pub struct Notifier {
    ledger: Arc<dyn AnomalyLedger>,
    settings: Arc<dyn SettingsSource>,
    channel: Arc<dyn MessageChannel>,
    health: Arc<HealthState>,
    message_delay: Duration,
    batch_lock: Mutex<()>,
}

impl Notifier {
    pub fn new(
        ledger: Arc<dyn AnomalyLedger>,
        settings: Arc<dyn SettingsSource>,
        channel: Arc<dyn MessageChannel>,
        health: Arc<HealthState>,
    ) -> Self {
        Self {
            ledger,
            settings,
            channel,
            health,
            message_delay: NOTIFY_MESSAGE_DELAY,
            batch_lock: Mutex::new(()),
        }
    }

    /// Deliver every undelivered anomaly, oldest first.
    ///
    /// Only batch-level storage failures (listing, settings) are returned as
    /// `Err`; per-anomaly failures are counted in the report.
    pub async fn deliver_pending(&self) -> Result<DeliveryReport> {
        let _batch = self.batch_lock.lock().await;

        let pending = self.ledger.list_undelivered_anomalies().await?;
        if pending.is_empty() {
            debug!("No undelivered anomalies");
            return Ok(DeliveryReport::default());
        }
        let settings = self.settings.anomaly_settings().await?;
        let template = settings.custom_message_template.as_deref();

        info!(
            pending = pending.len(),
            channel = self.channel.channel_name(),
            "Delivering {} pending anomalies",
            pending.len()
        );

        let mut report = DeliveryReport::default();
        for (i, item) in pending.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.message_delay).await;
            }

            let Some(id) = item.anomaly.id else {
                warn!(game_id = item.anomaly.game_id, "Skipping anomaly without ledger id");
                report.errors += 1;
                continue;
            };

            let text = render_message(item, settings.n_sigma, template);
            if !self.channel.deliver(&text).await {
                warn!(anomaly_id = id, "Delivery failed for '{}'; will retry next pass", item.game_title);
                report.errors += 1;
                continue;
            }

            match self.ledger.mark_anomaly_delivered(id).await {
                Ok(true) => {
                    report.delivered += 1;
                    self.health.record_delivery(now_ms());
                    debug!(anomaly_id = id, "Anomaly delivered and latched");
                }
                Ok(false) => {
                    warn!(anomaly_id = id, "Anomaly was already latched as delivered");
                }
                Err(e) => {
                    error!(anomaly_id = id, "Delivered but latch write failed: {e}");
                    report.errors += 1;
                }
            }
        }

        info!(
            delivered = report.delivered,
            errors = report.errors,
            "Notifier pass complete: {} delivered, {} errors",
            report.delivered,
            report.errors
        );
        Ok(report)
    }

    /// Periodic delivery until `cancel` fires.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // consume immediate first tick

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = cancel.cancelled() => {
                    info!("Notifier loop stopped");
                    return;
                }
            }
            match self.deliver_pending().await {
                Ok(_) => {}
                Err(AppError::Database(e)) => error!("Notifier pass skipped, storage error: {e}"),
                Err(e) => error!("Notifier pass failed: {e}"),
            }
        }
    }
}
