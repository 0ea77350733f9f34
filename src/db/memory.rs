//! In-memory store for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::db::{AnomalyLedger, CatalogStore, SettingsSource};
use crate::error::{AppError, Result};
use crate::types::{Anomaly, AnomalySettings, AnomalyWithGame, GameRef, Sample};

#[derive(Default)]
pub struct MemoryStore {
    games: Mutex<Vec<GameRef>>,
    samples: Mutex<Vec<Sample>>,
    settings: Mutex<AnomalySettings>,
    anomalies: Mutex<Vec<Anomaly>>,
    pub settings_reads: AtomicUsize,
    pub mark_calls: AtomicUsize,
    pub fail_reads: AtomicBool,
    pub fail_appends: AtomicBool,
}

impl MemoryStore {
    pub fn with_games(titles: &[&str]) -> Self {
        let store = Self::default();
        {
            let mut games = store.games.lock().unwrap();
            for (i, title) in titles.iter().enumerate() {
                let id = i as i64 + 1;
                games.push(GameRef {
                    id,
                    external_id: format!("ext-{id}"),
                    title: title.to_string(),
                    reference_url: format!("https://games.example/{id}"),
                });
            }
        }
        store
    }

    pub fn set_settings(&self, settings: AnomalySettings) {
        *self.settings.lock().unwrap() = settings;
    }

    /// Append `ccus` for `game_id`, one second apart ending at `last_ts_ms`.
    pub fn seed_samples(&self, game_id: i64, ccus: &[i64], last_ts_ms: i64) {
        let mut samples = self.samples.lock().unwrap();
        let n = ccus.len() as i64;
        for (i, ccu) in ccus.iter().enumerate() {
            samples.push(Sample {
                game_id,
                timestamp_ms: last_ts_ms - (n - 1 - i as i64) * 1_000,
                ccu: *ccu,
            });
        }
    }

    pub fn samples_for(&self, game_id: i64) -> Vec<Sample> {
        self.samples
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.game_id == game_id)
            .copied()
            .collect()
    }

    pub fn anomalies(&self) -> Vec<Anomaly> {
        self.anomalies.lock().unwrap().clone()
    }

    pub fn push_anomaly(&self, mut anomaly: Anomaly) -> i64 {
        let mut anomalies = self.anomalies.lock().unwrap();
        let id = anomalies.len() as i64 + 1;
        anomaly.id = Some(id);
        anomalies.push(anomaly);
        id
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn list_games(&self) -> Result<Vec<GameRef>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Io(std::io::Error::other("catalog unavailable")));
        }
        Ok(self.games.lock().unwrap().clone())
    }

    async fn append_sample(&self, game_id: i64, timestamp_ms: i64, ccu: i64) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(AppError::Io(std::io::Error::other("disk full")));
        }
        self.samples.lock().unwrap().push(Sample { game_id, timestamp_ms, ccu });
        Ok(())
    }

    async fn recent_samples(&self, game_id: i64, since_ms: i64) -> Result<Vec<Sample>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(AppError::Io(std::io::Error::other("read failed")));
        }
        let mut out: Vec<Sample> = self
            .samples
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.game_id == game_id && s.timestamp_ms >= since_ms)
            .copied()
            .collect();
        out.sort_by_key(|s| s.timestamp_ms);
        Ok(out)
    }
}

#[async_trait]
impl SettingsSource for MemoryStore {
    async fn anomaly_settings(&self) -> Result<AnomalySettings> {
        self.settings_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.settings.lock().unwrap().clone())
    }
}

#[async_trait]
impl AnomalyLedger for MemoryStore {
    async fn record_anomaly(&self, anomaly: &Anomaly) -> Result<i64> {
        Ok(self.push_anomaly(anomaly.clone()))
    }

    async fn list_undelivered_anomalies(&self) -> Result<Vec<AnomalyWithGame>> {
        let games = self.games.lock().unwrap().clone();
        let mut pending: Vec<AnomalyWithGame> = self
            .anomalies
            .lock()
            .unwrap()
            .iter()
            .filter(|a| !a.delivered)
            .map(|a| {
                let game = games.iter().find(|g| g.id == a.game_id);
                AnomalyWithGame {
                    anomaly: a.clone(),
                    game_title: game.map(|g| g.title.clone()).unwrap_or_default(),
                    reference_url: game.map(|g| g.reference_url.clone()).unwrap_or_default(),
                }
            })
            .collect();
        pending.sort_by_key(|a| a.anomaly.timestamp_ms);
        Ok(pending)
    }

    async fn mark_anomaly_delivered(&self, id: i64) -> Result<bool> {
        self.mark_calls.fetch_add(1, Ordering::SeqCst);
        let mut anomalies = self.anomalies.lock().unwrap();
        match anomalies.iter_mut().find(|a| a.id == Some(id)) {
            Some(a) if !a.delivered => {
                a.delivered = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
