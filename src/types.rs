use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Catalog
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRef {
    /// Store-assigned identity.
    pub id: i64,
    /// Natural key in the external catalog; authoritative for de-duplication.
    pub external_id: String,
    pub title: String,
    pub reference_url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub game_id: i64,
    pub timestamp_ms: i64,
    pub ccu: i64,
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Derived per-game statistics over the trailing window. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Baseline {
    pub mean: f64,
    pub stddev: f64,
    pub sample_count: usize,
}

/// Operator-tunable detection sensitivity. Read fresh on every classification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySettings {
    pub n_sigma: f64,
    pub min_delta_threshold: i64,
    pub custom_message_template: Option<String>,
}

impl AnomalySettings {
    pub fn validate(&self) -> Result<()> {
        if !self.n_sigma.is_finite() || self.n_sigma <= 0.0 {
            return Err(AppError::InvalidSettings(format!(
                "n_sigma must be a positive number, got {}",
                self.n_sigma
            )));
        }
        if self.min_delta_threshold < 0 {
            return Err(AppError::InvalidSettings(format!(
                "min_delta_threshold must be >= 0, got {}",
                self.min_delta_threshold
            )));
        }
        Ok(())
    }
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            n_sigma: 3.0,
            min_delta_threshold: 10,
            custom_message_template: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn glyph(&self) -> &'static str {
        match self {
            Direction::Up => "▲",
            Direction::Down => "▼",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "up"),
            Direction::Down => write!(f, "down"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    /// `None` until the ledger has recorded it.
    pub id: Option<i64>,
    pub game_id: i64,
    pub timestamp_ms: i64,
    pub delta: f64,
    pub mean: f64,
    pub stddev: f64,
    pub threshold: f64,
    pub direction: Direction,
    /// One-way latch: false → true on confirmed delivery, never back.
    pub delivered: bool,
}

impl Anomaly {
    /// The reading that triggered the anomaly.
    pub fn current_online(&self) -> f64 {
        self.mean + self.delta
    }
}

/// Ledger view joined with the catalog for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyWithGame {
    #[serde(flatten)]
    pub anomaly: Anomaly,
    pub game_title: String,
    pub reference_url: String,
}

// ---------------------------------------------------------------------------
// Sampling runs
// ---------------------------------------------------------------------------

/// Reported after every processed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub index_in_cycle: usize,
    pub total_games: usize,
    pub current_game_title: String,
    pub successful_samples: u64,
    pub failed_samples: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Duration bound elapsed.
    Deadline,
    /// Cancellation observed at a loop boundary.
    Cancelled,
    /// Catalog snapshot was empty; nothing to sample.
    EmptyCatalog,
    /// Catalog snapshot could not be read.
    CatalogUnavailable,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Deadline => "deadline",
            StopReason::Cancelled => "cancelled",
            StopReason::EmptyCatalog => "empty_catalog",
            StopReason::CatalogUnavailable => "catalog_unavailable",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_games: usize,
    pub successful_samples: u64,
    pub failed_samples: u64,
    pub items_processed: u64,
    /// Most recent per-item diagnostics (bounded).
    pub errors: Vec<String>,
    /// Wall time spent processing items divided by items processed; 0 if none.
    pub average_time_per_game_ms: f64,
    pub stop_reason: StopReason,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
    pub delivered: u64,
    pub errors: u64,
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_follows_delta_sign() {
        assert_eq!(Direction::from_delta(35.0), Direction::Up);
        assert_eq!(Direction::from_delta(-0.5), Direction::Down);
    }

    #[test]
    fn settings_validation() {
        assert!(AnomalySettings::default().validate().is_ok());

        let zero_sigma = AnomalySettings { n_sigma: 0.0, ..AnomalySettings::default() };
        assert!(matches!(zero_sigma.validate(), Err(AppError::InvalidSettings(_))));

        let negative_floor = AnomalySettings {
            min_delta_threshold: -1,
            ..AnomalySettings::default()
        };
        assert!(negative_floor.validate().is_err());
    }

    #[test]
    fn current_online_is_mean_plus_delta() {
        let a = Anomaly {
            id: Some(1),
            game_id: 7,
            timestamp_ms: 0,
            delta: -40.0,
            mean: 140.0,
            stddev: 5.0,
            threshold: 15.0,
            direction: Direction::Down,
            delivered: false,
        };
        assert_eq!(a.current_online(), 100.0);
    }
}
