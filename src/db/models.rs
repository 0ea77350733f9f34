//! Database row types matching `migrations/0001_init.sql`.
//! Used by sqlx for typed queries.

use crate::types::{Anomaly, AnomalySettings, AnomalyWithGame, Direction, GameRef, Sample};

#[derive(Debug, sqlx::FromRow)]
pub struct GameRow {
    pub id: i64,
    pub external_id: String,
    pub title: String,
    pub reference_url: String,
}

impl From<GameRow> for GameRef {
    fn from(r: GameRow) -> Self {
        GameRef {
            id: r.id,
            external_id: r.external_id,
            title: r.title,
            reference_url: r.reference_url,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SampleRow {
    pub game_id: i64,
    pub timestamp_ms: i64,
    pub ccu: i64,
}

impl From<SampleRow> for Sample {
    fn from(r: SampleRow) -> Self {
        Sample {
            game_id: r.game_id,
            timestamp_ms: r.timestamp_ms,
            ccu: r.ccu,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct SettingsRow {
    pub n_sigma: f64,
    pub min_delta_threshold: i64,
    pub custom_message_template: Option<String>,
}

impl From<SettingsRow> for AnomalySettings {
    fn from(r: SettingsRow) -> Self {
        AnomalySettings {
            n_sigma: r.n_sigma,
            min_delta_threshold: r.min_delta_threshold,
            custom_message_template: r.custom_message_template.filter(|t| !t.trim().is_empty()),
        }
    }
}

/// Anomaly joined with its game's title and reference URL.
#[derive(Debug, sqlx::FromRow)]
pub struct AnomalyRow {
    pub id: i64,
    pub game_id: i64,
    pub timestamp_ms: i64,
    pub delta: f64,
    pub mean: f64,
    pub stddev: f64,
    pub threshold: f64,
    pub direction: String,
    pub delivered: bool,
    pub game_title: String,
    pub reference_url: String,
}

impl From<AnomalyRow> for AnomalyWithGame {
    fn from(r: AnomalyRow) -> Self {
        // The CHECK constraint keeps direction to up/down; fall back to the delta sign anyway.
        let direction = Direction::parse(&r.direction).unwrap_or_else(|| Direction::from_delta(r.delta));
        AnomalyWithGame {
            anomaly: Anomaly {
                id: Some(r.id),
                game_id: r.game_id,
                timestamp_ms: r.timestamp_ms,
                delta: r.delta,
                mean: r.mean,
                stddev: r.stddev,
                threshold: r.threshold,
                direction,
                delivered: r.delivered,
            },
            game_title: r.game_title,
            reference_url: r.reference_url,
        }
    }
}
