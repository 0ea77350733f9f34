use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;

// ---------------------------------------------------------------------------
// LiveReading — last scrape outcome per game, for the API and dashboard
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveReading {
    pub game_id: i64,
    /// Last successful CCU reading, kept across later failures.
    pub ccu: Option<i64>,
    pub observed_at_ms: Option<i64>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl LiveReading {
    fn empty(game_id: i64) -> Self {
        Self {
            game_id,
            ccu: None,
            observed_at_ms: None,
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// CcuBoard
// ---------------------------------------------------------------------------

/// Written by the sampler after each item, read concurrently by the API.
/// Not a source of truth: samples live in the store.
#[derive(Default)]
pub struct CcuBoard {
    readings: DashMap<i64, LiveReading>,
}

impl CcuBoard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_success(&self, game_id: i64, ccu: i64, observed_at_ms: i64) {
        let mut entry = self
            .readings
            .entry(game_id)
            .or_insert_with(|| LiveReading::empty(game_id));
        entry.ccu = Some(ccu);
        entry.observed_at_ms = Some(observed_at_ms);
        entry.last_error = None;
        entry.consecutive_failures = 0;
    }

    pub fn record_failure(&self, game_id: i64, error: String) {
        let mut entry = self
            .readings
            .entry(game_id)
            .or_insert_with(|| LiveReading::empty(game_id));
        entry.last_error = Some(error);
        entry.consecutive_failures += 1;
    }

    pub fn get(&self, game_id: i64) -> Option<LiveReading> {
        self.readings.get(&game_id).map(|r| r.value().clone())
    }

    /// Games whose last scrape failed.
    pub fn failing_count(&self) -> usize {
        self.readings.iter().filter(|r| r.consecutive_failures > 0).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_keeps_last_good_reading() {
        let board = CcuBoard::new();
        board.record_success(1, 500, 1_000);
        board.record_failure(1, "timeout".to_string());
        board.record_failure(1, "timeout".to_string());

        let r = board.get(1).expect("reading");
        assert_eq!(r.ccu, Some(500));
        assert_eq!(r.consecutive_failures, 2);
        assert_eq!(board.failing_count(), 1);

        board.record_success(1, 510, 2_000);
        let r = board.get(1).expect("reading");
        assert_eq!(r.consecutive_failures, 0);
        assert!(r.last_error.is_none());
        assert_eq!(board.failing_count(), 0);
    }

    #[test]
    fn unknown_game_has_no_reading() {
        let board = CcuBoard::new();
        assert!(board.get(42).is_none());
        assert_eq!(board.failing_count(), 0);
    }
}
