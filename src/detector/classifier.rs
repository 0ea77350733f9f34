use crate::detector::baseline;
use crate::types::{Anomaly, AnomalySettings, Direction, Sample};

/// Classify `current_ccu` against a game's window history.
///
/// Returns `None` when the window holds fewer than `min_points` samples, when the
/// history is flat (stddev 0), or when the deviation fails either test. Anomalous
/// requires both `|delta| > n_sigma * stddev` and `|delta| >= min_delta_threshold`.
/// The returned anomaly is not persisted.
pub fn classify(
    game_id: i64,
    current_ccu: i64,
    history: &[Sample],
    settings: &AnomalySettings,
    min_points: usize,
    timestamp_ms: i64,
) -> Option<Anomaly> {
    if history.len() < min_points {
        return None;
    }

    let base = baseline::compute(history);
    if base.stddev == 0.0 {
        return None;
    }

    let delta = current_ccu as f64 - base.mean;
    let threshold = settings.n_sigma * base.stddev;
    let magnitude = delta.abs();

    if magnitude <= threshold || magnitude < settings.min_delta_threshold as f64 {
        return None;
    }

    Some(Anomaly {
        id: None,
        game_id,
        timestamp_ms,
        delta,
        mean: base.mean,
        stddev: base.stddev,
        threshold,
        direction: Direction::from_delta(delta),
        delivered: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(ccus: &[i64]) -> Vec<Sample> {
        ccus.iter()
            .enumerate()
            .map(|(i, &ccu)| Sample { game_id: 1, timestamp_ms: i as i64 * 1_000, ccu })
            .collect()
    }

    fn settings(n_sigma: f64, min_delta: i64) -> AnomalySettings {
        AnomalySettings {
            n_sigma,
            min_delta_threshold: min_delta,
            custom_message_template: None,
        }
    }

    // mean = 100, sample stddev = 10
    const SPREAD: [i64; 5] = [90, 90, 100, 110, 110];

    #[test]
    fn spike_above_threshold_is_up() {
        let a = classify(1, 135, &history(&SPREAD), &settings(3.0, 10), 5, 9_000)
            .expect("anomalous");
        assert_eq!(a.direction, Direction::Up);
        assert_eq!(a.delta, 35.0);
        assert_eq!(a.threshold, 30.0);
        assert_eq!(a.mean, 100.0);
        assert_eq!(a.stddev, 10.0);
        assert_eq!(a.timestamp_ms, 9_000);
        assert!(!a.delivered);
        assert!(a.id.is_none());
    }

    #[test]
    fn just_below_statistical_threshold() {
        assert!(classify(1, 129, &history(&SPREAD), &settings(3.0, 10), 5, 0).is_none());
    }

    #[test]
    fn exactly_at_threshold_is_not_anomalous() {
        assert!(classify(1, 130, &history(&SPREAD), &settings(3.0, 10), 5, 0).is_none());
    }

    #[test]
    fn drop_is_down() {
        let a = classify(1, 60, &history(&SPREAD), &settings(3.0, 10), 5, 0).expect("anomalous");
        assert_eq!(a.direction, Direction::Down);
        assert_eq!(a.delta, -40.0);
    }

    #[test]
    fn magnitude_floor_suppresses_small_absolute_moves() {
        // Passes 1-sigma (15 > 10) but not the 20-player floor.
        assert!(classify(1, 115, &history(&SPREAD), &settings(1.0, 20), 5, 0).is_none());
        // Floor is inclusive.
        assert!(classify(1, 120, &history(&SPREAD), &settings(1.0, 20), 5, 0).is_some());
    }

    #[test]
    fn flat_history_never_anomalous() {
        let flat = history(&[100, 100, 100, 100, 100]);
        for n_sigma in [0.01, 1.0, 3.0] {
            assert!(classify(1, 100, &flat, &settings(n_sigma, 0), 5, 0).is_none());
            assert!(classify(1, 10_000, &flat, &settings(n_sigma, 0), 5, 0).is_none());
        }
    }

    #[test]
    fn too_few_points_never_anomalous() {
        let short = history(&[10, 500, 20, 900]);
        assert!(classify(1, 1_000_000, &short, &settings(0.1, 0), 5, 0).is_none());
        assert!(classify(1, 1_000_000, &[], &settings(0.1, 0), 1, 0).is_none());
    }
}
