//! Scrape latency histogram: time from issuing a scrape to its outcome,
//! retries included. Recorded by the sampler, read by `/stats/latency`.

use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

/// Values stored in milliseconds.
pub struct LatencyStats {
    inner: Mutex<hdrhistogram::Histogram<u64>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencySummary {
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub sample_count: u64,
}

impl LatencyStats {
    /// Tracks 1ms to 10 minutes, 3 significant figures.
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 600_000, 3)
            .expect("valid histogram bounds");
        Self {
            inner: Mutex::new(histogram),
        }
    }

    pub fn record(&self, d: Duration) {
        let ms = (d.as_millis().min(u128::from(u64::MAX)) as u64).max(1);
        if let Ok(mut h) = self.inner.lock() {
            let _ = h.saturating_record(ms);
        }
    }

    pub fn summary(&self) -> LatencySummary {
        let Ok(h) = self.inner.lock() else {
            return LatencySummary::default();
        };
        if h.len() == 0 {
            return LatencySummary::default();
        }
        LatencySummary {
            p50_ms: Some(h.value_at_quantile(0.5)),
            p95_ms: Some(h.value_at_quantile(0.95)),
            p99_ms: Some(h.value_at_quantile(0.99)),
            max_ms: Some(h.max()),
            sample_count: h.len(),
        }
    }
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_histogram_has_no_percentiles() {
        let s = LatencyStats::new().summary();
        assert_eq!(s.sample_count, 0);
        assert!(s.p50_ms.is_none());
    }

    #[test]
    fn records_and_summarises() {
        let stats = LatencyStats::new();
        for ms in [100, 200, 300, 400, 5_000] {
            stats.record(Duration::from_millis(ms));
        }
        let s = stats.summary();
        assert_eq!(s.sample_count, 5);
        let p50 = s.p50_ms.unwrap();
        assert!((299..=301).contains(&p50), "p50 was {p50}");
        assert!(s.max_ms.unwrap() >= 4_990);
    }

    #[test]
    fn sub_millisecond_counts_as_one() {
        let stats = LatencyStats::new();
        stats.record(Duration::from_micros(10));
        assert_eq!(stats.summary().sample_count, 1);
    }
}
