use crate::types::{Baseline, Sample};

/// Mean and sample standard deviation (n-1 denominator) of the window's CCU values.
/// Stddev is 0 for fewer than two samples.
pub fn compute(samples: &[Sample]) -> Baseline {
    let n = samples.len();
    if n == 0 {
        return Baseline { mean: 0.0, stddev: 0.0, sample_count: 0 };
    }

    let mean = samples.iter().map(|s| s.ccu as f64).sum::<f64>() / n as f64;
    let stddev = if n <= 1 {
        0.0
    } else {
        let sum_sq: f64 = samples
            .iter()
            .map(|s| {
                let d = s.ccu as f64 - mean;
                d * d
            })
            .sum();
        (sum_sq / (n - 1) as f64).sqrt()
    };

    Baseline { mean, stddev, sample_count: n }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn samples(ccus: &[i64]) -> Vec<Sample> {
        ccus.iter()
            .enumerate()
            .map(|(i, &ccu)| Sample { game_id: 1, timestamp_ms: i as i64, ccu })
            .collect()
    }

    #[test]
    fn empty_window() {
        let b = compute(&[]);
        assert_eq!(b.sample_count, 0);
        assert_eq!(b.stddev, 0.0);
    }

    #[test]
    fn single_point_has_zero_stddev() {
        let b = compute(&samples(&[42]));
        assert_eq!(b.mean, 42.0);
        assert_eq!(b.stddev, 0.0);
    }

    #[test]
    fn uses_sample_standard_deviation() {
        let b = compute(&samples(&[90, 90, 100, 110, 110]));
        assert_eq!(b.mean, 100.0);
        assert_eq!(b.stddev, 10.0);
        assert_eq!(b.sample_count, 5);
    }

    #[test]
    fn constant_history_is_flat() {
        let b = compute(&samples(&[100, 100, 100, 100, 100]));
        assert_eq!(b.stddev, 0.0);
    }
}
