//! Bounded retries with exponential backoff and jitter.
//!
//! Used by the HTTP scraper for each request and by the sampler for scrapers
//! that do not retry on their own.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

use crate::config::BACKOFF_JITTER;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, first one included. Always >= 1.
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
        }
    }

    #[cfg(test)]
    pub fn single_attempt() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Un-jittered delay applied after failed attempt number `attempt` (1-based):
    /// `base * 2^(attempt-1)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_backoff.saturating_mul(1u32 << exp)
    }
}

/// Scale `delay` by a uniform factor in `[1 - BACKOFF_JITTER, 1 + BACKOFF_JITTER]`.
pub fn jittered(delay: Duration) -> Duration {
    let factor = 1.0 + rand::rng().random_range(-BACKOFF_JITTER..=BACKOFF_JITTER);
    delay.mul_f64(factor)
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed.
/// The last error is returned unchanged.
pub async fn fetch_with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    retry_with_sleep(policy, what, op, tokio::time::sleep).await
}

async fn retry_with_sleep<T, E, F, Fut, S, SFut>(
    policy: &RetryPolicy,
    what: &str,
    mut op: F,
    mut sleep: S,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    S: FnMut(Duration) -> SFut,
    SFut: Future<Output = ()>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{what} succeeded on attempt {attempt}/{}", policy.max_attempts);
                }
                return Ok(value);
            }
            Err(e) if attempt >= policy.max_attempts => {
                warn!(
                    attempts = attempt,
                    "{what} failed after {attempt} attempt(s): {e}"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = jittered(policy.base_delay(attempt));
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "{what} attempt {attempt}/{} failed: {e}; retrying",
                    policy.max_attempts,
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
