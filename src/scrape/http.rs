use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{AppError, Result};
use crate::retry::{fetch_with_retry, RetryPolicy};
use crate::scrape::CcuScraper;
use crate::types::GameRef;

/// Reads the CCU from a JSON endpoint at each game's reference URL.
///
/// The value is located with a JSON pointer (e.g. `/playing` or `/data/0/online`).
/// Each request is bounded by the client timeout and retried per [`RetryPolicy`].
pub struct JsonCcuScraper {
    client: reqwest::Client,
    pointer: String,
    retry: RetryPolicy,
}

impl JsonCcuScraper {
    pub fn new(timeout: Duration, pointer: String, retry: RetryPolicy) -> Result<Self> {
        if !pointer.is_empty() && !pointer.starts_with('/') {
            return Err(AppError::Config(format!(
                "SCRAPE_CCU_POINTER must be empty or start with '/', got {pointer:?}"
            )));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ccu-watch/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, pointer, retry })
    }

    async fn fetch_body(&self, url: &str) -> Result<serde_json::Value> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Fetch(format!("{url} returned HTTP {status}")));
        }
        Ok(resp.json().await?)
    }
}

#[async_trait]
impl CcuScraper for JsonCcuScraper {
    async fn scrape_current_ccu(&self, game: &GameRef) -> Result<Option<i64>> {
        let what = format!("scrape '{}'", game.title);
        let body = fetch_with_retry(&self.retry, &what, || self.fetch_body(&game.reference_url)).await?;
        let ccu = extract_ccu(&body, &self.pointer);
        if ccu.is_none() {
            debug!(game_id = game.id, pointer = %self.pointer, "no CCU value at pointer");
        }
        Ok(ccu)
    }

    fn retries_internally(&self) -> bool {
        true
    }
}

/// Non-negative integer at `pointer`. Accepts JSON numbers and numeric strings
/// with thousands separators ("12,345").
pub fn extract_ccu(body: &serde_json::Value, pointer: &str) -> Option<i64> {
    let v = body.pointer(pointer)?;
    let n = if let Some(i) = v.as_i64() {
        i
    } else if let Some(f) = v.as_f64() {
        if !f.is_finite() {
            return None;
        }
        f.round() as i64
    } else if let Some(s) = v.as_str() {
        let cleaned: String = s.trim().chars().filter(|c| *c != ',' && *c != '_').collect();
        cleaned.parse::<i64>().ok()?
    } else {
        return None;
    };
    (n >= 0).then_some(n)
}
