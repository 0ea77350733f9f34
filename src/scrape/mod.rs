pub mod http;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::GameRef;

pub use http::JsonCcuScraper;

/// Source of a game's current CCU reading.
#[async_trait]
pub trait CcuScraper: Send + Sync {
    /// `Ok(None)` means the reading could not be determined; `Err` is a fetch failure.
    async fn scrape_current_ccu(&self, game: &GameRef) -> Result<Option<i64>>;

    /// True if the scraper already applies the retry policy per request,
    /// in which case the sampler calls it exactly once per item.
    fn retries_internally(&self) -> bool {
        false
    }
}
