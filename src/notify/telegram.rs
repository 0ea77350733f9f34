//! Telegram Bot API delivery channel (`sendMessage`, plain text).

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{AppError, Result};
use crate::notify::MessageChannel;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[derive(Debug)]
pub struct TelegramChannel {
    bot_token: String,
    chat_id: String,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramChannel {
    /// Returns [`AppError::Config`] if either credential is empty.
    pub fn new(bot_token: String, chat_id: String, timeout: Duration) -> Result<Self> {
        if bot_token.trim().is_empty() {
            return Err(AppError::Config("Telegram bot token must not be empty".to_string()));
        }
        if chat_id.trim().is_empty() {
            return Err(AppError::Config("Telegram chat id must not be empty".to_string()));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            bot_token,
            chat_id,
            api_base: TELEGRAM_API.to_string(),
            client,
        })
    }

    /// Point at a different Bot API host (self-hosted server or a test double).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn send_url(&self) -> String {
        format!("{}/bot{}/sendMessage", self.api_base, self.bot_token)
    }

    async fn send(&self, text: &str) -> Result<()> {
        let body = serde_json::json!({
            "chat_id": self.chat_id,
            "text": text,
            "disable_web_page_preview": true,
        });

        let response = self.client.post(self.send_url()).json(&body).send().await?;
        let status = response.status();
        let resp_body: serde_json::Value = response.json().await?;

        if resp_body.get("ok") == Some(&serde_json::Value::Bool(true)) {
            return Ok(());
        }

        let description = resp_body
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown Telegram API error");

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp_body
                .get("parameters")
                .and_then(|p| p.get("retry_after"))
                .and_then(|v| v.as_u64())
                .unwrap_or(30);
            return Err(AppError::Delivery(format!(
                "rate limited, retry after {retry_after}s: {description}"
            )));
        }

        Err(AppError::Delivery(format!("HTTP {status}: {description}")))
    }
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    async fn deliver(&self, text: &str) -> bool {
        debug!(chat_id = %self.chat_id, chars = text.chars().count(), "Sending Telegram message");
        match self.send(text).await {
            Ok(()) => {
                info!(chat_id = %self.chat_id, "Telegram message sent");
                true
            }
            Err(e) => {
                warn!(chat_id = %self.chat_id, "Telegram delivery failed: {e}");
                false
            }
        }
    }

    fn channel_name(&self) -> &str {
        "telegram"
    }
}
