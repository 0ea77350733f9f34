//! Anomaly notification: message rendering, the outbound channel, and the
//! exactly-once delivery pass over the anomaly ledger.

pub mod notifier;
pub mod telegram;
pub mod template;

use async_trait::async_trait;

pub use notifier::Notifier;
pub use telegram::TelegramChannel;

/// Outbound messaging channel.
#[async_trait]
pub trait MessageChannel: Send + Sync {
    /// Send one message. Ordinary delivery failures are reported as `false`,
    /// never as a panic or error.
    async fn deliver(&self, text: &str) -> bool;

    /// Human-readable name for logs (e.g. "telegram").
    fn channel_name(&self) -> &str;
}
