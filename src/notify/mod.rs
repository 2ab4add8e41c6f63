// =============================================================================
// Notification delivery
// =============================================================================
//
// The monitoring engine hands finished alert texts to a `NotificationSink`
// together with the user's channel selector.  Delivery is fire-and-forget:
// failures come back as errors which the caller logs and drops.

pub mod telegram;

pub use telegram::TelegramNotifier;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::UserId;

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `text` to `user_id` through the channel named `channel`.
    async fn send(&self, user_id: UserId, channel: &str, text: &str) -> Result<()>;
}
