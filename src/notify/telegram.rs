// =============================================================================
// Telegram Notifier — one bot per delivery channel
// =============================================================================
//
// Each configured channel name maps to a bot token.  A user's alerts go out
// through the bot their settings name, via the Bot API `sendMessage` method
// with Markdown parse mode.
//
// SECURITY: bot tokens are part of the request path and are never logged.
// =============================================================================

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, instrument};

use super::NotificationSink;
use crate::types::UserId;

const TELEGRAM_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: UserId,
    text: &'a str,
    parse_mode: &'static str,
}

/// Sends alerts through named Telegram bots.
#[derive(Clone)]
pub struct TelegramNotifier {
    tokens: HashMap<String, String>,
    api_base: String,
    client: reqwest::Client,
}

impl TelegramNotifier {
    /// Build a notifier over `channel name → bot token`.
    pub fn new(tokens: HashMap<String, String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client for TelegramNotifier");

        Self {
            tokens,
            api_base: TELEGRAM_API_BASE.to_string(),
            client,
        }
    }

    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.tokens.keys().map(String::as_str)
    }

    fn send_message_url(&self, channel: &str) -> Result<String> {
        let token = self
            .tokens
            .get(channel)
            .with_context(|| format!("no bot configured for channel '{channel}'"))?;
        Ok(format!("{}/bot{}/sendMessage", self.api_base, token))
    }
}

#[async_trait]
impl NotificationSink for TelegramNotifier {
    #[instrument(skip(self, text), name = "telegram::send")]
    async fn send(&self, user_id: UserId, channel: &str, text: &str) -> Result<()> {
        let url = self.send_message_url(channel)?;
        let payload = SendMessage {
            chat_id: user_id,
            text,
            parse_mode: "Markdown",
        };

        let resp = self
            .client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("sendMessage via '{channel}' failed"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse sendMessage response")?;

        if !status.is_success() || body["ok"].as_bool() != Some(true) {
            anyhow::bail!(
                "Telegram sendMessage via '{}' returned {}: {}",
                channel,
                status,
                body["description"].as_str().unwrap_or("no description")
            );
        }

        debug!(user_id, channel, "alert delivered");
        Ok(())
    }
}

impl std::fmt::Debug for TelegramNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramNotifier")
            .field("channels", &self.tokens.keys().collect::<Vec<_>>())
            .field("tokens", &"<redacted>")
            .finish()
    }
}
