//! services/api/src/adapters/telegram.rs
//!
//! `NotificationGateway` over the Telegram Bot HTTP API.

use async_trait::async_trait;
use hbd_core::ports::{NotificationGateway, PortError, PortResult};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TelegramGateway {
    client: reqwest::Client,
    api_base: String,
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

impl TelegramGateway {
    pub fn new(api_base: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            api_base: api_base.into(),
        })
    }
}

#[async_trait]
impl NotificationGateway for TelegramGateway {
    async fn send_message(&self, bot_token: &str, chat_id: &str, text: &str) -> PortResult<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_base, bot_token);
        // The URL embeds the bot token, so errors are reported without it.
        let response = self
            .client
            .post(&url)
            .json(&SendMessage { chat_id, text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PortError::Unexpected("Telegram request timed out".to_string())
                } else {
                    PortError::Unexpected(format!("Telegram request failed: {}", e.without_url()))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PortError::Unexpected(format!(
                "Telegram returned HTTP {}: {}",
                status, body
            )));
        }
        debug!("Delivered Telegram message");
        Ok(())
    }
}
