//! Discord channel messaging via the REST API.
//!
//! One embed per message, bot-token auth. Transient failures (rate limits,
//! server errors, connection drops) are retried with capped exponential
//! backoff plus jitter before being reported as a `DeliveryError`; an
//! unknown-channel response short-circuits to `SendOutcome::ChannelGone`.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::config::DiscordConfig;
use crate::error::DeliveryError;
use crate::messaging::{Messenger, SendOutcome, TrackEmbed};
use crate::model::ChannelId;

const API_BASE: &str = "https://discord.com/api/v10";

/// Discord JSON error code for "Unknown Channel".
const UNKNOWN_CHANNEL_CODE: u64 = 10003;

pub struct DiscordMessenger {
    bot_token: SecretString,
    client: reqwest::Client,
    max_retries: u8,
}

impl DiscordMessenger {
    pub fn new(config: DiscordConfig) -> Self {
        Self {
            bot_token: config.bot_token,
            client: reqwest::Client::new(),
            max_retries: 3,
        }
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    fn backoff(attempt: u8) -> Duration {
        let base = 500u64 << attempt.min(6);
        let jitter = rand::thread_rng().gen_range(0..=base / 2);
        Duration::from_millis(base + jitter)
    }
}

#[async_trait]
impl Messenger for DiscordMessenger {
    async fn send(
        &self,
        channel: ChannelId,
        embed: &TrackEmbed,
    ) -> Result<SendOutcome, DeliveryError> {
        let url = format!("{API_BASE}/channels/{channel}/messages");
        let body = serde_json::json!({ "embeds": [embed] });

        let mut attempt: u8 = 0;
        loop {
            let result = self
                .client
                .post(&url)
                .header(
                    "Authorization",
                    format!("Bot {}", self.bot_token.expose_secret()),
                )
                .json(&body)
                .send()
                .await;

            let retryable_reason = match result {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(SendOutcome::Delivered);
                    }
                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Ok(SendOutcome::ChannelGone);
                    }
                    let code = response
                        .json::<serde_json::Value>()
                        .await
                        .ok()
                        .and_then(|v| v.get("code").and_then(|c| c.as_u64()));
                    if code == Some(UNKNOWN_CHANNEL_CODE) {
                        return Ok(SendOutcome::ChannelGone);
                    }
                    if status.as_u16() == 429 || status.is_server_error() {
                        format!("HTTP {status}")
                    } else {
                        return Err(DeliveryError {
                            channel_id: channel.0,
                            reason: format!("HTTP {status}"),
                        });
                    }
                }
                Err(e) => e.to_string(),
            };

            if attempt >= self.max_retries {
                return Err(DeliveryError {
                    channel_id: channel.0,
                    reason: retryable_reason,
                });
            }
            warn!(%channel, attempt, reason = %retryable_reason, "Send failed; retrying");
            tokio::time::sleep(Self::backoff(attempt)).await;
            attempt += 1;
        }
    }

    async fn channel_exists(&self, channel: ChannelId) -> Result<bool, DeliveryError> {
        let url = format!("{API_BASE}/channels/{channel}");
        let response = self
            .client
            .get(&url)
            .header(
                "Authorization",
                format!("Bot {}", self.bot_token.expose_secret()),
            )
            .send()
            .await
            .map_err(|e| DeliveryError {
                channel_id: channel.0,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        let code = response
            .json::<serde_json::Value>()
            .await
            .ok()
            .and_then(|v| v.get("code").and_then(|c| c.as_u64()));
        if code == Some(UNKNOWN_CHANNEL_CODE) {
            return Ok(false);
        }
        Err(DeliveryError {
            channel_id: channel.0,
            reason: format!("HTTP {status}"),
        })
    }
}
