use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::error::{Error, Result};
use crate::notify::{Messenger, UserHandle};

/// Discord REST messenger. Opens a DM channel per delivery and posts the
/// message into it; no gateway session is held.
#[derive(Debug, Clone)]
pub struct DiscordMessenger {
    client: Client,
    api_base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct DmChannel {
    id: String,
}

impl DiscordMessenger {
    pub fn new(api_base: impl Into<String>, token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.token)
    }
}

#[async_trait]
impl Messenger for DiscordMessenger {
    async fn resolve_user(&self, user_id: &str) -> Result<UserHandle> {
        let url = format!("{}/users/@me/channels", self.api_base);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&json!({ "recipient_id": user_id }))
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("DM channel request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Delivery(format!(
                "Could not open DM channel for user {}: HTTP {}",
                user_id,
                response.status().as_u16()
            )));
        }

        let channel: DmChannel = response
            .json()
            .await
            .map_err(|e| Error::Delivery(format!("Malformed DM channel response: {}", e)))?;

        debug!("Resolved user {} to DM channel {}", user_id, channel.id);
        Ok(UserHandle {
            channel_id: channel.id,
        })
    }

    async fn send(&self, handle: &UserHandle, text: &str) -> Result<()> {
        let url = format!("{}/channels/{}/messages", self.api_base, handle.channel_id);
        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&json!({ "content": text }))
            .send()
            .await
            .map_err(|e| Error::Delivery(format!("Message request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Delivery(format!(
                "Message to channel {} rejected: HTTP {}",
                handle.channel_id,
                response.status().as_u16()
            )));
        }

        Ok(())
    }
}
