use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use tether_bridge::{ChatTransport, IncomingMessage};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Telegram Bot API client used both as the outbound transport and as the
/// inbound long-poll source.
pub struct TelegramClient {
    http: reqwest::Client,
    api_base: String,
    token: String,
}

impl TelegramClient {
    /// `request_timeout_ms` must exceed the long-poll window passed to
    /// [`TelegramClient::poll_updates`] or every poll times out client-side.
    pub fn new(token: &str, api_base: &str, request_timeout_ms: u64) -> Result<Self> {
        let token = token.trim();
        if token.is_empty() {
            bail!("telegram bot token cannot be empty");
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to build telegram http client")?;
        Ok(Self {
            http,
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    /// Long-polls `getUpdates`, advancing `offset` past every update seen so
    /// Telegram stops re-delivering them.
    pub async fn poll_updates(
        &self,
        offset: &mut u64,
        timeout_seconds: u64,
    ) -> Result<Vec<IncomingMessage>> {
        let response = self
            .http
            .get(self.method_url("getUpdates"))
            .query(&[
                ("timeout", timeout_seconds.to_string()),
                ("offset", offset.to_string()),
            ])
            .send()
            .await
            .context("telegram getUpdates request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("telegram getUpdates returned {status}");
        }
        let payload = response
            .json::<Value>()
            .await
            .context("telegram getUpdates response was not JSON")?;
        let updates = payload
            .get("result")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("telegram getUpdates response missing result[]"))?;

        let mut messages = Vec::new();
        for update in updates {
            if let Some(update_id) = update.get("update_id").and_then(Value::as_u64) {
                *offset = (*offset).max(update_id.saturating_add(1));
            }
            match parse_update_message(update) {
                Some(message) => messages.push(message),
                None => tracing::debug!("skipping non-text telegram update"),
            }
        }
        Ok(messages)
    }
}

fn parse_update_message(update: &Value) -> Option<IncomingMessage> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?.to_string();
    let chat = message.get("chat")?;
    let chat_id = chat.get("id").and_then(Value::as_i64)?;
    let is_private = chat.get("type").and_then(Value::as_str) == Some("private");
    let display_name = message
        .get("from")
        .and_then(|from| {
            from.get("username")
                .or_else(|| from.get("first_name"))
                .and_then(Value::as_str)
        })
        .map(str::to_string);
    Some(IncomingMessage {
        identity: chat_id.to_string(),
        display_name,
        text,
        is_private,
    })
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_text(&self, identity: &str, text: &str) -> Result<String> {
        let response = self
            .http
            .post(self.method_url("sendMessage"))
            .json(&json!({"chat_id": identity, "text": text}))
            .send()
            .await
            .context("telegram sendMessage request failed")?;
        let status = response.status();
        if !status.is_success() {
            bail!("telegram sendMessage returned {status}");
        }
        let payload = response
            .json::<Value>()
            .await
            .context("telegram sendMessage response was not JSON")?;
        if payload.get("ok").and_then(Value::as_bool) != Some(true) {
            bail!(
                "telegram sendMessage was not ok: {}",
                payload
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or("no description")
            );
        }
        let message_id = payload
            .get("result")
            .and_then(|result| result.get("message_id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| anyhow!("telegram sendMessage response missing message_id"))?;
        Ok(message_id.to_string())
    }
}
