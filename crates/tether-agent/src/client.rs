//! reqwest-backed implementation of the runtime control API.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tether_bridge::{AgentApi, PermissionReply, SessionSummary};
use tether_core::truncate_chars;

const ERROR_BODY_MAX_CHARS: usize = 300;

#[derive(Debug, Clone, Deserialize)]
struct SessionPayload {
    id: String,
    #[serde(default)]
    title: Option<String>,
}

impl From<SessionPayload> for SessionSummary {
    fn from(payload: SessionPayload) -> Self {
        Self {
            id: payload.id,
            title: payload.title,
        }
    }
}

/// Client for the agent runtime's HTTP API. Prompt submission is
/// fire-and-forget: results arrive on the event feed, never as a response
/// body.
pub struct AgentHttpClient {
    http: reqwest::Client,
    base_url: String,
}

impl AgentHttpClient {
    pub fn new(base_url: &str, request_timeout_ms: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(request_timeout_ms.max(1)))
            .build()
            .context("failed to build agent http client")?;
        Ok(Self {
            http,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn expect_success(
        response: reqwest::Response,
        operation: &str,
    ) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        bail!(
            "{operation} returned {status}: {}",
            truncate_chars(body.trim(), ERROR_BODY_MAX_CHARS)
        );
    }
}

#[async_trait]
impl AgentApi for AgentHttpClient {
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        let response = self
            .http
            .get(self.url("/session"))
            .send()
            .await
            .context("session list request failed")?;
        let response = Self::expect_success(response, "session list").await?;
        let sessions = response
            .json::<Vec<SessionPayload>>()
            .await
            .context("session list response was not valid JSON")?;
        Ok(sessions.into_iter().map(SessionSummary::from).collect())
    }

    async fn create_session(&self) -> Result<SessionSummary> {
        let response = self
            .http
            .post(self.url("/session"))
            .json(&json!({}))
            .send()
            .await
            .context("session create request failed")?;
        let response = Self::expect_success(response, "session create").await?;
        let session = response
            .json::<SessionPayload>()
            .await
            .context("session create response was not valid JSON")?;
        Ok(session.into())
    }

    async fn submit_prompt(&self, session_id: &str, text: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!("/session/{session_id}/prompt_async")))
            .json(&json!({
                "parts": [{"type": "text", "text": text}]
            }))
            .send()
            .await
            .context("prompt submission failed")?;
        Self::expect_success(response, "prompt submission").await?;
        Ok(())
    }

    async fn respond_permission(
        &self,
        session_id: &str,
        permission_id: &str,
        reply: PermissionReply,
    ) -> Result<()> {
        let response = self
            .http
            .post(self.url(&format!(
                "/session/{session_id}/permissions/{permission_id}"
            )))
            .json(&json!({"response": reply.as_str()}))
            .send()
            .await
            .context("permission decision failed")?;
        Self::expect_success(response, "permission decision").await?;
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> Result<()> {
        let response = self
            .http
            .post(self.url("/tui/execute-command"))
            .json(&json!({"command": command}))
            .send()
            .await
            .context("remote command failed")?;
        Self::expect_success(response, "remote command").await?;
        Ok(())
    }

    fn server_url(&self) -> Option<String> {
        Some(self.base_url.clone())
    }
}
