//! Boundary contracts between the bridge core and its collaborators.
//!
//! The transport owns message delivery; the agent client owns the runtime
//! control API. The core never talks HTTP directly.

use anyhow::Result;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub id: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A user's answer to a pending permission request.
pub enum PermissionReply {
    Once,
    Always,
    Reject,
}

impl PermissionReply {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Once => "once",
            Self::Always => "always",
            Self::Reject => "reject",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "once" => Some(Self::Once),
            "always" => Some(Self::Always),
            "reject" => Some(Self::Reject),
            _ => None,
        }
    }
}

#[async_trait]
/// Outbound chat boundary. One message in, one transport message id out.
pub trait ChatTransport: Send + Sync {
    async fn send_text(&self, identity: &str, text: &str) -> Result<String>;
}

#[async_trait]
/// Control operations the bridge issues against the agent runtime. Prompt
/// submission is fire-and-forget; results arrive on the event feed.
pub trait AgentApi: Send + Sync {
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>>;
    async fn create_session(&self) -> Result<SessionSummary>;
    async fn submit_prompt(&self, session_id: &str, text: &str) -> Result<()>;
    async fn respond_permission(
        &self,
        session_id: &str,
        permission_id: &str,
        reply: PermissionReply,
    ) -> Result<()>;
    async fn execute_command(&self, command: &str) -> Result<()>;
    fn server_url(&self) -> Option<String>;
}
