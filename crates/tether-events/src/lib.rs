//! Typed model of the agent runtime's event feed.
//!
//! The runtime emits a firehose of JSON events, each shaped
//! `{"type": "<kind>", "properties": {...}}` with a kind-specific payload.
//! This crate models the feed as a tag-discriminated sum type so the router
//! matches exhaustively and unhandled kinds surface at compile time. Kinds
//! the bridge does not understand deserialize to [`AgentEvent::Unknown`]
//! instead of failing the stream.

use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "session.created")]
    SessionCreated { properties: SessionCreatedProperties },
    #[serde(rename = "session.status")]
    SessionStatus { properties: SessionStatusProperties },
    #[serde(rename = "todo.updated")]
    TodoUpdated { properties: TodoUpdatedProperties },
    #[serde(rename = "permission.updated")]
    PermissionUpdated { properties: PermissionProperties },
    #[serde(rename = "session.error")]
    SessionError { properties: SessionErrorProperties },
    #[serde(rename = "message.updated")]
    MessageUpdated { properties: MessageUpdatedProperties },
    #[serde(rename = "message.part.updated")]
    MessagePartUpdated { properties: MessagePartProperties },
    #[serde(rename = "session.idle")]
    SessionIdle { properties: SessionIdleProperties },
    #[serde(rename = "command.executed")]
    CommandExecuted { properties: CommandExecutedProperties },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionCreatedProperties {
    #[serde(alias = "sessionID")]
    pub session_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatusKind {
    Busy,
    Idle,
    Retry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionStatusProperties {
    #[serde(alias = "sessionID")]
    pub session_id: String,
    pub status: SessionStatusKind,
    #[serde(default)]
    pub attempt: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TodoUpdatedProperties {
    #[serde(alias = "sessionID")]
    pub session_id: String,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    #[serde(default)]
    pub priority: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PermissionProperties {
    pub id: String,
    #[serde(alias = "sessionID")]
    pub session_id: String,
    pub title: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub pattern: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionErrorProperties {
    #[serde(default, alias = "sessionID")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

/// Error payload attached to session and message events. Fields vary per
/// error kind; [`ErrorDetail::best_message`] picks the most specific one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl ErrorDetail {
    /// Most specific human-readable message: `message`, then `data.message`,
    /// then the error-kind name, then a fixed fallback.
    pub fn best_message(&self) -> String {
        if let Some(message) = non_empty(self.message.as_deref()) {
            return message.to_string();
        }
        if let Some(message) = non_empty(
            self.data
                .as_ref()
                .and_then(|data| data.get("message"))
                .and_then(Value::as_str),
        ) {
            return message.to_string();
        }
        if let Some(name) = non_empty(self.name.as_deref()) {
            return name.to_string();
        }
        "Unknown error".to_string()
    }
}

/// Renders an optional error payload with the same field precedence.
pub fn describe_error(error: Option<&ErrorDetail>) -> String {
    error
        .map(ErrorDetail::best_message)
        .unwrap_or_else(|| "Unknown error".to_string())
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageUpdatedProperties {
    pub info: MessageInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageInfo {
    pub id: String,
    #[serde(alias = "sessionID")]
    pub session_id: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub error: Option<ErrorDetail>,
}

impl MessageInfo {
    pub fn is_assistant(&self) -> bool {
        self.role.as_deref() == Some("assistant")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagePartProperties {
    pub part: MessagePart,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum MessagePart {
    #[serde(rename = "text")]
    Text(TextPart),
    #[serde(rename = "tool")]
    Tool(ToolPart),
    #[serde(other)]
    Other,
}

/// Streamed text belonging to one assistant message. Carries either an
/// incremental `delta` or a whole-message `text` snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct TextPart {
    #[serde(alias = "sessionID")]
    pub session_id: String,
    #[serde(alias = "messageID")]
    pub message_id: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub delta: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolPart {
    #[serde(alias = "sessionID")]
    pub session_id: String,
    #[serde(default)]
    pub tool: String,
    pub state: ToolState,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ToolState {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ToolState {
    pub fn is_error(&self) -> bool {
        self.status == "error"
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "done")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionIdleProperties {
    #[serde(alias = "sessionID")]
    pub session_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandExecutedProperties {
    pub command: String,
    #[serde(default, alias = "arguments")]
    pub args: String,
}
