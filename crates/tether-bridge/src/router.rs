//! Routes agent events into state updates and outbound notices.
//!
//! One router per process, driven by a single logical event stream. The
//! router never blocks on delivery problems: every outbound send goes
//! through the best-effort dispatcher and failures stay on this side of the
//! event source.

use tether_core::{current_unix_timestamp_ms, short_id, truncate_chars};
use tether_events::{
    describe_error, AgentEvent, MessagePart, SessionStatusKind, TodoStatus,
};

use crate::dispatcher::{notify_best_effort, MAX_MESSAGE_CHARS};
use crate::state::{BridgeContext, PendingPermission};

/// Tool output shorter than this is noise and produces no notice.
const TOOL_OUTPUT_NOTICE_THRESHOLD: usize = 100;
/// Tool output included in a notice is cut at this many characters.
const TOOL_OUTPUT_MAX_CHARS: usize = 1000;

/// Applies one agent event to the bridge. Notices are formatted only when
/// someone is listening (`can_notify`), and dispatched best-effort.
pub async fn handle_event(ctx: &mut BridgeContext, event: AgentEvent) {
    match event {
        AgentEvent::SessionCreated { properties } => {
            if ctx.state.active_session_id.is_none() {
                ctx.state.active_session_id = Some(properties.session_id);
            }
        }
        AgentEvent::SessionStatus { properties } => {
            let notice = if ctx.can_notify() {
                match properties.status {
                    SessionStatusKind::Retry => {
                        let detail = properties
                            .message
                            .as_deref()
                            .unwrap_or("transient provider error");
                        Some(match properties.attempt {
                            Some(attempt) => {
                                format!("⚠️ Agent retrying (attempt {attempt}): {detail}")
                            }
                            None => format!("⚠️ Agent retrying: {detail}"),
                        })
                    }
                    SessionStatusKind::Idle => Some("✅ Agent finished.".to_string()),
                    SessionStatusKind::Busy => None,
                }
            } else {
                None
            };
            ctx.state.record_status(
                &properties.session_id,
                properties.status,
                properties.attempt,
                properties.message,
            );
            if let Some(notice) = notice {
                notify(ctx, &notice).await;
            }
        }
        AgentEvent::TodoUpdated { properties } => {
            let notice = if ctx.can_notify() && !properties.todos.is_empty() {
                let done = properties
                    .todos
                    .iter()
                    .filter(|todo| todo.status == TodoStatus::Completed)
                    .count();
                let current = properties
                    .todos
                    .iter()
                    .find(|todo| todo.status == TodoStatus::InProgress);
                Some(match current {
                    Some(todo) => format!(
                        "📋 {done}/{} tasks done; working on: {}",
                        properties.todos.len(),
                        todo.content
                    ),
                    None => format!("📋 {done}/{} tasks done", properties.todos.len()),
                })
            } else {
                None
            };
            ctx.state.todos.insert(properties.session_id, properties.todos);
            if let Some(notice) = notice {
                notify(ctx, &notice).await;
            }
        }
        AgentEvent::PermissionUpdated { properties } => {
            let permission = PendingPermission {
                id: properties.id.clone(),
                session_id: properties.session_id,
                title: properties.title,
                kind: properties.kind,
                pattern: properties.pattern,
                created_at_unix_ms: current_unix_timestamp_ms(),
            };
            let notice = if ctx.can_notify() {
                let shortened = short_id(&permission.id);
                let mut line = format!("🔐 Permission requested [{shortened}]: {}", permission.title);
                if !permission.kind.is_empty() {
                    line.push_str(&format!(" ({})", permission.kind));
                }
                line.push_str(&format!(
                    "\nReply with /approve {shortened} once, always or reject"
                ));
                Some(line)
            } else {
                None
            };
            ctx.state.permissions.insert(properties.id, permission);
            if let Some(notice) = notice {
                notify(ctx, &notice).await;
            }
        }
        AgentEvent::SessionError { properties } => {
            if ctx.can_notify() {
                let notice = format!("❌ Session error: {}", describe_error(properties.error.as_ref()));
                notify(ctx, &notice).await;
            }
        }
        AgentEvent::MessageUpdated { properties } => {
            let info = properties.info;
            if info.is_assistant() && info.error.is_some() && ctx.can_notify() {
                let notice = format!("❌ Agent error: {}", describe_error(info.error.as_ref()));
                notify(ctx, &notice).await;
            }
        }
        AgentEvent::MessagePartUpdated { properties } => match properties.part {
            MessagePart::Text(part) => {
                ctx.state.accumulator.on_text_event(
                    &part.session_id,
                    &part.message_id,
                    part.delta.as_deref(),
                    part.text.as_deref(),
                );
            }
            MessagePart::Tool(part) => {
                if !ctx.can_notify() {
                    return;
                }
                if part.state.is_error() {
                    let detail = part.state.error.as_deref().unwrap_or("unknown failure");
                    let notice = format!("🛠 Tool {} failed: {detail}", part.tool);
                    notify(ctx, &notice).await;
                } else if part.state.is_finished() {
                    let output = part.state.output.as_deref().unwrap_or_default();
                    if output.chars().count() > TOOL_OUTPUT_NOTICE_THRESHOLD {
                        let notice = format!(
                            "🛠 Tool {} output:\n{}",
                            part.tool,
                            truncate_chars(output, TOOL_OUTPUT_MAX_CHARS)
                        );
                        notify(ctx, &notice).await;
                    }
                }
            }
            MessagePart::Other => {}
        },
        AgentEvent::SessionIdle { properties } => {
            let flushed = ctx
                .state
                .accumulator
                .flush(&properties.session_id, &mut ctx.state.processed);
            for message in flushed {
                if ctx.can_notify() {
                    let text = truncate_chars(&message.text, MAX_MESSAGE_CHARS);
                    notify(ctx, &text).await;
                }
            }
            let evicted = ctx.state.processed.evict_excess();
            if evicted > 0 {
                tracing::debug!(evicted, "evicted oldest processed message keys");
            }
        }
        AgentEvent::CommandExecuted { properties } => {
            if ctx.can_notify() {
                let args = properties.args.trim();
                let notice = if args.is_empty() {
                    format!("⚙️ Command executed: /{}", properties.command)
                } else {
                    format!("⚙️ Command executed: /{} {args}", properties.command)
                };
                notify(ctx, &notice).await;
            }
        }
        AgentEvent::Unknown => {}
    }
}

async fn notify(ctx: &BridgeContext, text: &str) {
    let Some(transport) = ctx.transport.as_deref() else {
        return;
    };
    let identities = ctx.bindings.identities();
    if identities.is_empty() {
        return;
    }
    notify_best_effort(transport, &identities, text).await;
}
