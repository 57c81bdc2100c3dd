//! Interprets user messages from the chat transport.
//!
//! Gate order: non-private chats are dropped silently, unbound identities
//! get a pairing prompt, then the verb dispatches against the runtime. Any
//! runtime call may fail; failures become one error reply and nothing else.

use std::sync::Arc;

use tether_access::looks_like_verification_code;
use tether_core::short_id;
use tether_events::SessionStatusKind;

use crate::contract::{AgentApi, ChatTransport, PermissionReply, SessionSummary};
use crate::dispatcher::dispatch_to_one;
use crate::state::BridgeContext;

const PAIRING_PROMPT: &str =
    "Not paired. Send the 10-character pairing code shown by the tether host to get access.";

const HELP_TEXT: &str = "Commands:
/start - check pairing
/status - bridge and session overview
/session list - list agent sessions
/session use <n or id> - switch the active session
/session new - create a session and switch to it
/approve <id> <once|always|reject> - answer a permission request
/agent cycle - cycle the active agent
/interrupt - interrupt the running session
/prompt clear - clear the prompt editor
/prompt submit - submit the prompt editor
/page <up|down|top|bottom> - scroll the transcript
/web - show the runtime web URL
/help - this reference

Anything else is forwarded to the active session as a prompt.";

/// A user message received from the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub identity: String,
    pub display_name: Option<String>,
    pub text: String,
    pub is_private: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum UserCommand {
    Start,
    Help,
    Status,
    SessionList,
    SessionUse(String),
    SessionNew,
    Approve {
        id_prefix: String,
        reply: PermissionReply,
    },
    Remote {
        label: &'static str,
        command: &'static str,
    },
    Web,
    Invalid(String),
}

/// Entry point for every inbound chat message.
pub async fn handle_incoming(ctx: &mut BridgeContext, message: &IncomingMessage) {
    if !message.is_private {
        return;
    }
    let Some(transport) = ctx.transport.clone() else {
        return;
    };
    let text = message.text.trim();
    if text.is_empty() {
        return;
    }

    if let Some(rest) = text.strip_prefix('/') {
        handle_command(ctx, transport, message, rest).await;
    } else {
        handle_free_text(ctx, transport, message, text).await;
    }
}

async fn handle_command(
    ctx: &mut BridgeContext,
    transport: Arc<dyn ChatTransport>,
    message: &IncomingMessage,
    rest: &str,
) {
    if !ctx.bindings.is_bound(&message.identity) {
        reply(transport.as_ref(), &message.identity, PAIRING_PROMPT).await;
        return;
    }

    match parse_command(rest) {
        UserCommand::Start => {
            reply(
                transport.as_ref(),
                &message.identity,
                "Paired. Send a message to prompt the agent, or /help for commands.",
            )
            .await;
        }
        UserCommand::Help => {
            reply(transport.as_ref(), &message.identity, HELP_TEXT).await;
        }
        UserCommand::Status => {
            let text = render_status(ctx);
            reply(transport.as_ref(), &message.identity, &text).await;
        }
        UserCommand::SessionList => match ctx.agent.list_sessions().await {
            Ok(sessions) => {
                let text = render_session_list(&sessions, ctx.state.active_session_id.as_deref());
                reply(transport.as_ref(), &message.identity, &text).await;
            }
            Err(error) => reply_error(transport.as_ref(), &message.identity, &error).await,
        },
        UserCommand::SessionUse(selector) => {
            let sessions = match ctx.agent.list_sessions().await {
                Ok(sessions) => sessions,
                Err(error) => {
                    reply_error(transport.as_ref(), &message.identity, &error).await;
                    return;
                }
            };
            if !ctx.bindings.is_bound(&message.identity) {
                return;
            }
            match resolve_session(&sessions, &selector) {
                Some(session) => {
                    ctx.state.active_session_id = Some(session.id.clone());
                    let text = format!("Active session: {}", short_id(&session.id));
                    reply(transport.as_ref(), &message.identity, &text).await;
                }
                None => {
                    let text = format!("No session matches '{selector}'. Try /session list.");
                    reply(transport.as_ref(), &message.identity, &text).await;
                }
            }
        }
        UserCommand::SessionNew => match ctx.agent.create_session().await {
            Ok(session) => {
                if !ctx.bindings.is_bound(&message.identity) {
                    return;
                }
                ctx.state.active_session_id = Some(session.id.clone());
                let text = format!("Created session {}", short_id(&session.id));
                reply(transport.as_ref(), &message.identity, &text).await;
            }
            Err(error) => reply_error(transport.as_ref(), &message.identity, &error).await,
        },
        UserCommand::Approve { id_prefix, reply: decision } => {
            let Some(permission) = ctx.state.resolve_permission(&id_prefix).cloned() else {
                let text = format!("No pending permission matches '{id_prefix}'.");
                reply(transport.as_ref(), &message.identity, &text).await;
                return;
            };
            match ctx
                .agent
                .respond_permission(&permission.session_id, &permission.id, decision)
                .await
            {
                Ok(()) => {
                    ctx.state.permissions.remove(&permission.id);
                    let text = format!(
                        "Permission {} answered: {}",
                        short_id(&permission.id),
                        decision.as_str()
                    );
                    reply(transport.as_ref(), &message.identity, &text).await;
                }
                Err(error) => reply_error(transport.as_ref(), &message.identity, &error).await,
            }
        }
        UserCommand::Remote { label, command } => {
            match ctx.agent.execute_command(command).await {
                Ok(()) => {
                    let text = format!("Sent {label}.");
                    reply(transport.as_ref(), &message.identity, &text).await;
                }
                Err(error) => reply_error(transport.as_ref(), &message.identity, &error).await,
            }
        }
        UserCommand::Web => match ctx.agent.server_url() {
            Some(url) => reply(transport.as_ref(), &message.identity, &url).await,
            None => {
                reply(
                    transport.as_ref(),
                    &message.identity,
                    "Runtime URL is not available.",
                )
                .await;
            }
        },
        UserCommand::Invalid(usage) => {
            reply(transport.as_ref(), &message.identity, &usage).await;
        }
    }
}

async fn handle_free_text(
    ctx: &mut BridgeContext,
    transport: Arc<dyn ChatTransport>,
    message: &IncomingMessage,
    text: &str,
) {
    if !ctx.bindings.is_bound(&message.identity) {
        if looks_like_verification_code(text) {
            if ctx.bindings.validate_code(text) {
                ctx.bindings
                    .add_binding(&message.identity, message.display_name.as_deref());
                reply(
                    transport.as_ref(),
                    &message.identity,
                    "Paired. Send a message to prompt the agent, or /help for commands.",
                )
                .await;
            } else {
                reply(
                    transport.as_ref(),
                    &message.identity,
                    "That code is invalid or expired. Ask the tether host for a fresh one.",
                )
                .await;
            }
        } else {
            reply(transport.as_ref(), &message.identity, PAIRING_PROMPT).await;
        }
        return;
    }

    let session_id = match ctx.state.active_session_id.clone() {
        Some(session_id) => session_id,
        None => match ctx.agent.create_session().await {
            Ok(session) => {
                // The binding could have been removed while we were waiting
                // on the runtime; re-check before adopting state for it.
                if !ctx.bindings.is_bound(&message.identity) {
                    return;
                }
                ctx.state.active_session_id = Some(session.id.clone());
                session.id
            }
            Err(error) => {
                reply_error(transport.as_ref(), &message.identity, &error).await;
                return;
            }
        },
    };

    if let Err(error) = ctx.agent.submit_prompt(&session_id, text).await {
        reply_error(transport.as_ref(), &message.identity, &error).await;
    }
}

fn parse_command(rest: &str) -> UserCommand {
    let tokens: Vec<&str> = rest.split_whitespace().collect();
    let Some(&verb) = tokens.first() else {
        return UserCommand::Invalid(HELP_TEXT.to_string());
    };
    match verb {
        "start" => UserCommand::Start,
        "help" => UserCommand::Help,
        "status" => UserCommand::Status,
        "session" => match tokens.get(1).copied() {
            Some("list") => UserCommand::SessionList,
            Some("use") => match tokens.get(2) {
                Some(selector) => UserCommand::SessionUse((*selector).to_string()),
                None => UserCommand::Invalid(
                    "usage: /session use <number or id prefix>".to_string(),
                ),
            },
            Some("new") => UserCommand::SessionNew,
            _ => UserCommand::Invalid("usage: /session <list|use <id>|new>".to_string()),
        },
        "approve" => match (tokens.get(1), tokens.get(2)) {
            (Some(id_prefix), Some(decision)) => match PermissionReply::parse(decision) {
                Some(reply) => UserCommand::Approve {
                    id_prefix: (*id_prefix).to_string(),
                    reply,
                },
                None => {
                    UserCommand::Invalid("usage: /approve <id> <once|always|reject>".to_string())
                }
            },
            _ => UserCommand::Invalid("usage: /approve <id> <once|always|reject>".to_string()),
        },
        "agent" => match tokens.get(1).copied() {
            Some("cycle") => UserCommand::Remote {
                label: "agent cycle",
                command: "agent_cycle",
            },
            _ => UserCommand::Invalid("usage: /agent cycle".to_string()),
        },
        "interrupt" => UserCommand::Remote {
            label: "interrupt",
            command: "session_interrupt",
        },
        "prompt" => match tokens.get(1).copied() {
            Some("clear") => UserCommand::Remote {
                label: "prompt clear",
                command: "prompt_clear",
            },
            Some("submit") => UserCommand::Remote {
                label: "prompt submit",
                command: "prompt_submit",
            },
            _ => UserCommand::Invalid("usage: /prompt <clear|submit>".to_string()),
        },
        "page" => match tokens.get(1).copied() {
            Some("up") => UserCommand::Remote {
                label: "page up",
                command: "messages_page_up",
            },
            Some("down") => UserCommand::Remote {
                label: "page down",
                command: "messages_page_down",
            },
            Some("top") => UserCommand::Remote {
                label: "page top",
                command: "messages_first",
            },
            Some("bottom") => UserCommand::Remote {
                label: "page bottom",
                command: "messages_last",
            },
            _ => UserCommand::Invalid("usage: /page <up|down|top|bottom>".to_string()),
        },
        "web" => UserCommand::Web,
        other => UserCommand::Invalid(format!("Unknown command '/{other}'. See /help.")),
    }
}

fn render_status(ctx: &BridgeContext) -> String {
    let mut lines = vec![format!(
        "runtime: {}",
        if ctx.state.connected {
            "connected"
        } else {
            "disconnected"
        }
    )];
    match ctx.state.active_session_id.as_deref() {
        Some(session_id) => lines.push(format!("session: {}", short_id(session_id))),
        None => lines.push("session: none".to_string()),
    }
    if let Some(snapshot) = &ctx.state.status {
        let label = match snapshot.status {
            SessionStatusKind::Busy => "busy",
            SessionStatusKind::Idle => "idle",
            SessionStatusKind::Retry => "retrying",
        };
        match snapshot.message.as_deref() {
            Some(message) => lines.push(format!("status: {label} ({message})")),
            None => lines.push(format!("status: {label}")),
        }
    }
    if let Some((done, total)) = ctx.state.todo_fraction() {
        lines.push(format!("todos: {done}/{total} done"));
    }
    if !ctx.state.permissions.is_empty() {
        lines.push(format!(
            "pending permissions: {}",
            ctx.state.permissions.len()
        ));
    }
    lines.join("\n")
}

fn render_session_list(sessions: &[SessionSummary], active: Option<&str>) -> String {
    if sessions.is_empty() {
        return "No sessions. Use /session new to create one.".to_string();
    }
    let mut lines = Vec::with_capacity(sessions.len());
    for (index, session) in sessions.iter().enumerate() {
        let marker = if active == Some(session.id.as_str()) {
            "*"
        } else {
            " "
        };
        let title = session.title.as_deref().unwrap_or("(untitled)");
        lines.push(format!(
            "{marker}{}. {} {title}",
            index + 1,
            short_id(&session.id)
        ));
    }
    lines.join("\n")
}

/// Resolves a session by 1-based index, exact id, or case-insensitive id
/// prefix; with several prefix matches the lexicographically smallest id
/// wins.
fn resolve_session<'a>(
    sessions: &'a [SessionSummary],
    selector: &str,
) -> Option<&'a SessionSummary> {
    if let Ok(index) = selector.parse::<usize>() {
        if index >= 1 {
            return sessions.get(index - 1);
        }
        return None;
    }
    let needle = selector.to_ascii_lowercase();
    let mut matches: Vec<&SessionSummary> = sessions
        .iter()
        .filter(|session| session.id.to_ascii_lowercase().starts_with(&needle))
        .collect();
    matches.sort_by(|left, right| left.id.cmp(&right.id));
    matches.first().copied()
}

async fn reply(transport: &dyn ChatTransport, identity: &str, text: &str) {
    if !dispatch_to_one(transport, identity, text).await {
        tracing::warn!(identity, "reply delivery failed");
    }
}

async fn reply_error(transport: &dyn ChatTransport, identity: &str, error: &anyhow::Error) {
    let text = format!("❌ Request failed: {error:#}");
    reply(transport, identity, &text).await;
}
