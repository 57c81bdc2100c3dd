//! Behavior tests for the bridge core against recording fakes.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::json;
use tempfile::tempdir;
use tether_access::BindingStore;
use tether_events::AgentEvent;

use crate::commands::{handle_incoming, IncomingMessage};
use crate::contract::{AgentApi, ChatTransport, PermissionReply, SessionSummary};
use crate::router::handle_event;
use crate::state::BridgeContext;

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<(String, String)>>,
    fail_for: Option<String>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().expect("transport lock").clone()
    }

    fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|(_, text)| text).collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, identity: &str, text: &str) -> Result<String> {
        if self.fail_for.as_deref() == Some(identity) {
            return Err(anyhow!("transport unavailable"));
        }
        let mut sent = self.sent.lock().expect("transport lock");
        sent.push((identity.to_string(), text.to_string()));
        Ok(format!("m{}", sent.len()))
    }
}

#[derive(Default)]
struct StubAgent {
    sessions: Mutex<Vec<SessionSummary>>,
    created: AtomicUsize,
    prompts: Mutex<Vec<(String, String)>>,
    permission_replies: Mutex<Vec<(String, String, &'static str)>>,
    commands: Mutex<Vec<String>>,
    fail_prompts: bool,
}

#[async_trait]
impl AgentApi for StubAgent {
    async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        Ok(self.sessions.lock().expect("agent lock").clone())
    }

    async fn create_session(&self) -> Result<SessionSummary> {
        let index = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let session = SessionSummary {
            id: format!("ses_new_{index}"),
            title: None,
        };
        self.sessions
            .lock()
            .expect("agent lock")
            .push(session.clone());
        Ok(session)
    }

    async fn submit_prompt(&self, session_id: &str, text: &str) -> Result<()> {
        if self.fail_prompts {
            return Err(anyhow!("runtime rejected the prompt"));
        }
        self.prompts
            .lock()
            .expect("agent lock")
            .push((session_id.to_string(), text.to_string()));
        Ok(())
    }

    async fn respond_permission(
        &self,
        session_id: &str,
        permission_id: &str,
        reply: PermissionReply,
    ) -> Result<()> {
        self.permission_replies.lock().expect("agent lock").push((
            session_id.to_string(),
            permission_id.to_string(),
            reply.as_str(),
        ));
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> Result<()> {
        self.commands
            .lock()
            .expect("agent lock")
            .push(command.to_string());
        Ok(())
    }

    fn server_url(&self) -> Option<String> {
        Some("http://127.0.0.1:4096".to_string())
    }
}

struct Fixture {
    ctx: BridgeContext,
    transport: Arc<RecordingTransport>,
    agent: Arc<StubAgent>,
    _tempdir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    fixture_with(RecordingTransport::default(), StubAgent::default())
}

fn fixture_with(transport: RecordingTransport, agent: StubAgent) -> Fixture {
    let tempdir = tempdir().expect("tempdir");
    let bindings = BindingStore::open(tempdir.path().join("bindings.json"));
    let transport = Arc::new(transport);
    let agent = Arc::new(agent);
    let ctx = BridgeContext::new(bindings, agent.clone(), Some(transport.clone()));
    Fixture {
        ctx,
        transport,
        agent,
        _tempdir: tempdir,
    }
}

fn event(value: serde_json::Value) -> AgentEvent {
    serde_json::from_value(value).expect("event parses")
}

fn text_part(session: &str, message: &str, delta: &str) -> AgentEvent {
    event(json!({
        "type": "message.part.updated",
        "properties": {"part": {
            "type": "text",
            "sessionID": session,
            "messageID": message,
            "delta": delta
        }}
    }))
}

fn idle(session: &str) -> AgentEvent {
    event(json!({
        "type": "session.idle",
        "properties": {"sessionID": session}
    }))
}

fn private_message(identity: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        identity: identity.to_string(),
        display_name: Some("alice".to_string()),
        text: text.to_string(),
        is_private: true,
    }
}

#[tokio::test]
async fn integration_text_deltas_flush_exactly_once_on_idle() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", Some("alice"));

    handle_event(&mut fixture.ctx, text_part("ses_1", "msg_1", "hello ")).await;
    handle_event(&mut fixture.ctx, text_part("ses_1", "msg_1", "world")).await;
    handle_event(&mut fixture.ctx, idle("ses_1")).await;
    assert_eq!(fixture.transport.texts(), vec!["hello world".to_string()]);

    // A replayed idle signal must not re-send the message.
    handle_event(&mut fixture.ctx, idle("ses_1")).await;
    assert_eq!(fixture.transport.sent().len(), 1);
}

#[tokio::test]
async fn integration_notices_are_suppressed_with_no_bound_identities() {
    let mut fixture = fixture();

    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "session.error",
            "properties": {"error": {"message": "boom"}}
        })),
    )
    .await;
    handle_event(&mut fixture.ctx, text_part("ses_1", "msg_1", "quiet")).await;
    handle_event(&mut fixture.ctx, idle("ses_1")).await;
    assert!(fixture.transport.sent().is_empty());

    // The flush still consumed and recorded the key: binding afterwards does
    // not resurrect already-flushed output.
    fixture.ctx.bindings.add_binding("100", None);
    handle_event(&mut fixture.ctx, idle("ses_1")).await;
    assert!(fixture.transport.sent().is_empty());
}

#[tokio::test]
async fn integration_tool_output_notice_threshold_is_strict() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);

    let tool_event = |output: String| {
        event(json!({
            "type": "message.part.updated",
            "properties": {"part": {
                "type": "tool",
                "sessionID": "ses_1",
                "tool": "bash",
                "state": {"status": "completed", "output": output}
            }}
        }))
    };

    handle_event(&mut fixture.ctx, tool_event("o".repeat(100))).await;
    assert!(fixture.transport.sent().is_empty());

    handle_event(&mut fixture.ctx, tool_event("o".repeat(101))).await;
    let sent = fixture.transport.texts();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].starts_with("🛠 Tool bash output:"));
}

#[tokio::test]
async fn integration_long_tool_output_is_truncated_in_the_notice() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);

    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "message.part.updated",
            "properties": {"part": {
                "type": "tool",
                "sessionID": "ses_1",
                "tool": "bash",
                "state": {"status": "done", "output": "z".repeat(5_000)}
            }}
        })),
    )
    .await;
    let sent = fixture.transport.texts();
    assert_eq!(sent.len(), 1);
    let body = sent[0].split('\n').nth(1).expect("output line");
    assert_eq!(body.chars().count(), 1_000);
    assert!(body.ends_with('…'));
}

#[tokio::test]
async fn integration_tool_error_emits_a_failure_notice() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);

    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "message.part.updated",
            "properties": {"part": {
                "type": "tool",
                "sessionID": "ses_1",
                "tool": "webfetch",
                "state": {"status": "error", "error": "connection refused"}
            }}
        })),
    )
    .await;
    assert_eq!(
        fixture.transport.texts(),
        vec!["🛠 Tool webfetch failed: connection refused".to_string()]
    );
}

#[tokio::test]
async fn integration_processed_keys_stay_bounded_after_many_flushes() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);

    for index in 0..101 {
        let message_id = format!("msg_{index:03}");
        handle_event(&mut fixture.ctx, text_part("ses_1", &message_id, "text")).await;
        handle_event(&mut fixture.ctx, idle("ses_1")).await;
    }
    assert_eq!(fixture.transport.sent().len(), 101);
    assert!(fixture.ctx.state.processed.len() <= 51);
}

#[tokio::test]
async fn integration_permission_notice_and_approve_flow() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);

    for id in ["ab99zz11qq", "ab12cd34ef"] {
        handle_event(
            &mut fixture.ctx,
            event(json!({
                "type": "permission.updated",
                "properties": {
                    "id": id,
                    "sessionID": "ses_1",
                    "title": "Run `cargo test`",
                    "type": "bash"
                }
            })),
        )
        .await;
    }
    let notices = fixture.transport.texts();
    assert_eq!(notices.len(), 2);
    assert!(notices[1].contains("[ab12cd34]"));
    assert!(notices[1].contains("/approve ab12cd34"));

    // The ambiguous prefix resolves to the lexicographically smallest id.
    handle_incoming(&mut fixture.ctx, &private_message("100", "/approve ab once")).await;
    let replies = fixture.agent.permission_replies.lock().expect("lock");
    assert_eq!(
        replies.as_slice(),
        &[(
            "ses_1".to_string(),
            "ab12cd34ef".to_string(),
            "once"
        )]
    );
    drop(replies);
    assert!(!fixture.ctx.state.permissions.contains_key("ab12cd34ef"));
    assert!(fixture.ctx.state.permissions.contains_key("ab99zz11qq"));
}

#[tokio::test]
async fn integration_session_status_retry_and_idle_emit_notices() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);

    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "session.status",
            "properties": {
                "sessionID": "ses_1",
                "status": "retry",
                "attempt": 2,
                "message": "rate limited"
            }
        })),
    )
    .await;
    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "session.status",
            "properties": {"sessionID": "ses_1", "status": "busy"}
        })),
    )
    .await;
    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "session.status",
            "properties": {"sessionID": "ses_1", "status": "idle"}
        })),
    )
    .await;

    let texts = fixture.transport.texts();
    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0], "⚠️ Agent retrying (attempt 2): rate limited");
    assert_eq!(texts[1], "✅ Agent finished.");
}

#[tokio::test]
async fn integration_todo_update_emits_a_progress_line() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);

    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "todo.updated",
            "properties": {
                "sessionID": "ses_1",
                "todos": [
                    {"id": "1", "content": "read config", "status": "completed"},
                    {"id": "2", "content": "wire router", "status": "in_progress"},
                    {"id": "3", "content": "write tests", "status": "pending"}
                ]
            }
        })),
    )
    .await;
    assert_eq!(
        fixture.transport.texts(),
        vec!["📋 1/3 tasks done; working on: wire router".to_string()]
    );
}

#[tokio::test]
async fn integration_first_created_session_becomes_active() {
    let mut fixture = fixture();

    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "session.created",
            "properties": {"sessionID": "ses_first"}
        })),
    )
    .await;
    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "session.created",
            "properties": {"sessionID": "ses_second"}
        })),
    )
    .await;
    assert_eq!(
        fixture.ctx.state.active_session_id.as_deref(),
        Some("ses_first")
    );
}

#[tokio::test]
async fn integration_non_private_messages_are_dropped_silently() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);

    let mut group = private_message("100", "/status");
    group.is_private = false;
    handle_incoming(&mut fixture.ctx, &group).await;
    assert!(fixture.transport.sent().is_empty());
}

#[tokio::test]
async fn integration_unbound_identity_pairs_with_a_valid_code() {
    let mut fixture = fixture();

    handle_incoming(&mut fixture.ctx, &private_message("100", "hello there")).await;
    let prompts = fixture.transport.texts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("pairing code"));

    let code = fixture.ctx.bindings.create_pending_code();
    handle_incoming(&mut fixture.ctx, &private_message("100", &code)).await;
    assert!(fixture.ctx.bindings.is_bound("100"));
    assert_eq!(
        fixture.ctx.bindings.bindings()[0].display_name.as_deref(),
        Some("alice")
    );

    // The code was consumed: a second identity cannot reuse it.
    handle_incoming(&mut fixture.ctx, &private_message("200", &code)).await;
    assert!(!fixture.ctx.bindings.is_bound("200"));
}

#[tokio::test]
async fn integration_free_text_creates_a_session_on_demand_and_forwards() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);

    handle_incoming(&mut fixture.ctx, &private_message("100", "fix the tests")).await;
    assert_eq!(
        fixture.ctx.state.active_session_id.as_deref(),
        Some("ses_new_1")
    );
    assert_eq!(
        fixture.agent.prompts.lock().expect("lock").as_slice(),
        &[("ses_new_1".to_string(), "fix the tests".to_string())]
    );
}

#[tokio::test]
async fn integration_runtime_failure_becomes_one_error_reply() {
    let mut fixture = fixture_with(
        RecordingTransport::default(),
        StubAgent {
            fail_prompts: true,
            ..StubAgent::default()
        },
    );
    fixture.ctx.bindings.add_binding("100", None);
    fixture.ctx.state.active_session_id = Some("ses_1".to_string());

    handle_incoming(&mut fixture.ctx, &private_message("100", "do things")).await;
    let texts = fixture.transport.texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("❌ Request failed:"));
    assert!(texts[0].contains("runtime rejected the prompt"));
}

#[tokio::test]
async fn integration_status_command_reports_bridge_state() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);
    fixture.ctx.state.connected = true;
    fixture.ctx.state.active_session_id = Some("ses_0123456789".to_string());
    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "session.status",
            "properties": {"sessionID": "ses_0123456789", "status": "busy"}
        })),
    )
    .await;
    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "todo.updated",
            "properties": {
                "sessionID": "ses_0123456789",
                "todos": [
                    {"id": "1", "content": "a", "status": "completed"},
                    {"id": "2", "content": "b", "status": "pending"}
                ]
            }
        })),
    )
    .await;
    handle_event(
        &mut fixture.ctx,
        event(json!({
            "type": "permission.updated",
            "properties": {"id": "perm1", "sessionID": "ses_0123456789", "title": "Edit file"}
        })),
    )
    .await;

    handle_incoming(&mut fixture.ctx, &private_message("100", "/status")).await;
    let status = fixture.transport.texts().last().cloned().expect("status reply");
    assert!(status.contains("runtime: connected"));
    assert!(status.contains("session: ses_0123"));
    assert!(status.contains("status: busy"));
    assert!(status.contains("todos: 1/2 done"));
    assert!(status.contains("pending permissions: 1"));
}

#[tokio::test]
async fn integration_session_use_switches_by_index_and_prefix() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);
    fixture
        .agent
        .sessions
        .lock()
        .expect("lock")
        .extend([
            SessionSummary {
                id: "ses_alpha".to_string(),
                title: Some("first".to_string()),
            },
            SessionSummary {
                id: "ses_beta".to_string(),
                title: None,
            },
        ]);

    handle_incoming(&mut fixture.ctx, &private_message("100", "/session use 2")).await;
    assert_eq!(
        fixture.ctx.state.active_session_id.as_deref(),
        Some("ses_beta")
    );

    handle_incoming(
        &mut fixture.ctx,
        &private_message("100", "/session use SES_AL"),
    )
    .await;
    assert_eq!(
        fixture.ctx.state.active_session_id.as_deref(),
        Some("ses_alpha")
    );

    handle_incoming(
        &mut fixture.ctx,
        &private_message("100", "/session use missing"),
    )
    .await;
    let last = fixture.transport.texts().last().cloned().expect("reply");
    assert!(last.contains("No session matches 'missing'"));
}

#[tokio::test]
async fn integration_remote_commands_reach_the_runtime() {
    let mut fixture = fixture();
    fixture.ctx.bindings.add_binding("100", None);

    for input in ["/agent cycle", "/interrupt", "/prompt clear", "/page up"] {
        handle_incoming(&mut fixture.ctx, &private_message("100", input)).await;
    }
    assert_eq!(
        fixture.agent.commands.lock().expect("lock").as_slice(),
        &[
            "agent_cycle".to_string(),
            "session_interrupt".to_string(),
            "prompt_clear".to_string(),
            "messages_page_up".to_string(),
        ]
    );
}

#[tokio::test]
async fn integration_dispatch_counts_only_fully_delivered_identities() {
    let transport = RecordingTransport {
        fail_for: Some("200".to_string()),
        ..RecordingTransport::default()
    };
    let fixture = fixture_with(transport, StubAgent::default());

    let identities = vec!["100".to_string(), "200".to_string(), "300".to_string()];
    let reached =
        crate::dispatcher::dispatch(fixture.transport.as_ref(), &identities, "fan out").await;
    assert_eq!(reached, 2);
    let sent = fixture.transport.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(identity, _)| identity != "200"));
}
