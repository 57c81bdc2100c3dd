//! End-to-end exercise of the bridge against a mocked agent runtime: pair a
//! chat identity, forward a prompt, stream output back, answer a permission.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use httpmock::prelude::*;
use serde_json::json;
use tether_access::BindingStore;
use tether_agent::AgentHttpClient;
use tether_bridge::{
    commands::handle_incoming, router::handle_event, BridgeContext, ChatTransport, IncomingMessage,
};
use tether_events::AgentEvent;

#[derive(Default)]
struct ChannelTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl ChannelTransport {
    fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .expect("transport lock")
            .iter()
            .map(|(_, text)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatTransport for ChannelTransport {
    async fn send_text(&self, identity: &str, text: &str) -> Result<String> {
        let mut sent = self.sent.lock().expect("transport lock");
        sent.push((identity.to_string(), text.to_string()));
        Ok(format!("m{}", sent.len()))
    }
}

fn private(identity: &str, text: &str) -> IncomingMessage {
    IncomingMessage {
        identity: identity.to_string(),
        display_name: Some("alice".to_string()),
        text: text.to_string(),
        is_private: true,
    }
}

fn agent_event(value: serde_json::Value) -> AgentEvent {
    serde_json::from_value(value).expect("event parses")
}

#[tokio::test]
async fn integration_pair_prompt_stream_and_approve_roundtrip() {
    let server = MockServer::start_async().await;
    let create_session = server
        .mock_async(|when, then| {
            when.method(POST).path("/session");
            then.status(200).json_body(json!({"id": "ses_e2e"}));
        })
        .await;
    let submit_prompt = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/session/ses_e2e/prompt_async")
                .json_body(json!({"parts": [{"type": "text", "text": "fix the flaky test"}]}));
            then.status(200).json_body(json!({}));
        })
        .await;
    let respond_permission = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/session/ses_e2e/permissions/perm_1")
                .json_body(json!({"response": "once"}));
            then.status(200).json_body(json!({}));
        })
        .await;

    let tempdir = tempfile::tempdir().expect("tempdir");
    let bindings_file = tempdir.path().join("bindings.json");
    let agent = Arc::new(AgentHttpClient::new(&server.base_url(), 2_000).expect("agent client"));
    let transport = Arc::new(ChannelTransport::default());
    let mut ctx = BridgeContext::new(
        BindingStore::open(&bindings_file),
        agent,
        Some(transport.clone()),
    );

    // Pair with a freshly issued code.
    let code = ctx.bindings.create_pending_code();
    handle_incoming(&mut ctx, &private("100", &code)).await;
    assert!(ctx.bindings.is_bound("100"));

    // Free text creates a session on demand and forwards the prompt.
    handle_incoming(&mut ctx, &private("100", "fix the flaky test")).await;
    create_session.assert_async().await;
    submit_prompt.assert_async().await;
    assert_eq!(ctx.state.active_session_id.as_deref(), Some("ses_e2e"));

    // Streamed output reaches the chat once the session goes idle.
    handle_event(
        &mut ctx,
        agent_event(json!({
            "type": "message.part.updated",
            "properties": {"part": {
                "type": "text",
                "sessionID": "ses_e2e",
                "messageID": "msg_1",
                "delta": "done, the test is fixed"
            }}
        })),
    )
    .await;
    handle_event(
        &mut ctx,
        agent_event(json!({
            "type": "session.idle",
            "properties": {"sessionID": "ses_e2e"}
        })),
    )
    .await;
    assert!(transport
        .texts()
        .contains(&"done, the test is fixed".to_string()));

    // A permission request round-trips through /approve.
    handle_event(
        &mut ctx,
        agent_event(json!({
            "type": "permission.updated",
            "properties": {
                "id": "perm_1",
                "sessionID": "ses_e2e",
                "title": "Run `cargo test`",
                "type": "bash"
            }
        })),
    )
    .await;
    handle_incoming(&mut ctx, &private("100", "/approve perm_1 once")).await;
    respond_permission.assert_async().await;
    assert!(ctx.state.permissions.is_empty());

    // A restart sees the same binding set.
    let reopened = BindingStore::open(&bindings_file);
    assert!(reopened.is_bound("100"));
    assert_eq!(
        reopened.bindings()[0].display_name.as_deref(),
        Some("alice")
    );
}
