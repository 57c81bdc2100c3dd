//! SSE subscriber for the runtime's event feed.
//!
//! Reconnects forever with exponential backoff and reports connection
//! transitions so the bridge can track connectivity. Malformed event lines
//! are logged and skipped; they never tear down the stream.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures_util::StreamExt;
use tether_events::AgentEvent;
use tokio::sync::mpsc;

/// One item on the feed channel: a connectivity transition or an event.
#[derive(Debug)]
pub enum AgentFeedItem {
    Connected,
    Disconnected,
    Event(AgentEvent),
}

#[derive(Debug, Clone)]
pub struct EventStreamConfig {
    pub base_url: String,
    pub min_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl EventStreamConfig {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            min_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// Runs the subscription loop until the receiving side goes away.
pub async fn run_event_stream(config: EventStreamConfig, feed: mpsc::Sender<AgentFeedItem>) {
    let client = match reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
    {
        Ok(client) => client,
        Err(error) => {
            tracing::error!(%error, "failed to build event stream client");
            return;
        }
    };

    let mut delay = config.min_reconnect_delay;
    loop {
        match subscribe_once(&client, &config, &feed, &mut delay).await {
            Ok(()) => {}
            Err(error) => {
                tracing::warn!(%error, reconnect_in = ?delay, "event stream disconnected");
            }
        }
        if feed.is_closed() || feed.send(AgentFeedItem::Disconnected).await.is_err() {
            return;
        }
        tokio::time::sleep(delay).await;
        delay = (delay * 2).min(config.max_reconnect_delay);
    }
}

async fn subscribe_once(
    client: &reqwest::Client,
    config: &EventStreamConfig,
    feed: &mpsc::Sender<AgentFeedItem>,
    delay: &mut Duration,
) -> Result<()> {
    let url = format!("{}/event", config.base_url);
    let response = client
        .get(&url)
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    if !response.status().is_success() {
        bail!("event endpoint returned {}", response.status());
    }

    // Connected: reset the backoff before consuming the body.
    *delay = config.min_reconnect_delay;
    if feed.send(AgentFeedItem::Connected).await.is_err() {
        return Ok(());
    }
    tracing::info!(url, "event stream connected");

    let mut body = response.bytes_stream();
    let mut buffer = String::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("event stream read failed")?;
        buffer.push_str(&String::from_utf8_lossy(&chunk));
        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim_end_matches('\r').to_string();
            buffer.drain(..=newline);
            if !forward_line(&line, feed).await {
                return Ok(());
            }
        }
    }
    // Server closed the stream cleanly; the caller reconnects.
    Ok(())
}

/// Parses one SSE line and forwards any event. Returns false once the
/// receiver is gone.
async fn forward_line(line: &str, feed: &mpsc::Sender<AgentFeedItem>) -> bool {
    let Some(data) = line.strip_prefix("data:") else {
        return true;
    };
    let data = data.trim();
    if data.is_empty() {
        return true;
    }
    match serde_json::from_str::<AgentEvent>(data) {
        Ok(event) => feed.send(AgentFeedItem::Event(event)).await.is_ok(),
        Err(error) => {
            let line_preview: String = data.chars().take(120).collect();
            tracing::warn!(%error, line = %line_preview, "skipping malformed event line");
            true
        }
    }
}
