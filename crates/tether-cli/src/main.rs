//! tether binary: wires the binding store, the runtime event feed, and the
//! Telegram transport into one run loop.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tether_access::BindingStore;
use tether_agent::{run_event_stream, AgentFeedItem, AgentHttpClient, EventStreamConfig};
use tether_bridge::{commands, router, BridgeContext, IncomingMessage};
use tether_telegram::TelegramClient;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Margin added to the long-poll window so the HTTP client does not time a
/// healthy poll out.
const POLL_TIMEOUT_MARGIN_MS: u64 = 5_000;

#[derive(Debug, Parser)]
#[command(
    name = "tether",
    about = "Drive an agent runtime from Telegram",
    version
)]
struct Cli {
    /// Base URL of the agent runtime HTTP API.
    #[arg(long, env = "TETHER_AGENT_URL", default_value = "http://127.0.0.1:4096")]
    agent_url: String,

    /// Telegram bot token used for sending and long-polling.
    #[arg(long, env = "TETHER_TELEGRAM_BOT_TOKEN")]
    telegram_bot_token: String,

    /// Telegram Bot API base override, mainly for tests and gateways.
    #[arg(
        long,
        env = "TETHER_TELEGRAM_API_BASE",
        default_value = tether_telegram::telegram_client::DEFAULT_API_BASE
    )]
    telegram_api_base: String,

    /// Directory holding tether state; the binding registry lives at
    /// `<home>/.tether/bindings.json`. Defaults to $HOME.
    #[arg(long, env = "TETHER_HOME")]
    home_dir: Option<PathBuf>,

    /// Print a fresh pairing code at startup even when bindings exist.
    #[arg(long)]
    issue_code: bool,

    /// HTTP request timeout for agent API calls, in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    request_timeout_ms: u64,

    /// Telegram long-poll window in seconds.
    #[arg(long, default_value_t = 30)]
    poll_timeout_seconds: u64,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn bindings_path(home_dir: Option<PathBuf>) -> PathBuf {
    let home = home_dir
        .or_else(|| std::env::var_os("HOME").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".tether").join("bindings.json")
}

async fn run_update_poller(
    telegram: Arc<TelegramClient>,
    timeout_seconds: u64,
    feed: mpsc::Sender<IncomingMessage>,
) {
    let mut offset = 0u64;
    loop {
        if feed.is_closed() {
            return;
        }
        match telegram.poll_updates(&mut offset, timeout_seconds).await {
            Ok(messages) => {
                for message in messages {
                    if feed.send(message).await.is_err() {
                        return;
                    }
                }
            }
            Err(error) => {
                tracing::warn!(%error, "telegram polling failed");
                tokio::time::sleep(Duration::from_secs(3)).await;
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let bindings = BindingStore::open(bindings_path(cli.home_dir.clone()));
    let agent = Arc::new(
        AgentHttpClient::new(&cli.agent_url, cli.request_timeout_ms)
            .context("failed to build agent client")?,
    );
    let telegram = Arc::new(
        TelegramClient::new(
            &cli.telegram_bot_token,
            &cli.telegram_api_base,
            cli.poll_timeout_seconds
                .saturating_mul(1_000)
                .saturating_add(POLL_TIMEOUT_MARGIN_MS),
        )
        .context("failed to build telegram client")?,
    );
    let mut ctx = BridgeContext::new(bindings, agent, Some(telegram.clone()));

    if ctx.bindings.bindings().is_empty() || cli.issue_code {
        let code = ctx.bindings.create_pending_code();
        println!("pairing code (valid for 60s, single use): {code}");
        println!("send it to the bot in a private chat to pair");
    }

    let (event_tx, mut event_rx) = mpsc::channel(256);
    let event_task = tokio::spawn(run_event_stream(
        EventStreamConfig::new(&cli.agent_url),
        event_tx,
    ));

    let (update_tx, mut update_rx) = mpsc::channel(64);
    let poll_task = tokio::spawn(run_update_poller(
        telegram,
        cli.poll_timeout_seconds,
        update_tx,
    ));

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested");
                break;
            }
            item = event_rx.recv() => {
                match item {
                    Some(AgentFeedItem::Connected) => {
                        ctx.state.connected = true;
                    }
                    Some(AgentFeedItem::Disconnected) => {
                        ctx.state.connected = false;
                    }
                    Some(AgentFeedItem::Event(event)) => {
                        router::handle_event(&mut ctx, event).await;
                    }
                    None => {
                        tracing::warn!("event feed ended");
                        break;
                    }
                }
            }
            message = update_rx.recv() => {
                match message {
                    Some(message) => commands::handle_incoming(&mut ctx, &message).await,
                    None => {
                        tracing::warn!("telegram update feed ended");
                        break;
                    }
                }
            }
        }
    }

    event_task.abort();
    poll_task.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();
    run(cli).await
}
