mod command;
mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
use client_core::{
    ChatEvent, ChatSession, ConnectionState, Credential, DeliveryState, DisplayMessage,
    HttpHistoryService, SessionContext, SessionDependencies, WebSocketTransport,
};
use shared::domain::UserId;
use storage::SqliteCache;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    command::Command,
    config::{load_settings, normalize_database_url},
};

/// Terminal chat with a single peer. Lines typed on stdin are sent as
/// messages; `/retry <handle>`, `/online` and `/quit` are commands.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    user_id: i64,
    #[arg(long)]
    peer_id: i64,
    #[arg(long, env = "CHAT_TOKEN", hide_env_values = true)]
    token: Option<String>,
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    let cache_url = normalize_database_url(&settings.cache_database_url);
    let cache = SqliteCache::new(&cache_url)
        .await
        .with_context(|| format!("failed to open cache at '{cache_url}'"))?;
    cache.health_check().await?;
    info!(server_url = %settings.server_url, cache_url = %cache_url, "chat_cli: settings loaded");

    let session = ChatSession::new(
        SessionContext {
            viewer: UserId(args.user_id),
            config: settings.session_config(),
        },
        UserId(args.peer_id),
        SessionDependencies {
            transport: Arc::new(WebSocketTransport),
            history: Arc::new(HttpHistoryService::new(settings.server_url.clone())),
            cache: Arc::new(cache),
        },
    );

    let mut events = session.subscribe();
    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            render(&event);
        }
    });

    session.open(args.token.and_then(Credential::new)).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match command::parse(&line) {
            Command::Send(body) => {
                session.keystroke().await;
                if let Some(pending_id) = session.send(&body).await {
                    info!(%pending_id, "chat_cli: message submitted");
                }
            }
            Command::Retry(pending_id) => {
                if !session.retry(pending_id).await {
                    println!("!! nothing to retry for {pending_id}");
                }
            }
            Command::Online => {
                let online = session.online_users().await;
                if online.is_empty() {
                    println!("-- nobody reported online yet");
                } else {
                    let ids: Vec<String> = online.iter().map(ToString::to_string).collect();
                    println!("-- online: {}", ids.join(", "));
                }
            }
            Command::Quit => break,
            Command::Invalid(reason) => println!("!! {reason}"),
        }
    }

    session.close().await;
    printer.abort();
    Ok(())
}

fn render(event: &ChatEvent) {
    match event {
        ChatEvent::ConnectionStateChanged(state) => println!("-- {}", state_label(*state)),
        ChatEvent::HistoryLoaded(view) => {
            for message in view {
                println!("{}", message_line(message));
            }
        }
        ChatEvent::HistoryUnavailable(reason) => println!("!! history unavailable: {reason}"),
        ChatEvent::MessageAppended(message) | ChatEvent::MessageUpdated(message) => {
            println!("{}", message_line(message));
        }
        ChatEvent::SendFailed { pending_id, reason } => {
            println!("!! send failed ({reason}); /retry {pending_id}");
        }
        ChatEvent::PeerTyping(true) => println!("-- peer is typing"),
        ChatEvent::PeerTyping(false) => {}
        ChatEvent::PresenceChanged { user_id, online } => {
            println!(
                "-- {user_id} is {}",
                if *online { "online" } else { "offline" }
            );
        }
        ChatEvent::Reconnected => println!("-- back online"),
        ChatEvent::ServerError(err) => println!("!! server error: {err}"),
    }
}

fn state_label(state: ConnectionState) -> &'static str {
    match state {
        ConnectionState::Disconnected => "disconnected",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Connected => "connected",
        ConnectionState::Reconnecting => "reconnecting",
    }
}

fn message_line(shown: &DisplayMessage) -> String {
    let author = if shown.is_sent {
        "you".to_string()
    } else {
        shown.message.from_id().to_string()
    };
    let status = match shown.message.delivery_state() {
        DeliveryState::Queued => " [queued]",
        DeliveryState::Sent => " [sent]",
        DeliveryState::Delivered if shown.is_sent => " [delivered]",
        DeliveryState::Delivered => "",
        DeliveryState::Failed => " [failed]",
    };
    format!(
        "[{}] {author}: {}{status}",
        shown.formatted_time,
        shown.message.body()
    )
}
