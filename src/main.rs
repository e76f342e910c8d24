#![deny(dead_code)] // DO NOT REMOVE THIS EVER
use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast::error::TryRecvError, mpsc};

mod credentials;
mod ui;
mod utils;

use crate::{
    credentials::{load_credentials, save_credentials, Credentials, COOKIE_ENV},
    ui::{ChatUI, NotificationKind, UiAction},
};
use chatroom::config::{self, ClientConfig};
use chatroom::realtime::{ConnectionStatus, RealtimeClient, TypingSignaler};
use chatroom::{ApiClient, ChatSession, Dispatch, InboundEvent, OutboundFrame, SessionReply};

const NOTIFICATION_SECS: i64 = 3;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "chatroom: a terminal client for a private-chat backend.",
    long_about = "chatroom lists your chatrooms, pages through message history over HTTP and \
    receives messages and typing notifications live over a WebSocket.\n\n\
    The session cookie is read from CHATROOM_COOKIE, the cached credentials file, \
    or prompted for on first start."
)]
struct Args {
    /// Base URL of the REST API
    #[arg(long, value_name = "URL")]
    api_url: Option<String>,

    /// WebSocket endpoint of the realtime gateway
    #[arg(long, value_name = "URL")]
    ws_url: Option<String>,

    /// Directory holding config.json, credentials.json and the log file
    #[arg(long, value_name = "DIR")]
    config_dir: Option<PathBuf>,

    /// Log file path
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    /// Log verbosity (off, error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", default_value = "debug", value_parser = parse_level)]
    log_level: LevelFilter,
}

fn parse_level(s: &str) -> Result<LevelFilter, String> {
    s.parse().map_err(|_| format!("unknown log level {:?}", s))
}

fn log_file_path(args: &Args) -> PathBuf {
    if let Some(path) = &args.log_file {
        return path.clone();
    }
    match config::config_dir() {
        Ok(dir) if std::fs::create_dir_all(&dir).is_ok() => dir.join("chatroom.log"),
        _ => PathBuf::from("chatroom.log"),
    }
}

/// Environment first, then the cache, then a prompt. Returns the cookie and
/// whether it should be cached.
fn resolve_cookie(api_url: &str) -> Result<(Option<String>, bool)> {
    if let Ok(cookie) = std::env::var(COOKIE_ENV) {
        return Ok((Some(cookie), false));
    }
    if let Some(creds) = load_credentials()? {
        if creds.api_url == api_url {
            if let Some(cookie) = creds.get_cookie() {
                info!("Using cached session for {}", creds.api_url);
                return Ok((Some(cookie), false));
            }
        }
    }
    eprintln!("Paste the session cookie for {} (e.g. sessionid=...; csrftoken=...), or leave empty:", api_url);
    let cookie = utils::read_line()?;
    if cookie.is_empty() {
        Ok((None, false))
    } else {
        Ok((Some(cookie), true))
    }
}

fn spawn_request<F>(request: F, replies: &mpsc::UnboundedSender<SessionReply>)
where
    F: Future<Output = SessionReply> + Send + 'static,
{
    let replies = replies.clone();
    tokio::spawn(async move {
        let _ = replies.send(request.await);
    });
}

/// Hands a frame to the gateway, telling the user when it had to be dropped.
fn deliver(realtime: &RealtimeClient, chat_ui: &mut ChatUI, frame: OutboundFrame) -> bool {
    let sent = realtime.send(frame);
    if !sent {
        chat_ui.notify("Not connected; message dropped", NotificationKind::Error);
    }
    sent
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(dir) = &args.config_dir {
        std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
        config::set_config_dir_override(dir.clone());
    }

    let log_file = log_file_path(&args);
    utils::setup_logging(Some(&log_file), args.log_level)?;
    info!("chatroom client starting up");
    info!("System information: {} {}", std::env::consts::OS, std::env::consts::ARCH);
    info!("Logging to file: {}", log_file.display());

    let config_path = ClientConfig::default_path()?;
    let mut config = ClientConfig::load_or_default(&config_path)?;
    config.apply_env();
    config.apply_overrides(args.api_url.clone(), args.ws_url.clone());
    info!("Using API {} and gateway {}", config.api_url, config.ws_url);

    let (cookie, cache_cookie) = resolve_cookie(&config.api_url)?;
    let api = Arc::new(ApiClient::new(&config.api_url, cookie.as_deref()).context("building the HTTP client")?);
    let mut session = ChatSession::new(api);

    println!("Connecting to {}... please wait...", config.api_url);
    session.load_self().await;
    match (session.self_info(), &cookie) {
        (Some(_), Some(cookie)) if cache_cookie => {
            if let Err(e) = save_credentials(&Credentials::new(&config.api_url, cookie)) {
                warn!("Failed to cache session cookie: {}", e);
            }
        }
        (None, _) => warn!("Could not identify the signed-in user; outgoing messages will not be marked"),
        _ => {}
    }
    session.load_chatrooms(0).await;
    session.load_messages(0).await;

    let realtime = RealtimeClient::connect(config.connection_settings(cookie));
    let typing = TypingSignaler::spawn(config.typing_settings(), realtime.sender());

    let mut terminal = ui::setup_terminal()?;
    let mut chat_ui = ChatUI::new();

    let result = run_main_loop(&mut chat_ui, &mut terminal, &mut session, &realtime, &typing, &config).await;

    ui::restore_terminal(terminal)?;
    drop(typing);
    realtime.shutdown().await;

    if let Err(e) = &result {
        error!("Main loop failed: {:#}", e);
    }
    info!("chatroom client shut down");
    result
}

async fn run_main_loop(
    chat_ui: &mut ChatUI,
    terminal: &mut ui::Terminal<ui::CrosstermBackend<io::Stdout>>,
    session: &mut ChatSession<ApiClient>,
    realtime: &RealtimeClient,
    typing: &TypingSignaler,
    config: &ClientConfig,
) -> Result<()> {
    let mut events = realtime.subscribe();
    let mut status = realtime.subscribe_status();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<SessionReply>();
    let typing_expiry = config.typing_expiry();
    let mut gateway_lost = false;

    loop {
        terminal.draw(|f| chat_ui.draw(f, session))?;

        session.expire_typing(typing_expiry);
        chat_ui.clean_notifications(NOTIFICATION_SECS);

        if let Some(action) = chat_ui.handle_input(session)? {
            match action {
                UiAction::Quit => break,
                UiAction::SendText(text) => match session.compose_text(&text) {
                    Some(frame) => {
                        deliver(realtime, chat_ui, frame);
                    }
                    None => chat_ui.notify("Select a chatroom first", NotificationKind::Error),
                },
                UiAction::Composing => {
                    if let Some(room) = session.active_chatroom() {
                        typing.keystroke(room.id);
                    }
                }
                UiAction::SelectChatroom(id) => {
                    if session.select_chatroom(id) {
                        info!("Switched to chatroom {}", id);
                    }
                }
                UiAction::ChatroomPage(delta) => spawn_request(session.request_chatrooms(delta), &reply_tx),
                UiAction::MessagePage(delta) => spawn_request(session.request_messages(delta), &reply_tx),
                UiAction::Refresh => {
                    spawn_request(session.request_chatrooms(0), &reply_tx);
                    spawn_request(session.request_messages(0), &reply_tx);
                }
                UiAction::UploadFiles(paths) => match session.request_upload(paths) {
                    Some(request) => {
                        chat_ui.notify("Uploading...", NotificationKind::Info);
                        spawn_request(request, &reply_tx);
                    }
                    None => chat_ui.notify("Select a chatroom first", NotificationKind::Error),
                },
                UiAction::MarkRead(message_id) => {
                    if let Some(frame) = session.mark_read(message_id) {
                        deliver(realtime, chat_ui, frame);
                    }
                }
            }
        }

        loop {
            match events.try_recv() {
                Ok(event) => handle_event(chat_ui, session, event),
                Err(TryRecvError::Lagged(skipped)) => warn!("Event subscriber lagged; {} events skipped", skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }

        while let Ok(change) = status.try_recv() {
            match change {
                ConnectionStatus::Connected => chat_ui.notify("Connected", NotificationKind::Info),
                ConnectionStatus::Disconnected => chat_ui.notify("Disconnected", NotificationKind::Error),
            }
        }

        while let Ok(reply) = reply_rx.try_recv() {
            let upload = matches!(reply, SessionReply::Uploaded { .. });
            let frames = session.apply_reply(reply);
            if upload {
                chat_ui.notify(&format!("Sent {} file(s)", frames.len()), NotificationKind::Info);
            }
            for frame in frames {
                if !deliver(realtime, chat_ui, frame) {
                    break;
                }
            }
        }

        if !gateway_lost && !realtime.is_running() {
            gateway_lost = true;
            warn!("Realtime client stopped; live updates are off");
            chat_ui.notify("Realtime connection lost", NotificationKind::Error);
        }

        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    Ok(())
}

fn handle_event(chat_ui: &mut ChatUI, session: &mut ChatSession<ApiClient>, event: InboundEvent) {
    match session.handle_event(event) {
        Dispatch::ServerError { code, description } => {
            chat_ui.notify(&format!("Server error {}: {}", code, description), NotificationKind::Error);
        }
        Dispatch::Ignored => {}
        other => log::debug!("Dispatched {:?}", other),
    }
}
