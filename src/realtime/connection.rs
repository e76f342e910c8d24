// Realtime gateway connection management
// Reconnect state machine plus the socket driver task that runs it.

use futures_util::{SinkExt, StreamExt};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::COOKIE, HeaderValue};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::protocol::{InboundEvent, OutboundFrame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting { attempt: u32 },
    Open,
    BackoffWait { attempt: u32, delay: Duration },
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionInput {
    Connected,
    Failed,
    Dropped,
    BackoffElapsed,
    Shutdown,
}

/// Surfaced to the user as a transient notification only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

pub trait BackoffPolicy: Send + Sync {
    /// Delay before reconnect attempt number `attempt` (1-based).
    fn delay(&self, attempt: u32) -> Duration;
}

#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff(pub Duration);

impl BackoffPolicy for FixedBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        self.0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Pure reconnect logic: no I/O, no timers.
pub struct ConnectionMachine {
    state: ConnectionState,
    failures: u32,
    max_retries: u32,
    backoff: Arc<dyn BackoffPolicy>,
}

impl ConnectionMachine {
    pub fn new(max_retries: u32, backoff: Arc<dyn BackoffPolicy>) -> Self {
        Self {
            state: ConnectionState::Connecting { attempt: 0 },
            failures: 0,
            max_retries,
            backoff,
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn step(&mut self, input: ConnectionInput) -> &ConnectionState {
        let current = self.state.clone();
        let next = match (current, input) {
            (_, ConnectionInput::Shutdown) => ConnectionState::Closed,
            (ConnectionState::Closed, _) => ConnectionState::Closed,
            (ConnectionState::Connecting { .. }, ConnectionInput::Connected) => {
                self.failures = 0;
                ConnectionState::Open
            }
            (ConnectionState::Connecting { .. }, ConnectionInput::Failed)
            | (ConnectionState::Open, ConnectionInput::Dropped) => self.schedule_retry(),
            (ConnectionState::BackoffWait { attempt, .. }, ConnectionInput::BackoffElapsed) => {
                ConnectionState::Connecting { attempt }
            }
            (state, input) => {
                debug!("Ignoring connection input {:?} in state {:?}", input, state);
                state
            }
        };
        self.state = next;
        &self.state
    }

    fn schedule_retry(&mut self) -> ConnectionState {
        self.failures += 1;
        if self.failures > self.max_retries {
            warn!("Giving up after {} reconnect attempts", self.max_retries);
            return ConnectionState::Closed;
        }
        ConnectionState::BackoffWait {
            attempt: self.failures,
            delay: self.backoff.delay(self.failures),
        }
    }
}

#[derive(Clone)]
pub struct ConnectionSettings {
    pub url: String,
    /// Sent as the `Cookie` header on the handshake; the gateway
    /// authenticates with the HTTP session.
    pub cookie: Option<String>,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub backoff: Arc<dyn BackoffPolicy>,
}

impl ConnectionSettings {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            cookie: None,
            connect_timeout: Duration::from_millis(1000),
            max_retries: 10,
            backoff: Arc::new(ExponentialBackoff {
                base: Duration::from_millis(1000),
                max: Duration::from_secs(10),
            }),
        }
    }
}

pub(crate) enum Command {
    Send(OutboundFrame),
    Shutdown,
}

enum PumpExit {
    Dropped,
    Shutdown,
}

async fn open_socket(settings: &ConnectionSettings) -> anyhow::Result<WsStream> {
    let mut request = settings.url.as_str().into_client_request()?;
    if let Some(cookie) = &settings.cookie {
        request.headers_mut().insert(COOKIE, HeaderValue::from_str(cookie)?);
    }
    let (stream, response) = connect_async(request).await?;
    debug!("Gateway handshake completed with status {}", response.status());
    Ok(stream)
}

fn publish_frame(text: &str, events: &broadcast::Sender<InboundEvent>) {
    match InboundEvent::parse(text) {
        Ok(event) => {
            debug!("Received {:?} frame", event.message_type());
            if events.send(event).is_err() {
                debug!("No subscribers for inbound event");
            }
        }
        Err(e) => warn!("Dropping inbound frame: {} ({})", e, text),
    }
}

async fn pump(
    ws: WsStream,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    events: &broadcast::Sender<InboundEvent>,
) -> PumpExit {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(WsMessage::Text(text))) => publish_frame(&text, events),
                Some(Ok(WsMessage::Close(frame))) => {
                    info!("Gateway closed the connection: {:?}", frame);
                    return PumpExit::Dropped;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Gateway connection error: {}", e);
                    return PumpExit::Dropped;
                }
                None => return PumpExit::Dropped,
            },
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => {
                    let kind = frame.message_type();
                    if let Err(e) = sink.send(WsMessage::Text(frame.to_value().to_string())).await {
                        warn!("Failed to send {:?} frame: {}", kind, e);
                        return PumpExit::Dropped;
                    }
                    debug!("Sent {:?} frame", kind);
                }
                Some(Command::Shutdown) | None => {
                    if let Err(e) = sink.close().await {
                        debug!("Error closing gateway socket: {}", e);
                    }
                    return PumpExit::Shutdown;
                }
            },
        }
    }
}

/// Drives the connection until shutdown or until retries are exhausted.
pub(crate) async fn run(
    settings: ConnectionSettings,
    mut commands: mpsc::UnboundedReceiver<Command>,
    events: broadcast::Sender<InboundEvent>,
    status: broadcast::Sender<ConnectionStatus>,
) {
    let mut machine = ConnectionMachine::new(settings.max_retries, settings.backoff.clone());

    loop {
        match machine.state().clone() {
            ConnectionState::Connecting { attempt } => {
                info!("Connecting to {} (attempt {})", settings.url, attempt + 1);
                match tokio::time::timeout(settings.connect_timeout, open_socket(&settings)).await {
                    Ok(Ok(ws)) => {
                        machine.step(ConnectionInput::Connected);
                        info!("Connected to {}", settings.url);
                        let _ = status.send(ConnectionStatus::Connected);

                        let exit = pump(ws, &mut commands, &events).await;
                        let _ = status.send(ConnectionStatus::Disconnected);
                        match exit {
                            PumpExit::Dropped => machine.step(ConnectionInput::Dropped),
                            PumpExit::Shutdown => machine.step(ConnectionInput::Shutdown),
                        };
                    }
                    Ok(Err(e)) => {
                        warn!("Connection attempt failed: {}", e);
                        machine.step(ConnectionInput::Failed);
                    }
                    Err(_) => {
                        warn!("Connection attempt timed out after {:?}", settings.connect_timeout);
                        machine.step(ConnectionInput::Failed);
                    }
                }
            }
            ConnectionState::BackoffWait { attempt, delay } => {
                info!("Reconnecting in {:?} (retry {}/{})", delay, attempt, settings.max_retries);
                let sleep = tokio::time::sleep(delay);
                tokio::pin!(sleep);
                loop {
                    tokio::select! {
                        _ = &mut sleep => {
                            machine.step(ConnectionInput::BackoffElapsed);
                            break;
                        }
                        command = commands.recv() => match command {
                            Some(Command::Send(frame)) => {
                                debug!("Dropping {:?} frame while disconnected", frame.message_type());
                            }
                            Some(Command::Shutdown) | None => {
                                machine.step(ConnectionInput::Shutdown);
                                break;
                            }
                        },
                    }
                }
            }
            ConnectionState::Open => {
                error!("Connection driver found an open state without a socket");
                machine.step(ConnectionInput::Dropped);
            }
            ConnectionState::Closed => break,
        }
    }
    info!("Connection to {} closed", settings.url);
}
