// Realtime gateway client
// Owns the connection driver task and fans inbound events out to subscribers.

use log::{debug, info};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

pub mod chat_states;
pub mod connection;
pub mod protocol;

pub use chat_states::{TypingSettings, TypingSignaler, TypingStatus};
pub use connection::{
    BackoffPolicy, ConnectionSettings, ConnectionState, ConnectionStatus, ExponentialBackoff, FixedBackoff,
};
pub use protocol::{InboundEvent, MessageType, OutboundFrame, ProtocolError};

use connection::Command;

const EVENT_BUFFER: usize = 256;

/// Anything outbound frames can be handed to.
pub trait FrameSink: Send + Sync + 'static {
    fn send_frame(&self, frame: OutboundFrame);
}

impl FrameSink for mpsc::UnboundedSender<OutboundFrame> {
    fn send_frame(&self, frame: OutboundFrame) {
        if self.send(frame).is_err() {
            debug!("Frame receiver dropped");
        }
    }
}

/// Cloneable handle for queueing frames on a [`RealtimeClient`].
#[derive(Clone)]
pub struct FrameSender {
    commands: mpsc::UnboundedSender<Command>,
}

impl FrameSender {
    /// Fire-and-forget. Returns false once the connection has shut down.
    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.commands.send(Command::Send(frame)).is_ok()
    }
}

impl FrameSink for FrameSender {
    fn send_frame(&self, frame: OutboundFrame) {
        if !self.send(frame) {
            debug!("Connection closed; outbound frame dropped");
        }
    }
}

pub struct RealtimeClient {
    sender: FrameSender,
    events: broadcast::Sender<InboundEvent>,
    status: broadcast::Sender<ConnectionStatus>,
    task: JoinHandle<()>,
}

impl RealtimeClient {
    /// Spawns the connection driver. Must be called inside a tokio runtime.
    pub fn connect(settings: ConnectionSettings) -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let (status, _) = broadcast::channel(16);
        info!("Starting realtime client for {}", settings.url);
        let task = tokio::spawn(connection::run(settings, commands_rx, events.clone(), status.clone()));

        Self {
            sender: FrameSender { commands },
            events,
            status,
            task,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }

    pub fn event_stream(&self) -> BroadcastStream<InboundEvent> {
        BroadcastStream::new(self.events.subscribe())
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub fn sender(&self) -> FrameSender {
        self.sender.clone()
    }

    pub fn send(&self, frame: OutboundFrame) -> bool {
        self.sender.send(frame)
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Closes the socket and waits for the driver to finish.
    pub async fn shutdown(self) {
        let _ = self.sender.commands.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            debug!("Connection task ended abnormally: {}", e);
        }
    }
}
