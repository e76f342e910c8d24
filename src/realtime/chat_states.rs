// Outgoing "is typing" signalling
// One IsTyping frame per throttle window, followed by a deferred TypingStopped.

use log::debug;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::protocol::OutboundFrame;
use super::FrameSink;
use crate::models::ChatroomId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypingSettings {
    pub throttle: Duration,
    pub stop_delay: Duration,
    /// When set, keystrokes swallowed by the throttle push the pending
    /// TypingStopped back instead of leaving it where it was.
    pub extend_on_keystroke: bool,
}

impl Default for TypingSettings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_secs(5),
            stop_delay: Duration::from_secs(5),
            extend_on_keystroke: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingStatus {
    Idle,
    Announced { chatroom: ChatroomId },
}

/// Timer-free core of the signaler; the caller supplies the clock.
#[derive(Debug)]
pub struct TypingDebouncer {
    settings: TypingSettings,
    window_ends: Option<Instant>,
    pending_stop: Option<(Instant, ChatroomId)>,
}

impl TypingDebouncer {
    pub fn new(settings: TypingSettings) -> Self {
        Self {
            settings,
            window_ends: None,
            pending_stop: None,
        }
    }

    pub fn status(&self) -> TypingStatus {
        match self.pending_stop {
            Some((_, chatroom)) => TypingStatus::Announced { chatroom },
            None => TypingStatus::Idle,
        }
    }

    pub fn stop_deadline(&self) -> Option<Instant> {
        self.pending_stop.map(|(deadline, _)| deadline)
    }

    /// A local keystroke in `chatroom`. Returns the frames to send now.
    pub fn on_keystroke(&mut self, now: Instant, chatroom: ChatroomId) -> Vec<OutboundFrame> {
        if matches!(self.window_ends, Some(end) if now < end) {
            if self.settings.extend_on_keystroke {
                if let Some((deadline, _)) = self.pending_stop.as_mut() {
                    *deadline = now + self.settings.stop_delay;
                }
            }
            return Vec::new();
        }

        let mut frames = Vec::with_capacity(2);
        // The new announcement supersedes the pending stop; a stop owed to a
        // different room is flushed instead of being lost.
        if let Some((_, previous)) = self.pending_stop.take() {
            if previous != chatroom {
                frames.push(OutboundFrame::TypingStopped { dialog_pk: previous });
            }
        }
        self.window_ends = Some(now + self.settings.throttle);
        self.pending_stop = Some((now + self.settings.stop_delay, chatroom));
        frames.push(OutboundFrame::IsTyping { dialog_pk: chatroom });
        frames
    }

    /// Emits the deferred TypingStopped once its deadline has passed.
    pub fn poll_stop(&mut self, now: Instant) -> Option<OutboundFrame> {
        match self.pending_stop {
            Some((deadline, chatroom)) if now >= deadline => {
                self.pending_stop = None;
                Some(OutboundFrame::TypingStopped { dialog_pk: chatroom })
            }
            _ => None,
        }
    }
}

/// Background task wrapping a [`TypingDebouncer`].
pub struct TypingSignaler {
    keystrokes: mpsc::UnboundedSender<ChatroomId>,
    status: watch::Receiver<TypingStatus>,
    task: JoinHandle<()>,
}

impl TypingSignaler {
    pub fn spawn<S: FrameSink>(settings: TypingSettings, sink: S) -> Self {
        let (keystrokes, rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(TypingStatus::Idle);
        let task = tokio::spawn(run(TypingDebouncer::new(settings), rx, sink, status_tx));
        Self { keystrokes, status, task }
    }

    pub fn keystroke(&self, chatroom: ChatroomId) {
        if self.keystrokes.send(chatroom).is_err() {
            debug!("Typing signaler has stopped; keystroke ignored");
        }
    }

    pub fn status(&self) -> TypingStatus {
        *self.status.borrow()
    }
}

impl Drop for TypingSignaler {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run<S: FrameSink>(
    mut debouncer: TypingDebouncer,
    mut keystrokes: mpsc::UnboundedReceiver<ChatroomId>,
    sink: S,
    status: watch::Sender<TypingStatus>,
) {
    loop {
        let deadline = debouncer.stop_deadline();
        tokio::select! {
            keystroke = keystrokes.recv() => match keystroke {
                Some(chatroom) => {
                    for frame in debouncer.on_keystroke(Instant::now(), chatroom) {
                        sink.send_frame(frame);
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if let Some(frame) = debouncer.poll_stop(Instant::now()) {
                    sink.send_frame(frame);
                }
            }
        }
        status.send_replace(debouncer.status());
    }
}
