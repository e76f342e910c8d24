// Chat session view-model
// Maps user actions to backend requests and outbound frames, and owns the
// state those requests and inbound events update.

use log::{info, warn};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use crate::api::{ApiError, ChatBackend, PageCursor};
use crate::models::{
    Chatroom, ChatroomId, FileAttachment, HistoryMessage, Message, Page, Presence, SelfInfo, TypingIndicator, UserId,
};
use crate::realtime::protocol::{InboundEvent, OutboundFrame};
use crate::state::{ChatState, Dispatch, DispatchContext};

/// Result of a backend request, applied with [`ChatSession::apply_reply`].
#[derive(Debug)]
pub enum SessionReply {
    SelfInfo(SelfInfo),
    Chatrooms(Page<Chatroom>),
    Messages(Page<HistoryMessage>),
    Uploaded { chatroom: ChatroomId, files: Vec<FileAttachment> },
    /// The request failed; the error has already been logged.
    Failed,
}

fn settle<T>(what: &str, result: Result<T, ApiError>, wrap: impl FnOnce(T) -> SessionReply) -> SessionReply {
    match result {
        Ok(value) => wrap(value),
        Err(e) => {
            warn!("Failed to {}: {}", what, e);
            SessionReply::Failed
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page: u32,
    pub pages: u32,
}

pub struct ChatSession<B: ChatBackend + 'static> {
    backend: Arc<B>,
    state: ChatState,
    active: Option<Chatroom>,
    self_info: Option<SelfInfo>,
    chatroom_cursor: PageCursor,
    message_cursor: PageCursor,
    chatroom_page: Option<PageInfo>,
    message_page: Option<PageInfo>,
}

impl<B: ChatBackend + 'static> ChatSession<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self {
            backend,
            state: ChatState::new(),
            active: None,
            self_info: None,
            chatroom_cursor: PageCursor::new(),
            message_cursor: PageCursor::new(),
            chatroom_page: None,
            message_page: None,
        }
    }

    pub fn state(&self) -> &ChatState {
        &self.state
    }

    pub fn self_info(&self) -> Option<&SelfInfo> {
        self.self_info.as_ref()
    }

    pub fn active_chatroom(&self) -> Option<&Chatroom> {
        self.active.as_ref()
    }

    pub fn chatrooms(&self) -> &[Chatroom] {
        self.state.chatrooms()
    }

    pub fn chatroom_page(&self) -> Option<PageInfo> {
        self.chatroom_page
    }

    pub fn message_page(&self) -> Option<PageInfo> {
        self.message_page
    }

    pub fn presence(&self, user: UserId) -> Presence {
        self.state.presence(user)
    }

    pub fn request_self(&self) -> impl Future<Output = SessionReply> + Send + 'static {
        let backend = self.backend.clone();
        async move { settle("fetch self info", backend.fetch_self().await, SessionReply::SelfInfo) }
    }

    /// Advances the chatroom cursor now; the returned future performs the fetch.
    pub fn request_chatrooms(&mut self, delta: i32) -> impl Future<Output = SessionReply> + Send + 'static {
        let page = self.chatroom_cursor.advance(delta);
        let backend = self.backend.clone();
        async move { settle("fetch chatrooms", backend.fetch_chatrooms(page).await, SessionReply::Chatrooms) }
    }

    pub fn request_messages(&mut self, delta: i32) -> impl Future<Output = SessionReply> + Send + 'static {
        let page = self.message_cursor.advance(delta);
        let backend = self.backend.clone();
        async move { settle("fetch messages", backend.fetch_messages(page).await, SessionReply::Messages) }
    }

    /// Uploads into the chatroom active at call time. `None` without one.
    pub fn request_upload(&self, paths: Vec<PathBuf>) -> Option<impl Future<Output = SessionReply> + Send + 'static> {
        let chatroom = self.active.as_ref()?.id;
        if paths.is_empty() {
            return None;
        }
        let backend = self.backend.clone();
        Some(async move {
            settle("upload files", backend.upload_files(&paths).await, |files| SessionReply::Uploaded {
                chatroom,
                files,
            })
        })
    }

    /// Folds a finished request into the session. Returns frames to send.
    ///
    /// Pages replace the corresponding list; a late reply for an older page
    /// still wins.
    pub fn apply_reply(&mut self, reply: SessionReply) -> Vec<OutboundFrame> {
        match reply {
            SessionReply::SelfInfo(info) => {
                info!("Signed in as {} ({})", info.username, info.pk);
                self.self_info = Some(info);
            }
            SessionReply::Chatrooms(page) => {
                self.chatroom_page = Some(PageInfo { page: page.page, pages: page.pages });
                if let Some(first) = page.data.first() {
                    self.active = Some(first.clone());
                }
                self.state.replace_chatrooms(page.data);
            }
            SessionReply::Messages(page) => {
                self.message_page = Some(PageInfo { page: page.page, pages: page.pages });
                self.state
                    .replace_messages(page.data.into_iter().map(Message::from).collect());
            }
            SessionReply::Uploaded { chatroom, files } => {
                return files.iter().map(|f| OutboundFrame::file(chatroom, &f.id)).collect();
            }
            SessionReply::Failed => {}
        }
        Vec::new()
    }

    pub async fn load_self(&mut self) {
        let reply = self.request_self().await;
        self.apply_reply(reply);
    }

    pub async fn load_chatrooms(&mut self, delta: i32) {
        let reply = self.request_chatrooms(delta).await;
        self.apply_reply(reply);
    }

    pub async fn load_messages(&mut self, delta: i32) {
        let reply = self.request_messages(delta).await;
        self.apply_reply(reply);
    }

    /// Uploads `paths` and returns one file frame per stored file.
    pub async fn send_files(&mut self, paths: Vec<PathBuf>) -> Vec<OutboundFrame> {
        match self.request_upload(paths) {
            Some(request) => {
                let reply = request.await;
                self.apply_reply(reply)
            }
            None => Vec::new(),
        }
    }

    pub fn select_chatroom(&mut self, id: ChatroomId) -> bool {
        match self.state.chatroom(id) {
            Some(room) => {
                self.active = Some(room.clone());
                true
            }
            None => false,
        }
    }

    pub fn visible_messages(&self) -> Vec<&Message> {
        match &self.active {
            Some(room) => self.state.messages_in(room.id).collect(),
            None => Vec::new(),
        }
    }

    pub fn visible_typing(&self) -> Vec<&TypingIndicator> {
        match &self.active {
            Some(room) => self.state.typing_in(room.id).collect(),
            None => Vec::new(),
        }
    }

    pub fn compose_text(&self, text: &str) -> Option<OutboundFrame> {
        let room = self.active.as_ref()?;
        if text.trim().is_empty() {
            return None;
        }
        Some(OutboundFrame::text(room.id, text))
    }

    /// Read receipt for a stored message of the active chatroom.
    pub fn mark_read(&self, message_id: i64) -> Option<OutboundFrame> {
        let room = self.active.as_ref()?;
        self.state
            .messages_in(room.id)
            .find(|m| m.id == message_id && !m.is_pending())
            .map(|m| OutboundFrame::MessageRead { dialog_pk: room.id, message_id: m.id })
    }

    pub fn handle_event(&mut self, event: InboundEvent) -> Dispatch {
        let ctx = DispatchContext {
            active: self.active.as_ref(),
            self_username: self.self_info.as_ref().map(|s| s.username.as_str()),
        };
        self.state.apply(event, &ctx)
    }

    pub fn expire_typing(&mut self, window: std::time::Duration) -> usize {
        self.state.expire_typing(chrono::Utc::now(), window)
    }
}
