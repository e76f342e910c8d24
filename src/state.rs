use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::time::Duration;

use crate::models::{Chatroom, ChatroomId, Message, MessageKind, Presence, TypingIndicator, UserId};
use crate::realtime::protocol::InboundEvent;

/// Per-dispatch inputs owned by the caller rather than read from shared state.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchContext<'a> {
    pub active: Option<&'a Chatroom>,
    pub self_username: Option<&'a str>,
}

/// What an inbound event changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    MessageAppended { id: i64, chatroom: ChatroomId },
    MessageIdAssigned { random_id: i64, db_id: i64 },
    MessageRead { id: i64 },
    TypingStarted { chatroom: ChatroomId, sender: UserId },
    TypingStopped { chatroom: ChatroomId, sender: UserId },
    UnreadCount { chatroom: ChatroomId, count: u32 },
    Presence { user: UserId, presence: Presence },
    ServerError { code: i64, description: String },
    Ignored,
}

/// Client-side view of the conversation data.
///
/// Messages live in one global list; per-room views are filters over it.
#[derive(Debug, Default)]
pub struct ChatState {
    chatrooms: Vec<Chatroom>,
    messages: Vec<Message>,
    typing: Vec<TypingIndicator>,
    presence: HashMap<UserId, Presence>,
    /// Sender and chatroom of the last live message.
    last_live: Option<(UserId, ChatroomId)>,
}

impl ChatState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chatrooms(&self) -> &[Chatroom] {
        &self.chatrooms
    }

    pub fn chatroom(&self, id: ChatroomId) -> Option<&Chatroom> {
        self.chatrooms.iter().find(|c| c.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn typing(&self) -> &[TypingIndicator] {
        &self.typing
    }

    pub fn replace_chatrooms(&mut self, chatrooms: Vec<Chatroom>) {
        self.chatrooms = chatrooms;
    }

    pub fn replace_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn messages_in(&self, chatroom: ChatroomId) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(move |m| m.recipient == chatroom)
    }

    pub fn typing_in(&self, chatroom: ChatroomId) -> impl Iterator<Item = &TypingIndicator> {
        self.typing.iter().filter(move |t| t.chatroom == chatroom)
    }

    pub fn presence(&self, user: UserId) -> Presence {
        self.presence.get(&user).copied().unwrap_or(Presence::Offline)
    }

    /// Drops typing indicators announced more than `window` before `now`.
    pub fn expire_typing(&mut self, now: DateTime<Utc>, window: Duration) -> usize {
        let window = chrono::Duration::from_std(window).unwrap_or(chrono::Duration::MAX);
        let before = self.typing.len();
        self.typing.retain(|t| now - t.since <= window);
        before - self.typing.len()
    }

    pub fn apply(&mut self, event: InboundEvent, ctx: &DispatchContext<'_>) -> Dispatch {
        self.apply_at(event, ctx, Utc::now())
    }

    /// Same as [`apply`](Self::apply) with an explicit receipt time.
    pub fn apply_at(&mut self, event: InboundEvent, ctx: &DispatchContext<'_>, now: DateTime<Utc>) -> Dispatch {
        match event {
            InboundEvent::TextMessage(e) => {
                let out = ctx.self_username == Some(e.sender_username.as_str());
                let message = Message {
                    id: e.random_id,
                    kind: MessageKind::Text,
                    text: e.text,
                    sent: now,
                    edited: None,
                    read: false,
                    file: None,
                    sender: e.sender,
                    sender_username: e.sender_username,
                    recipient: e.receiver,
                    out,
                };
                self.push_message(message)
            }
            InboundEvent::FileMessage(e) => {
                let out = ctx.self_username == Some(e.sender_username.as_str());
                let message = Message {
                    id: e.db_id,
                    kind: MessageKind::File,
                    text: String::new(),
                    sent: now,
                    edited: None,
                    read: false,
                    file: Some(e.file),
                    sender: e.sender,
                    sender_username: e.sender_username,
                    recipient: e.receiver,
                    out,
                };
                self.push_message(message)
            }
            InboundEvent::IsTyping(e) => {
                let Some(room) = ctx.active else {
                    return Dispatch::Ignored;
                };
                let Some(username) = room.participant(e.user_pk) else {
                    debug!("Typing event from {} who is not in chatroom {}", e.user_pk, room.id);
                    return Dispatch::Ignored;
                };
                self.typing.retain(|t| !(t.chatroom == room.id && t.sender == e.user_pk));
                self.typing.push(TypingIndicator {
                    chatroom: room.id,
                    sender: e.user_pk,
                    sender_username: username,
                    since: now,
                });
                Dispatch::TypingStarted { chatroom: room.id, sender: e.user_pk }
            }
            InboundEvent::TypingStopped(e) => {
                let Some(room) = ctx.active else {
                    return Dispatch::Ignored;
                };
                if room.participant(e.user_pk).is_none() {
                    return Dispatch::Ignored;
                }
                self.typing.retain(|t| !(t.chatroom == room.id && t.sender == e.user_pk));
                Dispatch::TypingStopped { chatroom: room.id, sender: e.user_pk }
            }
            InboundEvent::MessageIdCreated(e) => {
                match self.messages.iter_mut().rev().find(|m| m.id == e.random_id) {
                    Some(message) => {
                        message.id = e.db_id;
                        Dispatch::MessageIdAssigned { random_id: e.random_id, db_id: e.db_id }
                    }
                    None => Dispatch::Ignored,
                }
            }
            InboundEvent::MessageRead(e) => match self.messages.iter_mut().find(|m| m.id == e.message_id) {
                Some(message) => {
                    message.read = true;
                    Dispatch::MessageRead { id: e.message_id }
                }
                None => Dispatch::Ignored,
            },
            InboundEvent::NewUnreadCount(e) => {
                let chatroom = self.unread_target(e.sender);
                match self.chatrooms.iter_mut().find(|c| c.id == chatroom) {
                    Some(room) => {
                        room.unread_count = e.unread_count;
                        Dispatch::UnreadCount { chatroom, count: e.unread_count }
                    }
                    None => Dispatch::Ignored,
                }
            }
            InboundEvent::WentOnline(e) => self.set_presence(e.user_pk, Presence::Online),
            InboundEvent::WentOffline(e) => self.set_presence(e.user_pk, Presence::Offline),
            InboundEvent::ErrorOccurred(e) => {
                let (code, description) = e.error;
                warn!("Gateway reported error {}: {}", code, description);
                Dispatch::ServerError { code, description }
            }
        }
    }

    fn push_message(&mut self, message: Message) -> Dispatch {
        let dispatch = Dispatch::MessageAppended { id: message.id, chatroom: message.recipient };
        debug!("Appending message {} to chatroom {}", message.id, message.recipient);
        self.last_live = Some((message.sender, message.recipient));
        self.messages.push(message);
        dispatch
    }

    /// Unread counters follow a new message with `sender` set to the author,
    /// and a read receipt with `sender` set to the chatroom.
    fn unread_target(&self, sender: i64) -> ChatroomId {
        match self.last_live {
            Some((author, chatroom)) if author == sender => chatroom,
            _ => sender,
        }
    }

    fn set_presence(&mut self, user: UserId, presence: Presence) -> Dispatch {
        info!("User {} is now {:?}", user, presence);
        self.presence.insert(user, presence);
        Dispatch::Presence { user, presence }
    }
}
