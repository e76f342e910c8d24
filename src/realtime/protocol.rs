// Realtime gateway wire format
// Every frame is a JSON object tagged by a numeric `msg_type`.

use rand::Rng;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::models::{de_id, ChatroomId, FileAttachment, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    WentOnline = 1,
    WentOffline = 2,
    TextMessage = 3,
    FileMessage = 4,
    IsTyping = 5,
    MessageRead = 6,
    ErrorOccurred = 7,
    MessageIdCreated = 8,
    NewUnreadCount = 9,
    TypingStopped = 10,
}

impl MessageType {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u64> for MessageType {
    type Error = ProtocolError;

    fn try_from(code: u64) -> Result<Self, Self::Error> {
        Ok(match code {
            1 => MessageType::WentOnline,
            2 => MessageType::WentOffline,
            3 => MessageType::TextMessage,
            4 => MessageType::FileMessage,
            5 => MessageType::IsTyping,
            6 => MessageType::MessageRead,
            7 => MessageType::ErrorOccurred,
            8 => MessageType::MessageIdCreated,
            9 => MessageType::NewUnreadCount,
            10 => MessageType::TypingStopped,
            other => return Err(ProtocolError::UnknownType(other)),
        })
    }
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame has no integer msg_type")]
    MissingType,
    #[error("unknown msg_type {0}")]
    UnknownType(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UserEvent {
    #[serde(deserialize_with = "de_id")]
    pub user_pk: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TextMessageEvent {
    pub random_id: i64,
    pub text: String,
    #[serde(deserialize_with = "de_id")]
    pub sender: UserId,
    pub sender_username: String,
    #[serde(deserialize_with = "de_id")]
    pub receiver: ChatroomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FileMessageEvent {
    pub db_id: i64,
    pub file: FileAttachment,
    #[serde(deserialize_with = "de_id")]
    pub sender: UserId,
    pub sender_username: String,
    #[serde(deserialize_with = "de_id")]
    pub receiver: ChatroomId,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageReadEvent {
    pub message_id: i64,
    #[serde(deserialize_with = "de_id")]
    pub sender: ChatroomId,
    #[serde(deserialize_with = "de_id")]
    pub receiver: UserId,
}

/// `error` is sent as a `[code, description]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorEvent {
    pub error: (i64, String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MessageIdCreatedEvent {
    pub random_id: i64,
    pub db_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnreadCountEvent {
    #[serde(deserialize_with = "de_id")]
    pub sender: ChatroomId,
    pub unread_count: u32,
}

/// One parsed frame received from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    WentOnline(UserEvent),
    WentOffline(UserEvent),
    TextMessage(TextMessageEvent),
    FileMessage(FileMessageEvent),
    IsTyping(UserEvent),
    MessageRead(MessageReadEvent),
    ErrorOccurred(ErrorEvent),
    MessageIdCreated(MessageIdCreatedEvent),
    NewUnreadCount(UnreadCountEvent),
    TypingStopped(UserEvent),
}

impl InboundEvent {
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(frame)?;
        let code = value
            .get("msg_type")
            .and_then(Value::as_u64)
            .ok_or(ProtocolError::MissingType)?;

        let event = match MessageType::try_from(code)? {
            MessageType::WentOnline => InboundEvent::WentOnline(serde_json::from_value(value)?),
            MessageType::WentOffline => InboundEvent::WentOffline(serde_json::from_value(value)?),
            MessageType::TextMessage => InboundEvent::TextMessage(serde_json::from_value(value)?),
            MessageType::FileMessage => InboundEvent::FileMessage(serde_json::from_value(value)?),
            MessageType::IsTyping => InboundEvent::IsTyping(serde_json::from_value(value)?),
            MessageType::MessageRead => InboundEvent::MessageRead(serde_json::from_value(value)?),
            MessageType::ErrorOccurred => InboundEvent::ErrorOccurred(serde_json::from_value(value)?),
            MessageType::MessageIdCreated => {
                InboundEvent::MessageIdCreated(serde_json::from_value(value)?)
            }
            MessageType::NewUnreadCount => InboundEvent::NewUnreadCount(serde_json::from_value(value)?),
            MessageType::TypingStopped => InboundEvent::TypingStopped(serde_json::from_value(value)?),
        };
        Ok(event)
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            InboundEvent::WentOnline(_) => MessageType::WentOnline,
            InboundEvent::WentOffline(_) => MessageType::WentOffline,
            InboundEvent::TextMessage(_) => MessageType::TextMessage,
            InboundEvent::FileMessage(_) => MessageType::FileMessage,
            InboundEvent::IsTyping(_) => MessageType::IsTyping,
            InboundEvent::MessageRead(_) => MessageType::MessageRead,
            InboundEvent::ErrorOccurred(_) => MessageType::ErrorOccurred,
            InboundEvent::MessageIdCreated(_) => MessageType::MessageIdCreated,
            InboundEvent::NewUnreadCount(_) => MessageType::NewUnreadCount,
            InboundEvent::TypingStopped(_) => MessageType::TypingStopped,
        }
    }
}

/// A frame sent to the gateway. Delivery is not acknowledged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text { dialog_pk: ChatroomId, text: String, random_id: i64 },
    File { dialog_pk: ChatroomId, file_id: String, random_id: i64 },
    IsTyping { dialog_pk: ChatroomId },
    MessageRead { dialog_pk: ChatroomId, message_id: i64 },
    TypingStopped { dialog_pk: ChatroomId },
}

impl OutboundFrame {
    pub fn text(dialog_pk: ChatroomId, text: &str) -> Self {
        OutboundFrame::Text {
            dialog_pk,
            text: text.to_string(),
            random_id: generate_random_id(),
        }
    }

    pub fn file(dialog_pk: ChatroomId, file_id: &str) -> Self {
        OutboundFrame::File {
            dialog_pk,
            file_id: file_id.to_string(),
            random_id: generate_random_id(),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            OutboundFrame::Text { .. } => MessageType::TextMessage,
            OutboundFrame::File { .. } => MessageType::FileMessage,
            OutboundFrame::IsTyping { .. } => MessageType::IsTyping,
            OutboundFrame::MessageRead { .. } => MessageType::MessageRead,
            OutboundFrame::TypingStopped { .. } => MessageType::TypingStopped,
        }
    }

    pub fn dialog_pk(&self) -> ChatroomId {
        match self {
            OutboundFrame::Text { dialog_pk, .. }
            | OutboundFrame::File { dialog_pk, .. }
            | OutboundFrame::IsTyping { dialog_pk }
            | OutboundFrame::MessageRead { dialog_pk, .. }
            | OutboundFrame::TypingStopped { dialog_pk } => *dialog_pk,
        }
    }

    /// The gateway expects `dialog_pk` as a string and rejects positive
    /// `random_id`s.
    pub fn to_value(&self) -> Value {
        let mut value = match self {
            OutboundFrame::Text { dialog_pk, text, random_id } => json!({
                "text": text,
                "dialog_pk": dialog_pk.to_string(),
                "random_id": random_id,
            }),
            OutboundFrame::File { dialog_pk, file_id, random_id } => json!({
                "file_id": file_id,
                "dialog_pk": dialog_pk.to_string(),
                "random_id": random_id,
            }),
            OutboundFrame::MessageRead { dialog_pk, message_id } => json!({
                "dialog_pk": dialog_pk.to_string(),
                "message_id": message_id,
            }),
            OutboundFrame::IsTyping { dialog_pk } | OutboundFrame::TypingStopped { dialog_pk } => json!({
                "dialog_pk": dialog_pk.to_string(),
            }),
        };
        value["msg_type"] = json!(self.message_type().code());
        value
    }
}

/// Temporary id for a message that has not been stored yet, in `(-2^31, -1]`.
/// Stored ids are positive, so zero is never handed out.
pub fn generate_random_id() -> i64 {
    -rand::thread_rng().gen_range(1..(1i64 << 31))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_message_frame() {
        let frame = r#"{"msg_type": 3, "random_id": -1945908859, "text": "Hey", "sender": "1", "sender_username": "admin", "receiver": "1"}"#;
        let event = InboundEvent::parse(frame).unwrap();
        assert_eq!(
            event,
            InboundEvent::TextMessage(TextMessageEvent {
                random_id: -1945908859,
                text: "Hey".to_string(),
                sender: 1,
                sender_username: "admin".to_string(),
                receiver: 1,
            })
        );
        assert_eq!(event.message_type(), MessageType::TextMessage);
    }

    #[test]
    fn parses_bookkeeping_frames() {
        let created = InboundEvent::parse(r#"{"msg_type": 8, "random_id": -1945908859, "db_id": 5}"#).unwrap();
        assert_eq!(
            created,
            InboundEvent::MessageIdCreated(MessageIdCreatedEvent { random_id: -1945908859, db_id: 5 })
        );

        let unread = InboundEvent::parse(r#"{"msg_type": 9, "sender": "1", "unread_count": 0}"#).unwrap();
        assert_eq!(unread, InboundEvent::NewUnreadCount(UnreadCountEvent { sender: 1, unread_count: 0 }));

        let error = InboundEvent::parse(r#"{"msg_type": 7, "error": [2, "'text' should not be blank"]}"#).unwrap();
        match error {
            InboundEvent::ErrorOccurred(e) => assert_eq!(e.error.0, 2),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn typing_frames_accept_numeric_user_pk() {
        let typing = InboundEvent::parse(r#"{"msg_type": 5, "user_pk": 2}"#).unwrap();
        let stopped = InboundEvent::parse(r#"{"msg_type": 10, "user_pk": "2"}"#).unwrap();
        assert_eq!(typing, InboundEvent::IsTyping(UserEvent { user_pk: 2 }));
        assert_eq!(stopped, InboundEvent::TypingStopped(UserEvent { user_pk: 2 }));
    }

    #[test]
    fn rejects_bad_frames() {
        assert!(matches!(InboundEvent::parse("not json"), Err(ProtocolError::Json(_))));
        assert!(matches!(InboundEvent::parse(r#"{"text": "x"}"#), Err(ProtocolError::MissingType)));
        assert!(matches!(InboundEvent::parse(r#"{"msg_type": 42}"#), Err(ProtocolError::UnknownType(42))));
        assert!(matches!(InboundEvent::parse(r#"{"msg_type": 3, "text": "x"}"#), Err(ProtocolError::Json(_))));
    }

    #[test]
    fn outbound_text_frame_shape() {
        let frame = OutboundFrame::Text { dialog_pk: 1, text: "Hey".to_string(), random_id: -123 };
        assert_eq!(
            frame.to_value(),
            json!({"msg_type": 3, "text": "Hey", "dialog_pk": "1", "random_id": -123})
        );
        assert_eq!(
            OutboundFrame::TypingStopped { dialog_pk: 4 }.to_value(),
            json!({"msg_type": 10, "dialog_pk": "4"})
        );
    }

    #[test]
    fn random_ids_are_always_negative() {
        for _ in 0..10_000 {
            let id = generate_random_id();
            assert!(id < 0 && id > -(1i64 << 31), "id {} out of range", id);
        }
        match OutboundFrame::text(3, "hi") {
            OutboundFrame::Text { random_id, dialog_pk, .. } => {
                assert!(random_id < 0);
                assert_eq!(dialog_pk, 3);
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }
}
