use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize};

pub type UserId = i64;
pub type ChatroomId = i64;

/// The backend sends most primary keys as numeric strings ("1") but a few
/// endpoints emit plain numbers. Both decode to the same id.
#[derive(Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(i64),
    Text(String),
}

impl WireId {
    fn into_id<E: de::Error>(self) -> Result<i64, E> {
        match self {
            WireId::Number(n) => Ok(n),
            WireId::Text(s) => s
                .trim()
                .parse()
                .map_err(|_| E::custom(format!("invalid numeric id {:?}", s))),
        }
    }
}

pub(crate) fn de_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    WireId::deserialize(deserializer)?.into_id()
}

/// File ids are opaque to the client; numbers are kept in their decimal form.
fn de_text_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match WireId::deserialize(deserializer)? {
        WireId::Number(n) => n.to_string(),
        WireId::Text(s) => s,
    })
}

pub(crate) fn de_id_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<i64>, D::Error> {
    Vec::<WireId>::deserialize(deserializer)?
        .into_iter()
        .map(WireId::into_id)
        .collect()
}

/// A conversation the local user takes part in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Chatroom {
    pub id: ChatroomId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Other participants, parallel to `usernames`.
    #[serde(rename = "other_user_id", alias = "other_users_id", deserialize_with = "de_id_list", default)]
    pub other_user_ids: Vec<UserId>,
    #[serde(rename = "username", default)]
    pub usernames: Vec<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub modified: DateTime<Utc>,
    #[serde(default)]
    pub last_message: Option<HistoryMessage>,
    #[serde(default)]
    pub unread_count: u32,
}

impl Chatroom {
    pub fn new(id: ChatroomId, name: &str, roster: &[(UserId, &str)]) -> Self {
        let now = Utc::now();
        Chatroom {
            id,
            name: name.to_string(),
            description: String::new(),
            other_user_ids: roster.iter().map(|(pk, _)| *pk).collect(),
            usernames: roster.iter().map(|(_, name)| name.to_string()).collect(),
            created: now,
            modified: now,
            last_message: None,
            unread_count: 0,
        }
    }

    /// Looks `user` up in the roster and returns their username.
    ///
    /// A roster entry without a matching username resolves to an empty name.
    pub fn participant(&self, user: UserId) -> Option<String> {
        let idx = self.other_user_ids.iter().position(|pk| *pk == user)?;
        Some(self.usernames.get(idx).cloned().unwrap_or_default())
    }

    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            self.name.clone()
        } else if !self.usernames.is_empty() {
            self.usernames.join(", ")
        } else {
            format!("#{}", self.id)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    #[serde(deserialize_with = "de_text_id")]
    pub id: String,
    pub url: String,
    pub name: String,
    pub size: u64,
}

/// A message as served by the `messages/` history endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryMessage {
    pub id: i64,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub sent: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub edited: DateTime<Utc>,
    #[serde(default)]
    pub read: bool,
    #[serde(default)]
    pub file: Option<FileAttachment>,
    #[serde(deserialize_with = "de_id")]
    pub sender: UserId,
    #[serde(deserialize_with = "de_id")]
    pub recipient: ChatroomId,
    #[serde(default)]
    pub sender_username: String,
    #[serde(default)]
    pub out: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    File,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Database id, or the negative `random_id` until the server assigns one.
    pub id: i64,
    pub kind: MessageKind,
    pub text: String,
    pub sent: DateTime<Utc>,
    pub edited: Option<DateTime<Utc>>,
    pub read: bool,
    pub file: Option<FileAttachment>,
    pub sender: UserId,
    pub sender_username: String,
    pub recipient: ChatroomId,
    pub out: bool,
}

impl Message {
    pub fn is_pending(&self) -> bool {
        self.id < 0
    }
}

impl From<HistoryMessage> for Message {
    fn from(m: HistoryMessage) -> Self {
        Message {
            id: m.id,
            kind: if m.file.is_some() { MessageKind::File } else { MessageKind::Text },
            text: m.text.unwrap_or_default(),
            sent: m.sent,
            edited: Some(m.edited),
            read: m.read,
            file: m.file,
            sender: m.sender,
            sender_username: m.sender_username,
            recipient: m.recipient,
            out: m.out,
        }
    }
}

/// Transient "user is typing" marker, one per (chatroom, sender).
#[derive(Debug, Clone, PartialEq)]
pub struct TypingIndicator {
    pub chatroom: ChatroomId,
    pub sender: UserId,
    pub sender_username: String,
    pub since: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SelfInfo {
    pub username: String,
    #[serde(deserialize_with = "de_id")]
    pub pk: UserId,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Page<T> {
    pub page: u32,
    pub pages: u32,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Offline,
}
