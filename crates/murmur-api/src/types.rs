use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Ids starting with this prefix were minted locally and have not been
/// confirmed by the authoritative store.
pub const PROVISIONAL_PREFIX: &str = "temp-";

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId {
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId {
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId {
    pub value: String,
}

impl UserId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl Display for UserId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl MessageId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn random() -> Self {
        Self::new(Uuid::new_v4().to_string())
    }

    pub fn provisional() -> Self {
        Self::new(format!("{}{}", PROVISIONAL_PREFIX, Uuid::new_v4()))
    }

    pub fn is_provisional(&self) -> bool {
        self.value.starts_with(PROVISIONAL_PREFIX)
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl RoomId {
    /// Room membership is the sorted pair of participants, so both sides
    /// derive the same id.
    pub fn for_pair(a: &UserId, b: &UserId) -> Self {
        let (left, right) = if a <= b { (a, b) } else { (b, a) };
        Self {
            value: format!("{}_{}", left.value, right.value),
        }
    }
}

impl Display for RoomId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.value)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Audio,
}

impl MessageKind {
    pub fn is_media(&self) -> bool {
        !matches!(self, MessageKind::Text)
    }

    /// Content stored alongside a media reference.
    pub fn placeholder(&self) -> &'static str {
        match self {
            MessageKind::Text => "",
            MessageKind::Image => "Image",
            MessageKind::Audio => "Audio",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: u64,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(rename = "file_url", default, skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    #[serde(default)]
    pub read: bool,
}

impl Message {
    pub fn room(&self) -> RoomId {
        RoomId::for_pair(&self.sender_id, &self.receiver_id)
    }

    pub fn is_provisional(&self) -> bool {
        self.id.is_provisional()
    }

    pub fn is_from(&self, user: &UserId) -> bool {
        &self.sender_id == user
    }

    pub fn involves(&self, user: &UserId) -> bool {
        &self.sender_id == user || &self.receiver_id == user
    }

    /// The other participant, seen from `local`. `None` when `local` is not
    /// part of the message.
    pub fn counterpart(&self, local: &UserId) -> Option<&UserId> {
        if &self.sender_id == local {
            Some(&self.receiver_id)
        } else if &self.receiver_id == local {
            Some(&self.sender_id)
        } else {
            None
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "file_url", skip_serializing_if = "Option::is_none")]
    pub media_ref: Option<String>,
    pub read: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerProfile {
    pub id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

impl PeerProfile {
    pub fn new(id: UserId) -> Self {
        Self {
            id,
            full_name: None,
            avatar_url: None,
            account_id: None,
            last_seen: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or("User")
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RowEvent {
    Insert,
    Update,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypingPayload {
    pub user_id: UserId,
}

pub const TYPING_EVENT: &str = "typing";

/// Envelope delivered by the push transport. Row changes carry a full
/// message record; broadcasts carry an event name and a free-form payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushFrame {
    RowChange {
        event: RowEvent,
        record: Message,
    },
    Broadcast {
        event: String,
        payload: serde_json::Value,
    },
}

impl PushFrame {
    pub fn inserted(record: Message) -> Self {
        PushFrame::RowChange {
            event: RowEvent::Insert,
            record,
        }
    }

    pub fn updated(record: Message) -> Self {
        PushFrame::RowChange {
            event: RowEvent::Update,
            record,
        }
    }

    pub fn typing(user_id: UserId) -> Self {
        PushFrame::Broadcast {
            event: TYPING_EVENT.to_string(),
            payload: serde_json::json!({ "user_id": user_id.value }),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ValidationLimits {
    pub max_text_bytes: usize,
    pub max_media_bytes: usize,
}
