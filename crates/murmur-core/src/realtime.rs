use crate::error::CoreError;
use async_trait::async_trait;
use murmur_api::{RoomId, UserId};
use tokio::sync::mpsc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChannelScope {
    /// Row changes involving this identity on either side.
    Participant(UserId),
    /// Row changes inside the room plus its ephemeral broadcasts.
    Room(RoomId),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChannelSpec {
    pub name: String,
    pub scope: ChannelScope,
}

impl ChannelSpec {
    pub fn identity(user: &UserId) -> Self {
        Self {
            name: format!("chat_list_updates:{}", user.value),
            scope: ChannelScope::Participant(user.clone()),
        }
    }

    pub fn room(room: &RoomId) -> Self {
        Self {
            name: format!("room:{}", room.value),
            scope: ChannelScope::Room(room.clone()),
        }
    }
}

/// Push transport. Delivery is at-least-once per channel, unordered across
/// channels, and payloads arrive undecoded.
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    async fn subscribe(
        &self,
        spec: &ChannelSpec,
    ) -> Result<mpsc::UnboundedReceiver<serde_json::Value>, CoreError>;
    async fn publish_typing(&self, room: &RoomId, from: &UserId) -> Result<(), CoreError>;
}
