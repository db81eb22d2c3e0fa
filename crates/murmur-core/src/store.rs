use crate::error::CoreError;
use async_trait::async_trait;
use murmur_api::{Message, MessageId, NewMessage, PeerProfile, UserId};

/// The authoritative remote datastore. Every call is a suspension point.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Most recent `limit` messages exchanged between `a` and `b`, oldest first.
    async fn room_history(
        &self,
        a: &UserId,
        b: &UserId,
        limit: usize,
    ) -> Result<Vec<Message>, CoreError>;
    async fn latest_in_room(&self, a: &UserId, b: &UserId) -> Result<Option<Message>, CoreError>;
    async fn unread_count(&self, sender: &UserId, receiver: &UserId) -> Result<u64, CoreError>;
    async fn contacts(&self, owner: &UserId) -> Result<Vec<PeerProfile>, CoreError>;
    async fn profile(&self, user: &UserId) -> Result<Option<PeerProfile>, CoreError>;
    async fn insert(&self, message: NewMessage) -> Result<Message, CoreError>;
    async fn mark_read_ids(&self, ids: &[MessageId]) -> Result<(), CoreError>;
    async fn mark_read_from(&self, sender: &UserId, receiver: &UserId) -> Result<(), CoreError>;
    async fn touch_last_seen(&self, user: &UserId, at_ms: u64) -> Result<(), CoreError>;
}
