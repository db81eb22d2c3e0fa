use crate::storage::SessionStorage;
use murmur_api::UserId;
use std::sync::Arc;

/// Session-scoped "last locally read" timestamps, one per direct
/// conversation (keyed by the peer). Consulted as local truth when the
/// store still reports messages as unread.
#[derive(Clone)]
pub struct ReadWatermarks {
    storage: Arc<dyn SessionStorage>,
}

impl ReadWatermarks {
    pub fn new(storage: Arc<dyn SessionStorage>) -> Self {
        Self { storage }
    }

    pub fn get(&self, peer: &UserId) -> u64 {
        self.storage
            .get(&Self::key(peer))
            .and_then(|raw| raw.parse::<u64>().ok())
            .unwrap_or(0)
    }

    /// Advances the watermark; never moves it backward. Returns the value
    /// in effect after the call.
    pub fn set(&self, peer: &UserId, at_ms: u64) -> u64 {
        let current = self.get(peer);
        if at_ms <= current {
            return current;
        }
        self.storage.set(&Self::key(peer), at_ms.to_string());
        at_ms
    }

    pub fn covers(&self, peer: &UserId, created_at: u64) -> bool {
        created_at <= self.get(peer)
    }

    pub fn clear(&self) {
        self.storage.clear();
    }

    fn key(peer: &UserId) -> String {
        format!("read:{}", peer.value)
    }
}
