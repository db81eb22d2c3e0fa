use lru::LruCache;
use murmur_api::{PeerProfile, UserId};
use std::num::NonZeroUsize;

/// Sender profiles by id, evicting the least recently used entry once
/// `capacity` is reached.
pub struct ProfileCache {
    entries: LruCache<UserId, PeerProfile>,
}

impl ProfileCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub fn get(&mut self, id: &UserId) -> Option<PeerProfile> {
        self.entries.get(id).cloned()
    }

    pub fn insert(&mut self, profile: PeerProfile) {
        self.entries.put(profile.id.clone(), profile);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.cap().get()
    }
}
