use crate::badge;
use crate::config::CoreConfig;
use crate::conversation::LoadState;
use crate::profiles::ProfileCache;
use crate::watermark::ReadWatermarks;
use lru::LruCache;
use murmur_api::{Message, MessageId, MessageKind, PeerProfile, UserId};
use serde::Serialize;
use std::num::NonZeroUsize;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConversationEntry {
    pub peer: PeerProfile,
    pub last_message_preview: String,
    pub last_message_kind: MessageKind,
    pub last_message_at: Option<u64>,
    pub last_message_sender: Option<UserId>,
    pub unread_count: u32,
}

impl ConversationEntry {
    fn empty(peer: PeerProfile) -> Self {
        Self {
            peer,
            last_message_preview: String::new(),
            last_message_kind: MessageKind::Text,
            last_message_at: None,
            last_message_sender: None,
            unread_count: 0,
        }
    }

    fn set_last(&mut self, message: &Message) {
        self.last_message_preview = message.content.clone();
        self.last_message_kind = message.kind;
        self.last_message_at = Some(message.created_at);
        self.last_message_sender = Some(message.sender_id.clone());
    }

    /// Forces the count to zero when the last message is ours or the
    /// watermark already covers it.
    fn settle(&mut self, local: &UserId, watermark: u64) {
        let self_authored = self.last_message_sender.as_ref() == Some(local);
        let covered = self.last_message_at.map_or(true, |at| at <= watermark);
        if self_authored || covered {
            self.unread_count = 0;
        }
    }
}

/// What a refresh fetched for one contact.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContactSummary {
    pub profile: PeerProfile,
    pub latest: Option<Message>,
    pub raw_unread: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RosterInsert {
    Unrelated,
    Duplicate,
    Updated { peer: UserId },
    UnknownPeer { peer: UserId },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RosterSnapshot {
    pub state: LoadState,
    pub entries: Vec<ConversationEntry>,
    pub total_unread: u32,
}

/// Displayed unread count for a contact given what the store reported.
pub fn derive_unread(
    local: &UserId,
    latest: Option<&Message>,
    raw_unread: u64,
    watermark: u64,
) -> u32 {
    match latest {
        None => 0,
        Some(m) if m.is_from(local) => 0,
        Some(m) if m.created_at <= watermark => 0,
        Some(_) => u32::try_from(raw_unread).unwrap_or(u32::MAX),
    }
}

/// Owns the sorted list of conversations.
pub struct Roster {
    local: UserId,
    state: LoadState,
    entries: Vec<ConversationEntry>,
    seen: LruCache<MessageId, ()>,
    profiles: ProfileCache,
    refresh_generation: u64,
    refreshing: bool,
    /// Inserts applied while a refresh is in flight; its snapshot may
    /// predate them.
    since_refresh: Vec<Message>,
}

impl Roster {
    pub fn new(local: UserId, config: &CoreConfig) -> Self {
        let seen_capacity =
            NonZeroUsize::new(config.seen_ids_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            local,
            state: LoadState::Loading,
            entries: Vec::new(),
            seen: LruCache::new(seen_capacity),
            profiles: ProfileCache::new(config.profile_cache_capacity),
            refresh_generation: 0,
            refreshing: false,
            since_refresh: Vec::new(),
        }
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn entries(&self) -> &[ConversationEntry] {
        &self.entries
    }

    pub fn entry(&self, peer: &UserId) -> Option<&ConversationEntry> {
        self.entries.iter().find(|e| &e.peer.id == peer)
    }

    pub fn total_unread(&self) -> u32 {
        badge::total(&self.entries)
    }

    pub fn snapshot(&self) -> RosterSnapshot {
        RosterSnapshot {
            state: self.state.clone(),
            entries: self.entries.clone(),
            total_unread: self.total_unread(),
        }
    }

    pub fn search(&self, query: &str) -> Vec<ConversationEntry> {
        let needle = query.trim().to_lowercase();
        self.entries
            .iter()
            .filter(|e| {
                needle.is_empty()
                    || e.peer.display_name().to_lowercase().contains(&needle)
                    || e
                        .peer
                        .account_id
                        .as_deref()
                        .map_or(false, |a| a.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    pub fn cached_profile(&mut self, peer: &UserId) -> Option<PeerProfile> {
        if let Some(profile) = self.profiles.get(peer) {
            return Some(profile);
        }
        self.entry(peer).map(|e| e.peer.clone())
    }

    pub fn remember_profile(&mut self, profile: PeerProfile) {
        self.profiles.insert(profile);
    }

    pub fn profile_cache(&self) -> &ProfileCache {
        &self.profiles
    }

    /// Starts a refresh and returns its generation. Only an empty roster
    /// goes back to `Loading`.
    pub fn begin_refresh(&mut self) -> u64 {
        self.refresh_generation += 1;
        self.refreshing = true;
        self.since_refresh.clear();
        if self.entries.is_empty() {
            self.state = LoadState::Loading;
        }
        self.refresh_generation
    }

    /// Replaces the list with freshly fetched summaries, then replays the
    /// live inserts the snapshot missed. Results from a superseded refresh
    /// are ignored.
    pub fn apply_refresh(
        &mut self,
        generation: u64,
        summaries: Vec<ContactSummary>,
        watermarks: &ReadWatermarks,
    ) -> bool {
        if generation != self.refresh_generation {
            return false;
        }
        let mut entries = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let watermark = watermarks.get(&summary.profile.id);
            let unread = derive_unread(
                &self.local,
                summary.latest.as_ref(),
                summary.raw_unread,
                watermark,
            );
            self.profiles.insert(summary.profile.clone());
            let mut entry = ConversationEntry::empty(summary.profile);
            if let Some(latest) = summary.latest.as_ref() {
                entry.set_last(latest);
                self.seen.put(latest.id.clone(), ());
            }
            entry.unread_count = unread;
            let horizon = entry.last_message_at;
            for message in self.since_refresh.iter() {
                if message.counterpart(&self.local) != Some(&entry.peer.id) {
                    continue;
                }
                if horizon.map_or(false, |at| message.created_at <= at) {
                    continue;
                }
                Self::replay(&self.local, &mut entry, message, watermarks);
            }
            entries.push(entry);
        }
        self.entries = entries;
        self.refreshing = false;
        self.since_refresh.clear();
        self.sort();
        self.state = LoadState::Ready;
        true
    }

    fn replay(
        local: &UserId,
        entry: &mut ConversationEntry,
        message: &Message,
        watermarks: &ReadWatermarks,
    ) {
        if entry
            .last_message_at
            .map_or(true, |at| message.created_at >= at)
        {
            entry.set_last(message);
        }
        let peer = &entry.peer.id;
        if !message.is_from(local) && !message.read && !watermarks.covers(peer, message.created_at)
        {
            entry.unread_count = entry.unread_count.saturating_add(1);
        }
        let watermark = watermarks.get(peer);
        entry.settle(local, watermark);
    }

    pub fn fail_refresh(&mut self, generation: u64, reason: String) -> bool {
        if generation != self.refresh_generation {
            return false;
        }
        self.refreshing = false;
        self.since_refresh.clear();
        if self.entries.is_empty() {
            self.state = LoadState::Failed(reason);
        } else {
            log::warn!(
                "roster refresh failed, keeping {} entries: {}",
                self.entries.len(),
                reason
            );
            self.state = LoadState::Ready;
        }
        true
    }

    pub fn on_insert(
        &mut self,
        message: &Message,
        in_view: bool,
        now_ms: u64,
        watermarks: &ReadWatermarks,
    ) -> RosterInsert {
        let Some(peer) = message.counterpart(&self.local).cloned() else {
            return RosterInsert::Unrelated;
        };
        if self.seen.put(message.id.clone(), ()).is_some() {
            return RosterInsert::Duplicate;
        }
        let Some(pos) = self.entries.iter().position(|e| e.peer.id == peer) else {
            return RosterInsert::UnknownPeer { peer };
        };
        if self.refreshing {
            self.since_refresh.push(message.clone());
        }
        let mut entry = self.entries.remove(pos);
        let newest = entry
            .last_message_at
            .map_or(true, |at| message.created_at >= at);
        if newest {
            entry.set_last(message);
        }
        if message.is_from(&self.local) {
            entry.unread_count = 0;
            watermarks.set(&peer, now_ms.max(message.created_at));
        } else if in_view {
            entry.unread_count = 0;
            watermarks.set(&peer, message.created_at);
        } else if message.read {
            watermarks.set(&peer, message.created_at);
        } else if !watermarks.covers(&peer, message.created_at) {
            entry.unread_count = entry.unread_count.saturating_add(1);
        }
        entry.settle(&self.local, watermarks.get(&peer));
        if newest {
            self.entries.insert(0, entry);
        } else {
            self.entries.insert(pos, entry);
        }
        RosterInsert::Updated { peer }
    }

    /// A message addressed to us was marked read by the store, possibly by
    /// another session of the same identity.
    pub fn on_read_update(&mut self, message: &Message, watermarks: &ReadWatermarks) -> bool {
        if message.receiver_id != self.local || !message.read {
            return false;
        }
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.peer.id == message.sender_id)
        else {
            return false;
        };
        let read_through = entry
            .last_message_at
            .map_or(message.created_at, |at| at.max(message.created_at));
        watermarks.set(&message.sender_id, read_through);
        std::mem::replace(&mut entry.unread_count, 0) != 0
    }

    /// Optimistically zeroes the count and advances the watermark to now.
    pub fn on_conversation_opened(
        &mut self,
        peer: &UserId,
        now_ms: u64,
        watermarks: &ReadWatermarks,
    ) -> bool {
        watermarks.set(peer, now_ms);
        match self.entries.iter_mut().find(|e| &e.peer.id == peer) {
            Some(entry) => std::mem::replace(&mut entry.unread_count, 0) != 0,
            None => false,
        }
    }

    /// Re-applies the watermark after it moved outside the roster.
    pub fn settle(&mut self, peer: &UserId, watermarks: &ReadWatermarks) -> bool {
        let local = self.local.clone();
        match self.entries.iter_mut().find(|e| &e.peer.id == peer) {
            Some(entry) => {
                let before = entry.unread_count;
                entry.settle(&local, watermarks.get(peer));
                before != entry.unread_count
            }
            None => false,
        }
    }

    pub fn update_profile(&mut self, profile: PeerProfile) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.peer.id == profile.id) {
            entry.peer = profile.clone();
        }
        self.profiles.insert(profile);
    }

    fn sort(&mut self) {
        self.entries
            .sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
    }
}
