use crate::config::CoreConfig;
use crate::error::CoreError;
use crate::presence::{presence_at, PresenceStatus};
use crate::scheduler::{ScheduledTask, Scheduler, TimerEvent};
use murmur_api::{
    validate_outgoing, Message, MessageId, MessageKind, NewMessage, PeerProfile, RoomId, UserId,
    ValidationLimits,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Draft {
    pub content: String,
    pub kind: MessageKind,
    pub media_ref: Option<String>,
}

impl Draft {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            kind: MessageKind::Text,
            media_ref: None,
        }
    }

    pub fn media(kind: MessageKind, media_ref: String) -> Self {
        Self {
            content: kind.placeholder().to_string(),
            kind,
            media_ref: Some(media_ref),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Not a message of this room.
    Foreign,
    /// Already in the list.
    Duplicate,
    Applied {
        /// Provisional entries dropped in favor of this row.
        superseded: usize,
        /// Ids to mark read right away.
        mark_read: Vec<MessageId>,
        cleared_typing: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConversationSnapshot {
    pub peer: PeerProfile,
    pub room: RoomId,
    pub state: LoadState,
    pub messages: Vec<Message>,
    pub peer_typing: bool,
    pub presence: PresenceStatus,
    pub uploading: u32,
}

/// Owns the message list of one open conversation.
pub struct ConversationSync {
    local: UserId,
    peer: PeerProfile,
    room: RoomId,
    epoch: u64,
    config: CoreConfig,
    scheduler: Scheduler,
    state: LoadState,
    messages: Vec<Message>,
    read_requested: HashSet<MessageId>,
    confirmed: HashMap<MessageId, Message>,
    /// Sends whose provisional entry an earlier echo replaced before the
    /// store answered.
    superseded: HashSet<MessageId>,
    echo_checks: HashMap<MessageId, ScheduledTask>,
    peer_typing: bool,
    typing_generation: u64,
    typing_expiry: Option<ScheduledTask>,
    last_typing_sent: Option<u64>,
    presence: PresenceStatus,
    presence_tick: Option<ScheduledTask>,
    uploading: u32,
}

impl ConversationSync {
    pub fn new(
        local: UserId,
        peer: PeerProfile,
        epoch: u64,
        config: CoreConfig,
        scheduler: Scheduler,
        now_ms: u64,
    ) -> Self {
        let room = RoomId::for_pair(&local, &peer.id);
        let presence = presence_at(peer.last_seen, now_ms, config.online_window_ms);
        let presence_tick = (config.presence_refresh_ms > 0).then(|| {
            scheduler.every(
                Duration::from_millis(config.presence_refresh_ms),
                TimerEvent::PresenceTick {
                    peer: peer.id.clone(),
                    epoch,
                },
            )
        });
        Self {
            local,
            peer,
            room,
            epoch,
            config,
            scheduler,
            state: LoadState::Loading,
            messages: Vec::new(),
            read_requested: HashSet::new(),
            confirmed: HashMap::new(),
            superseded: HashSet::new(),
            echo_checks: HashMap::new(),
            peer_typing: false,
            typing_generation: 0,
            typing_expiry: None,
            last_typing_sent: None,
            presence,
            presence_tick,
            uploading: 0,
        }
    }

    pub fn peer(&self) -> &PeerProfile {
        &self.peer
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn state(&self) -> &LoadState {
        &self.state
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn is_peer_typing(&self) -> bool {
        self.peer_typing
    }

    pub fn presence(&self) -> PresenceStatus {
        self.presence
    }

    pub fn provisional_count(&self) -> usize {
        self.messages.iter().filter(|m| m.is_provisional()).count()
    }

    pub fn armed_timers(&self) -> usize {
        self.presence_tick.iter().count() + self.typing_expiry.iter().count() + self.echo_checks.len()
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.messages.iter().any(|m| &m.id == id)
    }

    pub fn snapshot(&self) -> ConversationSnapshot {
        ConversationSnapshot {
            peer: self.peer.clone(),
            room: self.room.clone(),
            state: self.state.clone(),
            messages: self.messages.clone(),
            peer_typing: self.peer_typing,
            presence: self.presence,
            uploading: self.uploading,
        }
    }

    /// Merges the fetched history with anything that arrived live while
    /// loading and moves to `Ready`. Returns the peer-authored unread ids
    /// that should be marked read.
    pub fn apply_history(&mut self, rows: Vec<Message>) -> Vec<MessageId> {
        let mut seen = HashSet::new();
        let mut history: Vec<Message> = rows
            .into_iter()
            .filter(|m| m.room() == self.room)
            .filter(|m| seen.insert(m.id.clone()))
            .collect();
        history.sort_by_key(|m| m.created_at);
        let live = std::mem::replace(&mut self.messages, history);
        for message in live {
            if seen.contains(&message.id) {
                continue;
            }
            if message.is_provisional() && self.confirmed_in_list(&message.id) {
                self.forget_provisional(&message.id);
                continue;
            }
            if message.is_provisional() {
                self.messages.push(message);
            } else {
                self.insert_ordered(message);
            }
        }
        self.state = LoadState::Ready;
        self.unread_from_peer()
    }

    pub fn fail_history(&mut self, reason: String) {
        if matches!(self.state, LoadState::Loading) {
            self.state = LoadState::Failed(reason);
        }
    }

    /// Peer-authored unread messages not yet requested; records them as
    /// requested.
    pub fn unread_from_peer(&mut self) -> Vec<MessageId> {
        let mut ids = Vec::new();
        for message in self.messages.iter() {
            if message.is_from(&self.peer.id)
                && !message.read
                && self.read_requested.insert(message.id.clone())
            {
                ids.push(message.id.clone());
            }
        }
        ids
    }

    /// A failed mark-read write makes these ids eligible again for a later
    /// request. Nothing retries on its own.
    pub fn forget_read_requests(&mut self, ids: &[MessageId]) {
        for id in ids {
            self.read_requested.remove(id);
        }
    }

    /// Appends a provisional entry and returns it with the insert request
    /// to persist.
    pub fn begin_send(
        &mut self,
        draft: Draft,
        now_ms: u64,
        limits: &ValidationLimits,
    ) -> Result<(Message, NewMessage), CoreError> {
        validate_outgoing(
            &draft.content,
            draft.kind,
            draft.media_ref.as_deref(),
            limits,
        )?;
        let provisional = Message {
            id: MessageId::provisional(),
            sender_id: self.local.clone(),
            receiver_id: self.peer.id.clone(),
            content: draft.content.clone(),
            created_at: now_ms,
            kind: draft.kind,
            media_ref: draft.media_ref.clone(),
            read: false,
        };
        self.messages.push(provisional.clone());
        let request = NewMessage {
            sender_id: self.local.clone(),
            receiver_id: self.peer.id.clone(),
            content: draft.content,
            kind: draft.kind,
            media_ref: draft.media_ref,
            read: false,
        };
        Ok((provisional, request))
    }

    /// Rolls back a provisional entry whose write failed.
    pub fn send_failed(&mut self, provisional: &MessageId) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| &m.id != provisional);
        self.forget_provisional(provisional);
        before != self.messages.len()
    }

    /// The write succeeded. The echo normally supersedes the provisional
    /// entry; the returned row is kept in case it never comes.
    pub fn send_confirmed(&mut self, provisional: &MessageId, row: Message) -> bool {
        if self.superseded.remove(provisional) {
            if self.contains(&row.id) {
                return false;
            }
            self.insert_ordered(row);
            return true;
        }
        if !self.contains(provisional) {
            return false;
        }
        if self.contains(&row.id) {
            self.messages.retain(|m| &m.id != provisional);
            return true;
        }
        let check = self.scheduler.after(
            Duration::from_millis(self.config.echo_grace_ms),
            TimerEvent::EchoGrace {
                peer: self.peer.id.clone(),
                epoch: self.epoch,
                provisional: provisional.clone(),
            },
        );
        self.echo_checks.insert(provisional.clone(), check);
        self.confirmed.insert(provisional.clone(), row);
        false
    }

    /// Grace period elapsed without an echo: swap the provisional entry for
    /// the confirmed row in place.
    pub fn echo_overdue(&mut self, provisional: &MessageId) -> bool {
        self.echo_checks.remove(provisional);
        let Some(row) = self.confirmed.remove(provisional) else {
            return false;
        };
        let Some(pos) = self.messages.iter().position(|m| &m.id == provisional) else {
            return false;
        };
        if self.contains(&row.id) {
            self.messages.remove(pos);
        } else {
            log::warn!("no echo for {} in {}; using confirmed row", row.id, self.room);
            self.messages[pos] = row;
        }
        true
    }

    pub fn on_insert(&mut self, message: Message, in_view: bool) -> InsertOutcome {
        if message.room() != self.room {
            return InsertOutcome::Foreign;
        }
        if self.contains(&message.id) {
            if message.is_from(&self.local) {
                self.drop_confirmed_provisional(&message.id);
            }
            return InsertOutcome::Duplicate;
        }
        let mut superseded = 0;
        let mut mark_read = Vec::new();
        let mut cleared_typing = false;
        if message.is_from(&self.local) {
            superseded = self.supersede_provisional(&message.id);
        } else {
            cleared_typing = self.clear_typing();
            if in_view && !message.read && self.read_requested.insert(message.id.clone()) {
                mark_read.push(message.id.clone());
            }
        }
        self.insert_ordered(message);
        InsertOutcome::Applied {
            superseded,
            mark_read,
            cleared_typing,
        }
    }

    /// Replace-by-id; used for read receipt flips.
    pub fn on_update(&mut self, message: Message) -> bool {
        if message.room() != self.room {
            return false;
        }
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) if *existing != message => {
                *existing = message;
                true
            }
            _ => false,
        }
    }

    /// Returns true when the indicator turned on. Each signal re-arms the
    /// expiry timer.
    pub fn on_typing(&mut self, from: &UserId) -> bool {
        if from != &self.peer.id {
            return false;
        }
        let was_typing = self.peer_typing;
        self.peer_typing = true;
        self.typing_generation += 1;
        self.typing_expiry = Some(self.scheduler.after(
            Duration::from_millis(self.config.typing_expiry_ms),
            TimerEvent::TypingExpired {
                peer: self.peer.id.clone(),
                epoch: self.epoch,
                generation: self.typing_generation,
            },
        ));
        !was_typing
    }

    pub fn typing_expired(&mut self, generation: u64) -> bool {
        if generation != self.typing_generation {
            return false;
        }
        self.clear_typing()
    }

    /// Outgoing typing throttle.
    pub fn should_send_typing(&mut self, now_ms: u64) -> bool {
        let allowed = self
            .last_typing_sent
            .map_or(true, |t| now_ms.saturating_sub(t) >= self.config.typing_throttle_ms);
        if allowed {
            self.last_typing_sent = Some(now_ms);
        }
        allowed
    }

    pub fn refresh_presence(&mut self, now_ms: u64) -> bool {
        let next = presence_at(self.peer.last_seen, now_ms, self.config.online_window_ms);
        let changed = next != self.presence;
        self.presence = next;
        changed
    }

    pub fn update_peer(&mut self, profile: PeerProfile, now_ms: u64) -> bool {
        if profile.id != self.peer.id {
            return false;
        }
        self.peer = profile;
        self.refresh_presence(now_ms)
    }

    pub fn begin_upload(&mut self) {
        self.uploading += 1;
    }

    pub fn finish_upload(&mut self) {
        self.uploading = self.uploading.saturating_sub(1);
    }

    fn clear_typing(&mut self) -> bool {
        self.typing_expiry = None;
        std::mem::replace(&mut self.peer_typing, false)
    }

    fn insert_ordered(&mut self, message: Message) {
        let pos = self
            .messages
            .iter()
            .rposition(|m| m.created_at <= message.created_at)
            .map_or(0, |p| p + 1);
        self.messages.insert(pos, message);
    }

    /// Drops every provisional entry in favor of authoritative rows. A send
    /// the store already confirmed keeps its returned row; one still in
    /// flight lands when its confirmation does.
    fn supersede_provisional(&mut self, echo: &MessageId) -> usize {
        let dropped: Vec<MessageId> = self
            .messages
            .iter()
            .filter(|m| m.is_provisional())
            .map(|m| m.id.clone())
            .collect();
        self.messages.retain(|m| !m.is_provisional());
        for provisional in dropped.iter() {
            self.echo_checks.remove(provisional);
            match self.confirmed.remove(provisional) {
                Some(row) => {
                    if &row.id != echo && !self.contains(&row.id) {
                        self.insert_ordered(row);
                    }
                }
                None => {
                    self.superseded.insert(provisional.clone());
                }
            }
        }
        dropped.len()
    }

    fn drop_confirmed_provisional(&mut self, row_id: &MessageId) {
        let provisional = self
            .confirmed
            .iter()
            .find(|(_, row)| &row.id == row_id)
            .map(|(p, _)| p.clone());
        if let Some(provisional) = provisional {
            self.messages.retain(|m| m.id != provisional);
            self.forget_provisional(&provisional);
        }
    }

    fn confirmed_in_list(&self, provisional: &MessageId) -> bool {
        self.confirmed
            .get(provisional)
            .map_or(false, |row| self.contains(&row.id))
    }

    fn forget_provisional(&mut self, provisional: &MessageId) {
        self.superseded.remove(provisional);
        self.confirmed.remove(provisional);
        self.echo_checks.remove(provisional);
    }
}
