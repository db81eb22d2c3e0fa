use crate::error::CoreError;
use crate::realtime::{ChannelScope, ChannelSpec, RealtimeTransport};
use crate::store::MessageStore;
use crate::time::Clock;
use async_trait::async_trait;
use murmur_api::{Message, MessageId, NewMessage, PeerProfile, PushFrame, RoomId, UserId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Default)]
pub struct Faults {
    pub fail_queries: AtomicBool,
    pub fail_inserts: AtomicBool,
    pub fail_mark_read: AtomicBool,
    pub fail_subscribe: AtomicBool,
    /// Writes succeed but nothing is pushed to subscribers.
    pub mute_pushes: AtomicBool,
    pub insert_delay_ms: AtomicU64,
}

impl Faults {
    fn check(flag: &AtomicBool, err: impl FnOnce() -> CoreError) -> Result<(), CoreError> {
        if flag.load(Ordering::SeqCst) {
            return Err(err());
        }
        Ok(())
    }
}

struct Subscriber {
    scope: ChannelScope,
    tx: mpsc::UnboundedSender<serde_json::Value>,
}

#[derive(Default)]
struct BackendState {
    messages: Vec<Message>,
    profiles: HashMap<UserId, PeerProfile>,
    contacts: HashMap<UserId, Vec<UserId>>,
    subscribers: Vec<Subscriber>,
    next_id: u64,
}

impl BackendState {
    fn fan_out(&mut self, room: &RoomId, frame: &PushFrame, row: Option<&Message>) {
        let value = match serde_json::to_value(frame) {
            Ok(v) => v,
            Err(_) => return,
        };
        self.subscribers.retain(|s| !s.tx.is_closed());
        for sub in self.subscribers.iter() {
            let matches = match (&sub.scope, row) {
                (ChannelScope::Room(r), _) => r == room,
                (ChannelScope::Participant(user), Some(row)) => row.involves(user),
                (ChannelScope::Participant(_), None) => false,
            };
            if matches {
                let _ = sub.tx.send(value.clone());
            }
        }
    }
}

/// Authoritative store and push transport held in process memory. Inserts
/// and read flips fan out to matching subscribers the way the hosted
/// backend does.
#[derive(Clone)]
pub struct InMemoryBackend {
    state: Arc<Mutex<BackendState>>,
    clock: Arc<dyn Clock>,
    faults: Arc<Faults>,
}

impl InMemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BackendState::default())),
            clock,
            faults: Arc::new(Faults::default()),
        }
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    pub async fn add_profile(&self, profile: PeerProfile) {
        let mut guard = self.state.lock().await;
        guard.profiles.insert(profile.id.clone(), profile);
    }

    pub async fn add_contact(&self, owner: &UserId, contact: &UserId) {
        let mut guard = self.state.lock().await;
        let list = guard.contacts.entry(owner.clone()).or_default();
        if !list.contains(contact) {
            list.push(contact.clone());
        }
    }

    /// Stores a row as history without notifying subscribers.
    pub async fn seed(&self, message: Message) {
        let mut guard = self.state.lock().await;
        guard.messages.push(message);
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.state.lock().await.messages.clone()
    }

    /// Pushes an existing row again, as an at-least-once transport may.
    pub async fn redeliver(&self, frame: PushFrame) {
        let mut guard = self.state.lock().await;
        self.push(&mut guard, frame);
    }

    /// Closes every live subscription, as a transport drop would.
    pub async fn drop_connections(&self) {
        self.state.lock().await.subscribers.clear();
    }

    pub async fn subscriber_count(&self) -> usize {
        let mut guard = self.state.lock().await;
        guard.subscribers.retain(|s| !s.tx.is_closed());
        guard.subscribers.len()
    }

    fn in_room(message: &Message, a: &UserId, b: &UserId) -> bool {
        (&message.sender_id == a && &message.receiver_id == b)
            || (&message.sender_id == b && &message.receiver_id == a)
    }

    fn push(&self, guard: &mut BackendState, frame: PushFrame) {
        if self.faults.mute_pushes.load(Ordering::SeqCst) {
            return;
        }
        let (room, row) = match &frame {
            PushFrame::RowChange { record, .. } => (record.room(), record.clone()),
            PushFrame::Broadcast { .. } => return,
        };
        guard.fan_out(&room, &frame, Some(&row));
    }

    fn flip_read<F>(&self, guard: &mut BackendState, mut select: F)
    where
        F: FnMut(&Message) -> bool,
    {
        let mut flipped = Vec::new();
        for message in guard.messages.iter_mut() {
            if !message.read && select(message) {
                message.read = true;
                flipped.push(message.clone());
            }
        }
        for row in flipped {
            self.push(guard, PushFrame::updated(row));
        }
    }
}

#[async_trait]
impl MessageStore for InMemoryBackend {
    async fn room_history(
        &self,
        a: &UserId,
        b: &UserId,
        limit: usize,
    ) -> Result<Vec<Message>, CoreError> {
        Faults::check(&self.faults.fail_queries, || {
            CoreError::Fetch("history unavailable".to_string())
        })?;
        let guard = self.state.lock().await;
        let mut rows: Vec<Message> = guard
            .messages
            .iter()
            .filter(|m| Self::in_room(m, a, b))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.created_at);
        let skip = rows.len().saturating_sub(limit);
        Ok(rows.split_off(skip))
    }

    async fn latest_in_room(&self, a: &UserId, b: &UserId) -> Result<Option<Message>, CoreError> {
        Faults::check(&self.faults.fail_queries, || {
            CoreError::Fetch("latest unavailable".to_string())
        })?;
        let guard = self.state.lock().await;
        let mut latest: Option<&Message> = None;
        for message in guard.messages.iter().filter(|m| Self::in_room(m, a, b)) {
            if latest.map_or(true, |l| message.created_at >= l.created_at) {
                latest = Some(message);
            }
        }
        Ok(latest.cloned())
    }

    async fn unread_count(&self, sender: &UserId, receiver: &UserId) -> Result<u64, CoreError> {
        Faults::check(&self.faults.fail_queries, || {
            CoreError::Fetch("count unavailable".to_string())
        })?;
        let guard = self.state.lock().await;
        Ok(guard
            .messages
            .iter()
            .filter(|m| &m.sender_id == sender && &m.receiver_id == receiver && !m.read)
            .count() as u64)
    }

    async fn contacts(&self, owner: &UserId) -> Result<Vec<PeerProfile>, CoreError> {
        Faults::check(&self.faults.fail_queries, || {
            CoreError::Fetch("contacts unavailable".to_string())
        })?;
        let guard = self.state.lock().await;
        let ids = guard.contacts.get(owner).cloned().unwrap_or_default();
        Ok(ids
            .into_iter()
            .map(|id| {
                guard
                    .profiles
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| PeerProfile::new(id))
            })
            .collect())
    }

    async fn profile(&self, user: &UserId) -> Result<Option<PeerProfile>, CoreError> {
        Faults::check(&self.faults.fail_queries, || {
            CoreError::Fetch("profile unavailable".to_string())
        })?;
        Ok(self.state.lock().await.profiles.get(user).cloned())
    }

    async fn insert(&self, message: NewMessage) -> Result<Message, CoreError> {
        let delay = self.faults.insert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Faults::check(&self.faults.fail_inserts, || {
            CoreError::Write("insert rejected".to_string())
        })?;
        let mut guard = self.state.lock().await;
        guard.next_id += 1;
        let row = Message {
            id: MessageId::new(format!("msg-{}", guard.next_id)),
            sender_id: message.sender_id,
            receiver_id: message.receiver_id,
            content: message.content,
            created_at: self.clock.now_ms(),
            kind: message.kind,
            media_ref: message.media_ref,
            read: message.read,
        };
        guard.messages.push(row.clone());
        self.push(&mut guard, PushFrame::inserted(row.clone()));
        Ok(row)
    }

    async fn mark_read_ids(&self, ids: &[MessageId]) -> Result<(), CoreError> {
        Faults::check(&self.faults.fail_mark_read, || {
            CoreError::Write("mark read rejected".to_string())
        })?;
        let mut guard = self.state.lock().await;
        self.flip_read(&mut guard, |m| ids.contains(&m.id));
        Ok(())
    }

    async fn mark_read_from(&self, sender: &UserId, receiver: &UserId) -> Result<(), CoreError> {
        Faults::check(&self.faults.fail_mark_read, || {
            CoreError::Write("mark read rejected".to_string())
        })?;
        let mut guard = self.state.lock().await;
        self.flip_read(&mut guard, |m| {
            &m.sender_id == sender && &m.receiver_id == receiver
        });
        Ok(())
    }

    async fn touch_last_seen(&self, user: &UserId, at_ms: u64) -> Result<(), CoreError> {
        let mut guard = self.state.lock().await;
        guard
            .profiles
            .entry(user.clone())
            .or_insert_with(|| PeerProfile::new(user.clone()))
            .last_seen = Some(at_ms);
        Ok(())
    }
}

#[async_trait]
impl RealtimeTransport for InMemoryBackend {
    async fn subscribe(
        &self,
        spec: &ChannelSpec,
    ) -> Result<mpsc::UnboundedReceiver<serde_json::Value>, CoreError> {
        Faults::check(&self.faults.fail_subscribe, || {
            CoreError::Fetch(format!("subscribe {} refused", spec.name))
        })?;
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.state.lock().await;
        guard.subscribers.push(Subscriber {
            scope: spec.scope.clone(),
            tx,
        });
        Ok(rx)
    }

    async fn publish_typing(&self, room: &RoomId, from: &UserId) -> Result<(), CoreError> {
        if self.faults.mute_pushes.load(Ordering::SeqCst) {
            return Ok(());
        }
        let mut guard = self.state.lock().await;
        guard.fan_out(room, &PushFrame::typing(from.clone()), None);
        Ok(())
    }
}
