pub mod roster_tests;

use crate::config::CoreConfig;
use crate::conversation::{ConversationSnapshot, LoadState};
use crate::event::{EventReceiver, ViewEvent};
use crate::media::InMemoryMedia;
use crate::memory::InMemoryBackend;
use crate::notify::RecordingNotifier;
use crate::policy::Policy;
use crate::roster::RosterSnapshot;
use crate::storage::MemorySessionStorage;
use crate::time::ManualClock;
use crate::{Collaborators, Core};
use murmur_api::{Message, MessageId, MessageKind, PeerProfile, UserId};
use std::sync::Arc;
use std::time::Duration;

pub const START_MS: u64 = 1_700_000_000_000;
const ATTEMPTS: usize = 400;

pub fn user(id: &str) -> UserId {
    UserId::new(id)
}

pub fn text(id: &str, from: &str, to: &str, content: &str, at: u64) -> Message {
    Message {
        id: MessageId::new(id),
        sender_id: user(from),
        receiver_id: user(to),
        content: content.to_string(),
        created_at: at,
        kind: MessageKind::Text,
        media_ref: None,
        read: false,
    }
}

pub fn profile(id: &str, name: &str) -> PeerProfile {
    PeerProfile {
        full_name: Some(name.to_string()),
        account_id: Some(format!("@{}", id)),
        ..PeerProfile::new(user(id))
    }
}

pub fn test_config() -> CoreConfig {
    CoreConfig {
        reconnect_delay_ms: 10,
        ..CoreConfig::default()
    }
}

/// One client identity wired to an in-memory backend that other fixtures
/// may share.
pub struct Fixture {
    pub local: UserId,
    pub clock: ManualClock,
    pub backend: InMemoryBackend,
    pub notifier: RecordingNotifier,
    pub media: InMemoryMedia,
    pub storage: MemorySessionStorage,
}

impl Fixture {
    pub fn new(local: &str) -> Self {
        let clock = ManualClock::new(START_MS);
        let backend = InMemoryBackend::new(Arc::new(clock.clone()));
        Self::with_backend(local, clock, backend)
    }

    /// A second session on the same backend and clock.
    pub fn sibling(&self) -> Self {
        Self::with_backend(
            self.local.as_str(),
            self.clock.clone(),
            self.backend.clone(),
        )
    }

    fn with_backend(local: &str, clock: ManualClock, backend: InMemoryBackend) -> Self {
        Self {
            local: user(local),
            clock,
            backend,
            notifier: RecordingNotifier::new(),
            media: InMemoryMedia::new(),
            storage: MemorySessionStorage::new(),
        }
    }

    pub async fn contact(&self, id: &str, name: &str) {
        self.backend.add_profile(profile(id, name)).await;
        self.backend.add_contact(&self.local, &user(id)).await;
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            store: Arc::new(self.backend.clone()),
            realtime: Arc::new(self.backend.clone()),
            media: Arc::new(self.media.clone()),
            notifier: Arc::new(self.notifier.clone()),
            session_storage: Arc::new(self.storage.clone()),
            clock: Arc::new(self.clock.clone()),
        }
    }

    pub async fn start(&self) -> Core {
        self.start_with(test_config()).await
    }

    /// Starts a session and waits for its first refresh and identity
    /// subscription.
    pub async fn start_with(&self, config: CoreConfig) -> Core {
        let before = self.backend.subscriber_count().await;
        let core = Core::init(
            config,
            Policy::default(),
            self.local.clone(),
            self.collaborators(),
        )
        .await
        .expect("init");
        wait_subscribers(&self.backend, before + 1).await;
        wait_roster(&core, |r| r.state != LoadState::Loading).await;
        core
    }

    /// Stores a message sent by `from` to `to` through the store, as the
    /// other side would.
    pub async fn deliver(&self, from: &str, to: &str, content: &str) -> Message {
        use crate::store::MessageStore;
        self.backend
            .insert(murmur_api::NewMessage {
                sender_id: user(from),
                receiver_id: user(to),
                content: content.to_string(),
                kind: MessageKind::Text,
                media_ref: None,
                read: false,
            })
            .await
            .expect("insert")
    }
}

pub async fn wait_subscribers(backend: &InMemoryBackend, at_least: usize) {
    for _ in 0..ATTEMPTS {
        if backend.subscriber_count().await >= at_least {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected {} subscribers", at_least);
}

pub async fn wait_exact_subscribers(backend: &InMemoryBackend, count: usize) {
    for _ in 0..ATTEMPTS {
        if backend.subscriber_count().await == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("expected exactly {} subscribers", count);
}

pub async fn wait_roster<P>(core: &Core, pred: P) -> RosterSnapshot
where
    P: Fn(&RosterSnapshot) -> bool,
{
    let mut last = None;
    for _ in 0..ATTEMPTS {
        let snapshot = core.roster().await.expect("roster");
        if pred(&snapshot) {
            return snapshot;
        }
        last = Some(snapshot);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("roster never matched: {:?}", last);
}

pub async fn wait_conversation<P>(core: &Core, peer: &UserId, pred: P) -> ConversationSnapshot
where
    P: Fn(&ConversationSnapshot) -> bool,
{
    let mut last = None;
    for _ in 0..ATTEMPTS {
        if let Some(snapshot) = core.conversation(peer).await.expect("conversation") {
            if pred(&snapshot) {
                return snapshot;
            }
            last = Some(snapshot);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("conversation never matched: {:?}", last);
}

pub async fn wait_until<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    for _ in 0..ATTEMPTS {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held");
}

pub async fn next_event<P>(events: &mut EventReceiver, pred: P) -> ViewEvent
where
    P: Fn(&ViewEvent) -> bool,
{
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(err) => panic!("event bus closed: {}", err),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("event not published")
}

/// Lets spawned tasks run without moving the clock.
pub async fn settle() {
    for _ in 0..64 {
        tokio::task::yield_now().await;
    }
}
