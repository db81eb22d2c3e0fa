pub mod badge;
pub mod config;
pub mod conversation;
pub mod error;
pub mod event;
pub mod media;
pub mod memory;
pub mod notify;
pub mod policy;
pub mod presence;
pub mod profiles;
pub mod realtime;
pub mod roster;
pub mod router;
pub mod scheduler;
mod session;
pub mod storage;
pub mod store;
pub mod time;
pub mod watermark;

use config::CoreConfig;
use conversation::{ConversationSnapshot, Draft};
use error::CoreError;
use event::{EventBus, EventReceiver};
use media::MediaUploader;
use murmur_api::{validate_user_id, MessageId, MessageKind, UserId};
use notify::{NotificationEvent, Notifier};
use policy::Policy;
use realtime::RealtimeTransport;
use roster::{ConversationEntry, RosterSnapshot};
use session::{Command, SessionLoop};
use std::sync::Arc;
use storage::SessionStorage;
use store::MessageStore;
use time::Clock;
use tokio::sync::{mpsc, oneshot};

/// External services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn MessageStore>,
    pub realtime: Arc<dyn RealtimeTransport>,
    pub media: Arc<dyn MediaUploader>,
    pub notifier: Arc<dyn Notifier>,
    pub session_storage: Arc<dyn SessionStorage>,
    pub clock: Arc<dyn Clock>,
}

/// Handle to a running client session. Cloning is cheap; every clone talks
/// to the same session loop.
#[derive(Clone)]
pub struct Core {
    local: UserId,
    commands: mpsc::UnboundedSender<Command>,
    events: EventBus,
}

impl Core {
    /// Starts the session loop: subscribes the identity channel, begins the
    /// heartbeat and kicks off the first roster refresh.
    pub async fn init(
        config: CoreConfig,
        policy: Policy,
        local: UserId,
        collaborators: Collaborators,
    ) -> Result<Self, CoreError> {
        validate_user_id(&local)?;
        let events = EventBus::new(config.event_bus_size);
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (session, inboxes) = SessionLoop::new(
            local.clone(),
            config,
            policy,
            collaborators,
            commands_rx,
            events.clone(),
        );
        tokio::spawn(session.run(inboxes));
        log::info!("session started for {}", local);
        Ok(Self {
            local,
            commands,
            events,
        })
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub fn local_identity(&self) -> &UserId {
        &self.local
    }

    pub fn refresh(&self) -> Result<(), CoreError> {
        self.post(Command::Refresh)
    }

    pub async fn open_conversation(&self, peer: &UserId) -> Result<(), CoreError> {
        self.request(|reply| Command::Open {
            peer: peer.clone(),
            reply,
        })
        .await?
    }

    pub fn close_conversation(&self, peer: &UserId) -> Result<(), CoreError> {
        self.post(Command::Close { peer: peer.clone() })
    }

    /// Appends a provisional message and returns its id. Persistence
    /// failures arrive later as `ViewEvent::SendFailed`.
    pub async fn send_message(&self, peer: &UserId, draft: Draft) -> Result<MessageId, CoreError> {
        self.request(|reply| Command::Send {
            peer: peer.clone(),
            draft,
            reply,
        })
        .await?
    }

    pub async fn send_text(&self, peer: &UserId, content: &str) -> Result<MessageId, CoreError> {
        self.send_message(peer, Draft::text(content)).await
    }

    /// Uploads the blob, then sends a message carrying its reference.
    pub async fn send_media(
        &self,
        peer: &UserId,
        kind: MessageKind,
        blob: Vec<u8>,
    ) -> Result<(), CoreError> {
        self.request(|reply| Command::SendMedia {
            peer: peer.clone(),
            kind,
            blob,
            reply,
        })
        .await?
    }

    pub fn notify_typing(&self, peer: &UserId) -> Result<(), CoreError> {
        self.post(Command::Typing { peer: peer.clone() })
    }

    pub fn mark_conversation_read(&self, peer: &UserId) -> Result<(), CoreError> {
        self.post(Command::MarkRead { peer: peer.clone() })
    }

    pub fn handle_notification(&self, event: NotificationEvent) -> Result<(), CoreError> {
        self.post(Command::Notification(event))
    }

    pub async fn roster(&self) -> Result<RosterSnapshot, CoreError> {
        self.request(|reply| Command::Roster { reply }).await
    }

    pub async fn search(&self, query: &str) -> Result<Vec<ConversationEntry>, CoreError> {
        self.request(|reply| Command::Search {
            query: query.to_string(),
            reply,
        })
        .await
    }

    pub async fn conversation(
        &self,
        peer: &UserId,
    ) -> Result<Option<ConversationSnapshot>, CoreError> {
        self.request(|reply| Command::Conversation {
            peer: peer.clone(),
            reply,
        })
        .await
    }

    /// Ends the session: unsubscribes every channel, cancels timers and
    /// discards read watermarks.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.request(|reply| Command::Shutdown { reply }).await
    }

    fn post(&self, command: Command) -> Result<(), CoreError> {
        self.commands.send(command).map_err(|_| CoreError::Closed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, CoreError> {
        let (tx, rx) = oneshot::channel();
        self.post(build(tx))?;
        rx.await.map_err(|_| CoreError::Closed)
    }
}

#[cfg(test)]
mod tests;
