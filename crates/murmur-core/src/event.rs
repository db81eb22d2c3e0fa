use crate::presence::PresenceStatus;
use murmur_api::{MessageId, UserId};
use serde::Serialize;
use tokio::sync::broadcast;

/// State changes the rendering layer reacts to. Snapshots are pulled
/// through `Core`; events only say what changed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ViewEvent {
    RosterChanged {
        total_unread: u32,
    },
    RosterFailed {
        reason: String,
    },
    ConversationChanged {
        peer: UserId,
    },
    HistoryFailed {
        peer: UserId,
        reason: String,
    },
    SendFailed {
        peer: UserId,
        message_id: Option<MessageId>,
        reason: String,
    },
    TypingChanged {
        peer: UserId,
        typing: bool,
    },
    PresenceChanged {
        peer: UserId,
        status: PresenceStatus,
    },
}

pub type EventReceiver = broadcast::Receiver<ViewEvent>;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ViewEvent>,
}

impl EventBus {
    pub fn new(size: usize) -> Self {
        let (tx, _) = broadcast::channel(size.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: ViewEvent) {
        let _ = self.tx.send(event);
    }
}
