use crate::realtime::{ChannelSpec, RealtimeTransport};
use murmur_api::{
    validate_message, validate_user_id, Message, PushFrame, RoomId, RowEvent, TypingPayload,
    UserId, ValidationError, TYPING_EVENT,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RealtimeEvent {
    Inserted(Message),
    Updated(Message),
    Typing(UserId),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Shape(String),
    #[error("invalid record: {0}")]
    Invalid(#[from] ValidationError),
    #[error("unknown broadcast {0}")]
    UnknownEvent(String),
}

/// Decodes and validates a raw push payload.
pub fn decode(payload: &serde_json::Value) -> Result<RealtimeEvent, DecodeError> {
    let frame: PushFrame = serde_json::from_value(payload.clone())
        .map_err(|e| DecodeError::Shape(e.to_string()))?;
    match frame {
        PushFrame::RowChange { event, record } => {
            validate_message(&record)?;
            Ok(match event {
                RowEvent::Insert => RealtimeEvent::Inserted(record),
                RowEvent::Update => RealtimeEvent::Updated(record),
            })
        }
        PushFrame::Broadcast { event, payload } if event == TYPING_EVENT => {
            let typing: TypingPayload = serde_json::from_value(payload)
                .map_err(|e| DecodeError::Shape(e.to_string()))?;
            validate_user_id(&typing.user_id)?;
            Ok(RealtimeEvent::Typing(typing.user_id))
        }
        PushFrame::Broadcast { event, .. } => Err(DecodeError::UnknownEvent(event)),
    }
}

/// Which subscription a payload came in on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelKey {
    Identity,
    Room { peer: UserId, epoch: u64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Push {
    pub channel: ChannelKey,
    pub payload: serde_json::Value,
}

/// Owner callback a decoded event is routed to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Dispatch {
    RosterInsert(Message),
    RosterRead(Message),
    ConversationInsert {
        peer: UserId,
        epoch: u64,
        message: Message,
    },
    ConversationUpdate {
        peer: UserId,
        epoch: u64,
        message: Message,
    },
    ConversationTyping {
        peer: UserId,
        epoch: u64,
        from: UserId,
    },
}

struct Subscription {
    name: String,
    task: JoinHandle<()>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        log::debug!("unsubscribe {}", self.name);
        self.task.abort();
    }
}

/// Keeps one push subscription for the local identity and one per open
/// room, forwarding raw payloads into the session inbox.
pub struct Router {
    local: UserId,
    transport: Arc<dyn RealtimeTransport>,
    inbox: mpsc::UnboundedSender<Push>,
    identity: Option<Subscription>,
    rooms: HashMap<UserId, Subscription>,
    reconnect_delay: Duration,
}

impl Router {
    pub fn new(
        local: UserId,
        transport: Arc<dyn RealtimeTransport>,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<Push>) {
        let (inbox, rx) = mpsc::unbounded_channel();
        let router = Self {
            local,
            transport,
            inbox,
            identity: None,
            rooms: HashMap::new(),
            reconnect_delay,
        };
        (router, rx)
    }

    pub fn subscribe_identity(&mut self) {
        let spec = ChannelSpec::identity(&self.local);
        self.identity = Some(self.spawn(spec, ChannelKey::Identity));
    }

    pub fn subscribe_room(&mut self, peer: &UserId, room: &RoomId, epoch: u64) {
        let key = ChannelKey::Room {
            peer: peer.clone(),
            epoch,
        };
        let subscription = self.spawn(ChannelSpec::room(room), key);
        self.rooms.insert(peer.clone(), subscription);
    }

    pub fn close_room(&mut self, peer: &UserId) -> bool {
        self.rooms.remove(peer).is_some()
    }

    pub fn close_all(&mut self) {
        self.rooms.clear();
        self.identity = None;
    }

    pub fn open_rooms(&self) -> usize {
        self.rooms.len()
    }

    /// Maps a decoded event to the owner that applies it. Typing signals on
    /// the identity channel have no owner.
    pub fn route(&self, channel: &ChannelKey, event: RealtimeEvent) -> Option<Dispatch> {
        match (channel, event) {
            (ChannelKey::Identity, RealtimeEvent::Inserted(message)) => {
                Some(Dispatch::RosterInsert(message))
            }
            (ChannelKey::Identity, RealtimeEvent::Updated(message)) => {
                Some(Dispatch::RosterRead(message))
            }
            (ChannelKey::Identity, RealtimeEvent::Typing(_)) => None,
            (ChannelKey::Room { peer, epoch }, RealtimeEvent::Inserted(message)) => {
                Some(Dispatch::ConversationInsert {
                    peer: peer.clone(),
                    epoch: *epoch,
                    message,
                })
            }
            (ChannelKey::Room { peer, epoch }, RealtimeEvent::Updated(message)) => {
                Some(Dispatch::ConversationUpdate {
                    peer: peer.clone(),
                    epoch: *epoch,
                    message,
                })
            }
            (ChannelKey::Room { peer, epoch }, RealtimeEvent::Typing(from)) => {
                if from == self.local {
                    return None;
                }
                Some(Dispatch::ConversationTyping {
                    peer: peer.clone(),
                    epoch: *epoch,
                    from,
                })
            }
        }
    }

    /// The forwarding task resubscribes after a transport drop. Nothing
    /// missed while disconnected is replayed.
    fn spawn(&self, spec: ChannelSpec, key: ChannelKey) -> Subscription {
        let transport = self.transport.clone();
        let inbox = self.inbox.clone();
        let delay = self.reconnect_delay;
        let name = spec.name.clone();
        let task = tokio::spawn(async move {
            loop {
                match transport.subscribe(&spec).await {
                    Ok(mut rx) => {
                        log::debug!("subscribed {}", spec.name);
                        while let Some(payload) = rx.recv().await {
                            let push = Push {
                                channel: key.clone(),
                                payload,
                            };
                            if inbox.send(push).is_err() {
                                return;
                            }
                        }
                        log::warn!("channel {} dropped, reconnecting", spec.name);
                    }
                    Err(err) => log::warn!("subscribe {} failed: {}", spec.name, err),
                }
                if inbox.is_closed() {
                    return;
                }
                tokio::time::sleep(delay).await;
            }
        });
        Subscription { name, task }
    }
}
