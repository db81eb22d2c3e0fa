use crate::badge::BadgeAggregator;
use crate::config::CoreConfig;
use crate::conversation::{ConversationSnapshot, ConversationSync, Draft, InsertOutcome};
use crate::error::CoreError;
use crate::event::{EventBus, ViewEvent};
use crate::media::MediaUploader;
use crate::notify::{Notification, NotificationEvent, Notifier};
use crate::policy::Policy;
use crate::realtime::RealtimeTransport;
use crate::roster::{ContactSummary, ConversationEntry, Roster, RosterInsert, RosterSnapshot};
use crate::router::{decode, ChannelKey, Dispatch, Push, Router};
use crate::scheduler::{ScheduledTask, Scheduler, TimerEvent};
use crate::store::MessageStore;
use crate::time::Clock;
use crate::watermark::ReadWatermarks;
use crate::Collaborators;
use futures::future::try_join_all;
use murmur_api::{validate_media_blob, Message, MessageId, MessageKind, PeerProfile, UserId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub(crate) enum Command {
    Refresh,
    Open {
        peer: UserId,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Close {
        peer: UserId,
    },
    MarkRead {
        peer: UserId,
    },
    Send {
        peer: UserId,
        draft: Draft,
        reply: oneshot::Sender<Result<MessageId, CoreError>>,
    },
    SendMedia {
        peer: UserId,
        kind: MessageKind,
        blob: Vec<u8>,
        reply: oneshot::Sender<Result<(), CoreError>>,
    },
    Typing {
        peer: UserId,
    },
    Notification(NotificationEvent),
    Roster {
        reply: oneshot::Sender<RosterSnapshot>,
    },
    Conversation {
        peer: UserId,
        reply: oneshot::Sender<Option<ConversationSnapshot>>,
    },
    Search {
        query: String,
        reply: oneshot::Sender<Vec<ConversationEntry>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Results of remote calls, posted back into the loop.
pub(crate) enum Completion {
    Refreshed {
        generation: u64,
        result: Result<Vec<ContactSummary>, CoreError>,
    },
    History {
        peer: UserId,
        epoch: u64,
        result: Result<Vec<Message>, CoreError>,
    },
    Sent {
        peer: UserId,
        epoch: u64,
        provisional: MessageId,
        result: Result<Message, CoreError>,
    },
    Uploaded {
        peer: UserId,
        epoch: u64,
        kind: MessageKind,
        result: Result<String, CoreError>,
    },
    MarkedRead {
        peer: UserId,
        epoch: u64,
        ids: Vec<MessageId>,
        result: Result<(), CoreError>,
    },
    PeerRefreshed {
        peer: UserId,
        epoch: u64,
        result: Result<Option<PeerProfile>, CoreError>,
    },
    ProfileResolved {
        message: Message,
        profile: Option<PeerProfile>,
    },
}

pub(crate) struct Inboxes {
    commands: mpsc::UnboundedReceiver<Command>,
    pushes: mpsc::UnboundedReceiver<Push>,
    timers: mpsc::UnboundedReceiver<TimerEvent>,
    completions: mpsc::UnboundedReceiver<Completion>,
}

/// Single owner of the roster and every open conversation. Commands,
/// push payloads, timers and remote-call completions are applied one at a
/// time.
pub(crate) struct SessionLoop {
    local: UserId,
    config: CoreConfig,
    policy: Policy,
    store: Arc<dyn MessageStore>,
    realtime: Arc<dyn RealtimeTransport>,
    media: Arc<dyn MediaUploader>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    watermarks: ReadWatermarks,
    roster: Roster,
    conversations: HashMap<UserId, ConversationSync>,
    in_view: Option<UserId>,
    next_epoch: u64,
    router: Router,
    badge: BadgeAggregator,
    events: EventBus,
    scheduler: Scheduler,
    heartbeat: Option<ScheduledTask>,
    completions: mpsc::UnboundedSender<Completion>,
}

impl SessionLoop {
    pub(crate) fn new(
        local: UserId,
        config: CoreConfig,
        policy: Policy,
        collaborators: Collaborators,
        commands: mpsc::UnboundedReceiver<Command>,
        events: EventBus,
    ) -> (Self, Inboxes) {
        let (router, pushes) = Router::new(
            local.clone(),
            collaborators.realtime.clone(),
            Duration::from_millis(config.reconnect_delay_ms),
        );
        let (scheduler, timers) = Scheduler::new();
        let (completions, completions_rx) = mpsc::unbounded_channel();
        let session = Self {
            roster: Roster::new(local.clone(), &config),
            local,
            config,
            policy,
            store: collaborators.store,
            realtime: collaborators.realtime,
            media: collaborators.media,
            notifier: collaborators.notifier.clone(),
            clock: collaborators.clock,
            watermarks: ReadWatermarks::new(collaborators.session_storage),
            conversations: HashMap::new(),
            in_view: None,
            next_epoch: 0,
            router,
            badge: BadgeAggregator::new(collaborators.notifier),
            events,
            scheduler,
            heartbeat: None,
            completions,
        };
        let inboxes = Inboxes {
            commands,
            pushes,
            timers,
            completions: completions_rx,
        };
        (session, inboxes)
    }

    pub(crate) async fn run(mut self, mut inboxes: Inboxes) {
        self.start();
        loop {
            tokio::select! {
                command = inboxes.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.teardown();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command),
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(push) = inboxes.pushes.recv() => self.on_push(push),
                Some(timer) = inboxes.timers.recv() => self.on_timer(timer),
                Some(done) = inboxes.completions.recv() => self.on_completion(done),
            }
        }
        log::info!("session for {} ended", self.local);
    }

    fn start(&mut self) {
        self.router.subscribe_identity();
        if self.config.heartbeat_interval_ms > 0 {
            self.touch_last_seen();
            self.heartbeat = Some(self.scheduler.every(
                Duration::from_millis(self.config.heartbeat_interval_ms),
                TimerEvent::Heartbeat,
            ));
        }
        self.start_refresh();
    }

    fn teardown(&mut self) {
        self.router.close_all();
        self.conversations.clear();
        self.in_view = None;
        self.heartbeat = None;
        self.watermarks.clear();
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    fn spawn<F>(&self, work: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let tx = self.completions.clone();
        tokio::spawn(async move {
            let _ = tx.send(work.await);
        });
    }

    fn is_in_view(&self, peer: &UserId) -> bool {
        self.in_view.as_ref() == Some(peer) && self.conversations.contains_key(peer)
    }

    /// Looks up the conversation an event was addressed to. Events for a
    /// torn-down or reopened conversation find nothing.
    fn live_conversation(&mut self, peer: &UserId, epoch: u64) -> Option<&mut ConversationSync> {
        match self.conversations.get_mut(peer) {
            Some(conversation) if conversation.epoch() == epoch => Some(conversation),
            _ => {
                log::debug!("dropping stale delivery for {} (epoch {})", peer, epoch);
                None
            }
        }
    }

    fn roster_changed(&mut self) {
        let total_unread = self.badge.project(self.roster.entries());
        self.events.publish(ViewEvent::RosterChanged { total_unread });
    }

    fn settle_roster(&mut self, peer: &UserId) {
        if self.roster.settle(peer, &self.watermarks) {
            self.roster_changed();
        }
    }

    fn conversation_changed(&self, peer: &UserId) {
        self.events.publish(ViewEvent::ConversationChanged { peer: peer.clone() });
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Refresh => self.start_refresh(),
            Command::Open { peer, reply } => {
                let _ = reply.send(self.open(peer));
            }
            Command::Close { peer } => self.close(&peer),
            Command::MarkRead { peer } => self.conversation_opened(&peer),
            Command::Send { peer, draft, reply } => {
                let _ = reply.send(self.send(&peer, draft));
            }
            Command::SendMedia {
                peer,
                kind,
                blob,
                reply,
            } => {
                let _ = reply.send(self.send_media(&peer, kind, blob));
            }
            Command::Typing { peer } => self.send_typing(&peer),
            Command::Notification(event) => self.on_notification(event),
            Command::Roster { reply } => {
                let _ = reply.send(self.roster.snapshot());
            }
            Command::Conversation { peer, reply } => {
                let _ = reply.send(self.conversations.get(&peer).map(|c| c.snapshot()));
            }
            Command::Search { query, reply } => {
                let _ = reply.send(self.roster.search(&query));
            }
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
            }
        }
    }

    fn start_refresh(&mut self) {
        let generation = self.roster.begin_refresh();
        let store = self.store.clone();
        let local = self.local.clone();
        self.spawn(async move {
            let result = fetch_summaries(store, local).await;
            Completion::Refreshed { generation, result }
        });
    }

    fn open(&mut self, peer: UserId) -> Result<(), CoreError> {
        if peer == self.local {
            return Err(CoreError::Validation("cannot open a conversation with self".into()));
        }
        if self.conversations.contains_key(&peer) {
            self.in_view = Some(peer.clone());
            self.conversation_opened(&peer);
            return Ok(());
        }
        self.next_epoch += 1;
        let epoch = self.next_epoch;
        let cached = self.roster.cached_profile(&peer);
        let needs_profile = cached.is_none();
        let profile = cached.unwrap_or_else(|| PeerProfile::new(peer.clone()));
        let conversation = ConversationSync::new(
            self.local.clone(),
            profile,
            epoch,
            self.config.clone(),
            self.scheduler.clone(),
            self.now(),
        );
        self.router.subscribe_room(&peer, conversation.room(), epoch);
        self.conversations.insert(peer.clone(), conversation);
        self.in_view = Some(peer.clone());
        log::debug!("opened conversation with {} (epoch {})", peer, epoch);

        self.conversation_opened(&peer);

        let store = self.store.clone();
        let local = self.local.clone();
        let limit = self.config.history_limit;
        let target = peer.clone();
        self.spawn(async move {
            let result = store.room_history(&local, &target, limit).await;
            Completion::History {
                peer: target,
                epoch,
                result,
            }
        });
        if needs_profile {
            self.fetch_peer(&peer, epoch);
        }
        Ok(())
    }

    fn close(&mut self, peer: &UserId) {
        if self.conversations.remove(peer).is_none() {
            return;
        }
        self.router.close_room(peer);
        if self.in_view.as_ref() == Some(peer) {
            self.in_view = None;
        }
        log::debug!("closed conversation with {}", peer);
    }

    /// Zeroes the roster entry, advances the watermark and asks the store to
    /// mark everything from `peer` read.
    fn conversation_opened(&mut self, peer: &UserId) {
        let now = self.now();
        if self.roster.on_conversation_opened(peer, now, &self.watermarks) {
            self.roster_changed();
        }
        let store = self.store.clone();
        let local = self.local.clone();
        let sender = peer.clone();
        let epoch = self.conversations.get(peer).map_or(0, |c| c.epoch());
        self.spawn(async move {
            let result = store.mark_read_from(&sender, &local).await;
            Completion::MarkedRead {
                peer: sender,
                epoch,
                ids: Vec::new(),
                result,
            }
        });
    }

    fn send(&mut self, peer: &UserId, draft: Draft) -> Result<MessageId, CoreError> {
        let now = self.now();
        let limits = self.policy.limits();
        let conversation = self.conversations.get_mut(peer).ok_or(CoreError::NotFound)?;
        let (provisional, request) = conversation.begin_send(draft, now, &limits)?;
        let epoch = conversation.epoch();
        self.watermarks.set(peer, now);
        self.settle_roster(peer);
        self.conversation_changed(peer);

        let store = self.store.clone();
        let target = peer.clone();
        let id = provisional.id.clone();
        self.spawn(async move {
            let result = store.insert(request).await;
            Completion::Sent {
                peer: target,
                epoch,
                provisional: id,
                result,
            }
        });
        Ok(provisional.id)
    }

    fn send_media(
        &mut self,
        peer: &UserId,
        kind: MessageKind,
        blob: Vec<u8>,
    ) -> Result<(), CoreError> {
        validate_media_blob(kind, blob.len(), &self.policy.limits())?;
        let conversation = self.conversations.get_mut(peer).ok_or(CoreError::NotFound)?;
        conversation.begin_upload();
        let epoch = conversation.epoch();
        self.conversation_changed(peer);

        let media = self.media.clone();
        let target = peer.clone();
        self.spawn(async move {
            let result = media.upload(kind, blob).await;
            Completion::Uploaded {
                peer: target,
                epoch,
                kind,
                result,
            }
        });
        Ok(())
    }

    fn send_typing(&mut self, peer: &UserId) {
        let now = self.now();
        let Some(conversation) = self.conversations.get_mut(peer) else {
            return;
        };
        if !conversation.should_send_typing(now) {
            return;
        }
        let room = conversation.room().clone();
        let realtime = self.realtime.clone();
        let local = self.local.clone();
        tokio::spawn(async move {
            if let Err(err) = realtime.publish_typing(&room, &local).await {
                log::debug!("typing signal for {} not sent: {}", room, err);
            }
        });
    }

    fn touch_last_seen(&self) {
        let store = self.store.clone();
        let local = self.local.clone();
        let now = self.now();
        tokio::spawn(async move {
            if let Err(err) = store.touch_last_seen(&local, now).await {
                log::debug!("heartbeat for {} failed: {}", local, err);
            }
        });
    }

    fn fetch_peer(&self, peer: &UserId, epoch: u64) {
        let store = self.store.clone();
        let target = peer.clone();
        self.spawn(async move {
            let result = store.profile(&target).await;
            Completion::PeerRefreshed {
                peer: target,
                epoch,
                result,
            }
        });
    }

    fn on_notification(&mut self, event: NotificationEvent) {
        match event {
            NotificationEvent::ForegroundMessage(payload) => self.on_push(Push {
                channel: ChannelKey::Identity,
                payload,
            }),
            NotificationEvent::Activated { peer } => self.conversation_opened(&peer),
        }
    }

    fn on_push(&mut self, push: Push) {
        let event = match decode(&push.payload) {
            Ok(event) => event,
            Err(err) => {
                log::warn!("rejected push on {:?}: {}", push.channel, err);
                return;
            }
        };
        match self.router.route(&push.channel, event) {
            Some(dispatch) => self.dispatch(dispatch),
            None => log::trace!("push on {:?} has no owner", push.channel),
        }
    }

    fn dispatch(&mut self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::RosterInsert(message) => self.roster_insert(message),
            Dispatch::RosterRead(message) => {
                if self.roster.on_read_update(&message, &self.watermarks) {
                    self.roster_changed();
                }
            }
            Dispatch::ConversationInsert {
                peer,
                epoch,
                message,
            } => self.conversation_insert(peer, epoch, message),
            Dispatch::ConversationUpdate {
                peer,
                epoch,
                message,
            } => {
                let changed = self
                    .live_conversation(&peer, epoch)
                    .map_or(false, |c| c.on_update(message));
                if changed {
                    self.conversation_changed(&peer);
                }
            }
            Dispatch::ConversationTyping { peer, epoch, from } => {
                let started = self
                    .live_conversation(&peer, epoch)
                    .map_or(false, |c| c.on_typing(&from));
                if started {
                    self.events.publish(ViewEvent::TypingChanged { peer, typing: true });
                }
            }
        }
    }

    fn roster_insert(&mut self, message: Message) {
        let Some(peer) = message.counterpart(&self.local).cloned() else {
            return;
        };
        let in_view = self.is_in_view(&peer);
        let now = self.now();
        match self
            .roster
            .on_insert(&message, in_view, now, &self.watermarks)
        {
            RosterInsert::Unrelated | RosterInsert::Duplicate => return,
            RosterInsert::Updated { .. } => self.roster_changed(),
            RosterInsert::UnknownPeer { peer } => {
                log::info!("message from unknown contact {}, refreshing roster", peer);
                self.start_refresh();
            }
        }
        if !message.is_from(&self.local) && !in_view && !message.read {
            self.notify(message);
        }
    }

    fn notify(&mut self, message: Message) {
        if let Some(profile) = self.roster.cached_profile(&message.sender_id) {
            self.notifier
                .present(Notification::for_message(&message, Some(&profile)));
            return;
        }
        let store = self.store.clone();
        self.spawn(async move {
            let profile = match store.profile(&message.sender_id).await {
                Ok(profile) => profile,
                Err(err) => {
                    log::debug!("profile lookup for {} failed: {}", message.sender_id, err);
                    None
                }
            };
            Completion::ProfileResolved { message, profile }
        });
    }

    fn conversation_insert(&mut self, peer: UserId, epoch: u64, message: Message) {
        let in_view = self.is_in_view(&peer);
        let peer_authored = message.is_from(&peer);
        let created_at = message.created_at;
        let Some(conversation) = self.live_conversation(&peer, epoch) else {
            return;
        };
        let outcome = conversation.on_insert(message, in_view);
        let InsertOutcome::Applied {
            superseded,
            mark_read,
            cleared_typing,
        } = outcome
        else {
            return;
        };
        if superseded > 0 {
            log::debug!("echo superseded {} provisional entries for {}", superseded, peer);
        }
        if !mark_read.is_empty() {
            self.mark_read_ids(&peer, epoch, mark_read);
        }
        if peer_authored && in_view {
            self.watermarks.set(&peer, created_at);
            self.settle_roster(&peer);
        }
        if cleared_typing {
            self.events.publish(ViewEvent::TypingChanged {
                peer: peer.clone(),
                typing: false,
            });
        }
        self.conversation_changed(&peer);
    }

    fn mark_read_ids(&self, peer: &UserId, epoch: u64, ids: Vec<MessageId>) {
        let store = self.store.clone();
        let target = peer.clone();
        self.spawn(async move {
            let result = store.mark_read_ids(&ids).await;
            Completion::MarkedRead {
                peer: target,
                epoch,
                ids,
                result,
            }
        });
    }

    fn on_timer(&mut self, timer: TimerEvent) {
        match timer {
            TimerEvent::TypingExpired {
                peer,
                epoch,
                generation,
            } => {
                let cleared = self
                    .live_conversation(&peer, epoch)
                    .map_or(false, |c| c.typing_expired(generation));
                if cleared {
                    self.events.publish(ViewEvent::TypingChanged {
                        peer,
                        typing: false,
                    });
                }
            }
            TimerEvent::PresenceTick { peer, epoch } => {
                let now = self.now();
                let Some(conversation) = self.live_conversation(&peer, epoch) else {
                    return;
                };
                if conversation.refresh_presence(now) {
                    let status = conversation.presence();
                    self.events.publish(ViewEvent::PresenceChanged {
                        peer: peer.clone(),
                        status,
                    });
                }
                self.fetch_peer(&peer, epoch);
            }
            TimerEvent::EchoGrace {
                peer,
                epoch,
                provisional,
            } => {
                let replaced = self
                    .live_conversation(&peer, epoch)
                    .map_or(false, |c| c.echo_overdue(&provisional));
                if replaced {
                    self.conversation_changed(&peer);
                }
            }
            TimerEvent::Heartbeat => self.touch_last_seen(),
        }
    }

    fn on_completion(&mut self, done: Completion) {
        match done {
            Completion::Refreshed { generation, result } => match result {
                Ok(summaries) => {
                    if self
                        .roster
                        .apply_refresh(generation, summaries, &self.watermarks)
                    {
                        self.roster_changed();
                    }
                }
                Err(err) => {
                    log::warn!("roster refresh failed: {}", err);
                    if self.roster.fail_refresh(generation, err.to_string()) {
                        self.events.publish(ViewEvent::RosterFailed {
                            reason: err.to_string(),
                        });
                    }
                }
            },
            Completion::History {
                peer,
                epoch,
                result,
            } => self.history_loaded(peer, epoch, result),
            Completion::Sent {
                peer,
                epoch,
                provisional,
                result,
            } => self.send_completed(peer, epoch, provisional, result),
            Completion::Uploaded {
                peer,
                epoch,
                kind,
                result,
            } => self.upload_completed(peer, epoch, kind, result),
            Completion::MarkedRead {
                peer,
                epoch,
                ids,
                result,
            } => {
                if let Err(err) = result {
                    log::debug!("mark read for {} failed: {}", peer, err);
                    if let Some(conversation) = self.live_conversation(&peer, epoch) {
                        conversation.forget_read_requests(&ids);
                    }
                }
            }
            Completion::PeerRefreshed {
                peer,
                epoch,
                result,
            } => {
                let profile = match result {
                    Ok(Some(profile)) => profile,
                    Ok(None) => return,
                    Err(err) => {
                        log::debug!("profile refresh for {} failed: {}", peer, err);
                        return;
                    }
                };
                self.roster.update_profile(profile.clone());
                let now = self.now();
                let Some(conversation) = self.live_conversation(&peer, epoch) else {
                    return;
                };
                if conversation.update_peer(profile, now) {
                    let status = conversation.presence();
                    self.events.publish(ViewEvent::PresenceChanged { peer, status });
                }
            }
            Completion::ProfileResolved { message, profile } => {
                if let Some(profile) = profile.clone() {
                    self.roster.remember_profile(profile);
                }
                self.notifier
                    .present(Notification::for_message(&message, profile.as_ref()));
            }
        }
    }

    fn history_loaded(
        &mut self,
        peer: UserId,
        epoch: u64,
        result: Result<Vec<Message>, CoreError>,
    ) {
        let now = self.now();
        let Some(conversation) = self.live_conversation(&peer, epoch) else {
            return;
        };
        match result {
            Ok(rows) => {
                let unread = conversation.apply_history(rows);
                self.watermarks.set(&peer, now);
                self.settle_roster(&peer);
                if !unread.is_empty() {
                    self.mark_read_ids(&peer, epoch, unread);
                }
                self.conversation_changed(&peer);
            }
            Err(err) => {
                log::warn!("history for {} failed: {}", peer, err);
                conversation.fail_history(err.to_string());
                self.events.publish(ViewEvent::HistoryFailed {
                    peer,
                    reason: err.to_string(),
                });
            }
        }
    }

    fn send_completed(
        &mut self,
        peer: UserId,
        epoch: u64,
        provisional: MessageId,
        result: Result<Message, CoreError>,
    ) {
        let Some(conversation) = self.live_conversation(&peer, epoch) else {
            return;
        };
        match result {
            Ok(row) => {
                if conversation.send_confirmed(&provisional, row) {
                    self.conversation_changed(&peer);
                }
            }
            Err(err) => {
                log::warn!("send to {} failed: {}", peer, err);
                if conversation.send_failed(&provisional) {
                    self.conversation_changed(&peer);
                }
                self.events.publish(ViewEvent::SendFailed {
                    peer,
                    message_id: Some(provisional),
                    reason: err.to_string(),
                });
            }
        }
    }

    fn upload_completed(
        &mut self,
        peer: UserId,
        epoch: u64,
        kind: MessageKind,
        result: Result<String, CoreError>,
    ) {
        let Some(conversation) = self.live_conversation(&peer, epoch) else {
            return;
        };
        conversation.finish_upload();
        match result {
            Ok(reference) => {
                if let Err(err) = self.send(&peer, Draft::media(kind, reference)) {
                    self.events.publish(ViewEvent::SendFailed {
                        peer,
                        message_id: None,
                        reason: err.to_string(),
                    });
                }
            }
            Err(err) => {
                log::warn!("upload for {} failed: {}", peer, err);
                self.conversation_changed(&peer);
                self.events.publish(ViewEvent::SendFailed {
                    peer,
                    message_id: None,
                    reason: err.to_string(),
                });
            }
        }
    }
}

async fn fetch_summaries(
    store: Arc<dyn MessageStore>,
    local: UserId,
) -> Result<Vec<ContactSummary>, CoreError> {
    let contacts = store.contacts(&local).await?;
    let lookups = contacts.into_iter().map(|profile| {
        let store = store.clone();
        let local = local.clone();
        async move {
            let latest = store.latest_in_room(&local, &profile.id).await?;
            let raw_unread = store.unread_count(&profile.id, &local).await?;
            Ok::<_, CoreError>(ContactSummary {
                profile,
                latest,
                raw_unread,
            })
        }
    });
    try_join_all(lookups).await
}
