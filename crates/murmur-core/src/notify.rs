use murmur_api::{Message, MessageKind, PeerProfile, UserId};
use serde::Serialize;
use std::sync::{Arc, Mutex};

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub peer: UserId,
    pub title: String,
    pub body: String,
}

impl Notification {
    pub fn for_message(message: &Message, sender: Option<&PeerProfile>) -> Self {
        let title = sender
            .map(|p| p.display_name().to_string())
            .unwrap_or_else(|| "New user".to_string());
        let body = match message.kind {
            MessageKind::Text => message.content.clone(),
            MessageKind::Image => "📷 Image".to_string(),
            MessageKind::Audio => "🎤 Audio".to_string(),
        };
        Self {
            peer: message.sender_id.clone(),
            title,
            body,
        }
    }
}

/// Events the platform notification layer feeds into the session.
#[derive(Clone, Debug, PartialEq)]
pub enum NotificationEvent {
    /// A push received while the app is in the foreground; same shape as a
    /// realtime frame.
    ForegroundMessage(serde_json::Value),
    /// The user tapped a notification for `peer`.
    Activated { peer: UserId },
}

/// OS-level notification and badge primitives.
pub trait Notifier: Send + Sync {
    fn set_badge(&self, count: u32);
    fn clear_badge(&self);
    fn present(&self, notification: Notification);
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NotifierLog {
    pub badge: Option<u32>,
    pub badge_calls: usize,
    pub presented: Vec<Notification>,
}

/// Keeps the last badge value and every presented notification.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    log: Arc<Mutex<NotifierLog>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> NotifierLog {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn badge(&self) -> Option<u32> {
        self.snapshot().badge
    }

    fn with_log(&self, f: impl FnOnce(&mut NotifierLog)) {
        let mut guard = self.log.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }
}

impl Notifier for RecordingNotifier {
    fn set_badge(&self, count: u32) {
        log::debug!("badge set {}", count);
        self.with_log(|l| {
            l.badge = Some(count);
            l.badge_calls += 1;
        });
    }

    fn clear_badge(&self) {
        log::debug!("badge cleared");
        self.with_log(|l| {
            l.badge = None;
            l.badge_calls += 1;
        });
    }

    fn present(&self, notification: Notification) {
        log::info!("notify {}: {}", notification.title, notification.body);
        self.with_log(|l| l.presented.push(notification));
    }
}
