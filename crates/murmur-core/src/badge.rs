use crate::notify::Notifier;
use crate::roster::ConversationEntry;
use std::sync::Arc;

pub fn total(entries: &[ConversationEntry]) -> u32 {
    entries
        .iter()
        .fold(0u32, |sum, e| sum.saturating_add(e.unread_count))
}

/// Projects the roster's unread sum onto the OS badge.
#[derive(Clone)]
pub struct BadgeAggregator {
    notifier: Arc<dyn Notifier>,
}

impl BadgeAggregator {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub fn project(&self, entries: &[ConversationEntry]) -> u32 {
        let sum = total(entries);
        if sum > 0 {
            self.notifier.set_badge(sum);
        } else {
            self.notifier.clear_badge();
        }
        sum
    }
}
