use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline { last_seen: Option<u64> },
}

/// A peer counts as online while its last heartbeat is inside `window_ms`.
pub fn presence_at(last_seen: Option<u64>, now_ms: u64, window_ms: u64) -> PresenceStatus {
    match last_seen {
        Some(seen) if now_ms.saturating_sub(seen) < window_ms => PresenceStatus::Online,
        other => PresenceStatus::Offline { last_seen: other },
    }
}
