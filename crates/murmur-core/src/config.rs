use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct CoreConfig {
    pub history_limit: usize,
    pub typing_expiry_ms: u64,
    pub typing_throttle_ms: u64,
    pub echo_grace_ms: u64,
    pub presence_refresh_ms: u64,
    pub online_window_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub profile_cache_capacity: usize,
    pub seen_ids_capacity: usize,
    pub event_bus_size: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            typing_expiry_ms: 3_000,
            typing_throttle_ms: 2_000,
            echo_grace_ms: 10_000,
            presence_refresh_ms: 60_000,
            online_window_ms: 5 * 60_000,
            heartbeat_interval_ms: 60_000,
            reconnect_delay_ms: 1_000,
            profile_cache_capacity: 256,
            seen_ids_capacity: 1_024,
            event_bus_size: 256,
        }
    }
}
