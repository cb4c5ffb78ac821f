use serde::{Deserialize, Serialize};

/// The `realtime {enabled, poll_interval, max_connections,
/// max_subscriptions_per_client, change_buffer_size}` config section (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RealtimeConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Change-log poll cadence in milliseconds. §4.G's "default 50 ms
    /// cadence".
    #[serde(rename = "poll_interval", default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_subscriptions_per_client")]
    pub max_subscriptions_per_client: usize,
    /// Capacity of each client's bounded outbound channel; also used as the
    /// per-poll change-log batch size.
    #[serde(default = "default_change_buffer_size")]
    pub change_buffer_size: usize,
}

fn default_enabled() -> bool {
    true
}
fn default_poll_interval_ms() -> u64 {
    50
}
fn default_max_connections() -> usize {
    1000
}
fn default_max_subscriptions_per_client() -> usize {
    50
}
fn default_change_buffer_size() -> usize {
    256
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            poll_interval_ms: default_poll_interval_ms(),
            max_connections: default_max_connections(),
            max_subscriptions_per_client: default_max_subscriptions_per_client(),
            change_buffer_size: default_change_buffer_size(),
        }
    }
}
