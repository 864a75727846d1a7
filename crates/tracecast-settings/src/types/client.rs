//! Viewer-side settings.

use serde::{Deserialize, Serialize};

/// Watcher and API client settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Server base URL.
    pub base_url: String,
    /// Per-request timeout for non-streaming calls, in milliseconds.
    pub request_timeout_ms: u64,
    /// History polling interval while reconnecting, in milliseconds.
    pub history_poll_interval_ms: u64,
    /// First reconnect delay, in milliseconds.
    pub reconnect_base_delay_ms: u64,
    /// Reconnect delay cap, in milliseconds.
    pub reconnect_max_delay_ms: u64,
    /// Reconnect attempts before giving up.
    pub max_retries: u32,
    /// Jitter factor (0.0–1.0) applied to reconnect delays.
    pub jitter_factor: f64,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            request_timeout_ms: 10_000,
            history_poll_interval_ms: 2_000,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 15_000,
            max_retries: 8,
            jitter_factor: 0.2,
        }
    }
}
