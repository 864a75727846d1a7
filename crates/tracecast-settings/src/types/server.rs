//! Server-side settings: listener, broker, transport.

use serde::{Deserialize, Serialize};

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (0 picks a free port).
    pub port: u16,
    /// Allowed CORS origins (`*` allows any).
    pub cors_origins: Vec<String>,
    /// Grace period for in-flight requests on shutdown, in milliseconds.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            cors_origins: vec!["*".to_string()],
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// Session broker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrokerSettings {
    /// Events kept per session for replay.
    pub ring_capacity: usize,
    /// Bounded channel size per subscriber.
    pub subscriber_buffer: usize,
    /// Sessions with no subscribers are evicted after this long, in milliseconds.
    pub idle_timeout_ms: u64,
    /// How often the reaper runs, in milliseconds.
    pub reap_interval_ms: u64,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            subscriber_buffer: 256,
            idle_timeout_ms: 600_000,
            reap_interval_ms: 30_000,
        }
    }
}

/// SSE transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransportSettings {
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval_ms: u64,
    /// Chunk coalescing window in milliseconds (0 disables).
    pub coalesce_window_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 30_000,
            coalesce_window_ms: 50,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_broker_json() {
        let broker: BrokerSettings = serde_json::from_str(r#"{"ringCapacity": 16}"#).unwrap();
        assert_eq!(broker.ring_capacity, 16);
        assert_eq!(broker.subscriber_buffer, 256);
    }

    #[test]
    fn server_defaults() {
        let server = ServerSettings::default();
        assert_eq!(server.host, "127.0.0.1");
        assert_eq!(server.cors_origins, vec!["*"]);
    }
}
