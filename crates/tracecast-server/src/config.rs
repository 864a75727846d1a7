//! Server configuration.

use std::time::Duration;

use tracecast_settings::TracecastSettings;

/// Per-session broker tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Events kept per session for replay.
    pub ring_capacity: usize,
    /// Bounded channel size per subscriber.
    pub subscriber_buffer: usize,
    /// Sessions with no subscribers are evicted after this long.
    pub idle_timeout: Duration,
    /// Reaper period.
    pub reap_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            ring_capacity: 1024,
            subscriber_buffer: 256,
            idle_timeout: Duration::from_secs(600),
            reap_interval: Duration::from_secs(30),
        }
    }
}

/// SSE transport tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransportConfig {
    /// Heartbeat period.
    pub heartbeat_interval: Duration,
    /// Chunk coalescing window. Zero disables coalescing.
    pub coalesce_window: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            coalesce_window: Duration::from_millis(50),
        }
    }
}

/// Configuration for the tracecast server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Allowed CORS origins; `*` allows any.
    pub cors_origins: Vec<String>,
    /// Grace period for in-flight work on shutdown.
    pub shutdown_timeout: Duration,
    /// Broker tuning.
    pub broker: BrokerConfig,
    /// Transport tuning.
    pub transport: TransportConfig,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &TracecastSettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            cors_origins: settings.server.cors_origins.clone(),
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
            broker: BrokerConfig {
                ring_capacity: settings.broker.ring_capacity.max(1),
                subscriber_buffer: settings.broker.subscriber_buffer.max(1),
                idle_timeout: Duration::from_millis(settings.broker.idle_timeout_ms),
                reap_interval: Duration::from_millis(settings.broker.reap_interval_ms.max(1)),
            },
            transport: TransportConfig {
                heartbeat_interval: Duration::from_millis(
                    settings.transport.heartbeat_interval_ms.max(1),
                ),
                coalesce_window: Duration::from_millis(settings.transport.coalesce_window_ms),
            },
        }
    }

    /// Whether any origin is allowed.
    pub fn cors_allows_any(&self) -> bool {
        self.cors_origins.is_empty() || self.cors_origins.iter().any(|o| o == "*")
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            cors_origins: vec!["*".into()],
            shutdown_timeout: Duration::from_secs(5),
            broker: BrokerConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_port_is_zero() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn default_broker_values() {
        let cfg = BrokerConfig::default();
        assert_eq!(cfg.ring_capacity, 1024);
        assert_eq!(cfg.subscriber_buffer, 256);
        assert_eq!(cfg.idle_timeout, Duration::from_secs(600));
    }

    #[test]
    fn default_transport_values() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(cfg.coalesce_window, Duration::from_millis(50));
    }

    #[test]
    fn from_settings_converts_units() {
        let mut settings = TracecastSettings::default();
        settings.server.port = 9000;
        settings.broker.ring_capacity = 8;
        settings.transport.heartbeat_interval_ms = 1500;
        settings.transport.coalesce_window_ms = 0;

        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.broker.ring_capacity, 8);
        assert_eq!(cfg.transport.heartbeat_interval, Duration::from_millis(1500));
        assert!(cfg.transport.coalesce_window.is_zero());
        assert_eq!(cfg.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn from_settings_clamps_zero_capacities() {
        let mut settings = TracecastSettings::default();
        settings.broker.ring_capacity = 0;
        settings.broker.subscriber_buffer = 0;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.broker.ring_capacity, 1);
        assert_eq!(cfg.broker.subscriber_buffer, 1);
    }

    #[test]
    fn cors_wildcard() {
        let mut cfg = ServerConfig::default();
        assert!(cfg.cors_allows_any());
        cfg.cors_origins = vec!["http://localhost:3000".into()];
        assert!(!cfg.cors_allows_any());
    }
}
