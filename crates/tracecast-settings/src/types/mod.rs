//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]` so a partial
//! JSON file only needs the keys it changes.

mod client;
mod server;

pub use client::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use tracecast_logging::{LogFormat, LogLevel};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "transport": { "coalesceWindowMs": 0 }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TracecastSettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Per-investigation broker.
    pub broker: BrokerSettings,
    /// SSE push channel.
    pub transport: TransportSettings,
    /// Viewer-side watcher.
    pub client: ClientSettings,
    /// Logging.
    pub logging: LoggingSettings,
}

impl TracecastSettings {
    /// Reject values no component can run with.
    pub fn validate(&self) -> Result<()> {
        if self.broker.ring_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.ringCapacity must be at least 1".into(),
            ));
        }
        if self.broker.subscriber_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "broker.subscriberBuffer must be at least 1".into(),
            ));
        }
        if self.transport.heartbeat_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "transport.heartbeatIntervalMs must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.client.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "client.jitterFactor must be within 0..=1, got {}",
                self.client.jitter_factor
            )));
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level (`RUST_LOG` overrides).
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
}
