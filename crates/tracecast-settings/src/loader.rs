//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracecast_logging::{LogFormat, LogLevel};
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::TracecastSettings;

/// Resolve the path to the settings file (`~/.tracecast/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".tracecast").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<TracecastSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or values that fail
/// [`TracecastSettings::validate`] are errors.
pub fn load_settings_from_path(path: &Path) -> Result<TracecastSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<TracecastSettings> {
    let defaults = serde_json::to_value(TracecastSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `TRACECAST_*` environment overrides.
pub fn apply_env_overrides(settings: &mut TracecastSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary lookup.
///
/// Integers must parse and fall within range. Invalid values are ignored
/// with a warning, leaving the file/default value in place.
pub fn apply_overrides_from<F>(settings: &mut TracecastSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TRACECAST_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("TRACECAST_PORT", 0, 65535) {
        settings.server.port = v;
    }

    // ── Broker ──────────────────────────────────────────────────────
    if let Some(v) = env.usize("TRACECAST_RING_CAPACITY", 1, 1_000_000) {
        settings.broker.ring_capacity = v;
    }
    if let Some(v) = env.usize("TRACECAST_SUBSCRIBER_BUFFER", 1, 65_536) {
        settings.broker.subscriber_buffer = v;
    }
    if let Some(v) = env.u64("TRACECAST_IDLE_TIMEOUT_MS", 1_000, 86_400_000) {
        settings.broker.idle_timeout_ms = v;
    }

    // ── Transport ───────────────────────────────────────────────────
    if let Some(v) = env.u64("TRACECAST_HEARTBEAT_INTERVAL_MS", 100, 600_000) {
        settings.transport.heartbeat_interval_ms = v;
    }
    if let Some(v) = env.u64("TRACECAST_COALESCE_WINDOW_MS", 0, 5_000) {
        settings.transport.coalesce_window_ms = v;
    }

    // ── Client ──────────────────────────────────────────────────────
    if let Some(v) = env.string("TRACECAST_BASE_URL") {
        settings.client.base_url = v;
    }
    if let Some(v) = env.u64("TRACECAST_MAX_RETRIES", 0, 1_000) {
        settings.client.max_retries = u32::try_from(v).unwrap_or(u32::MAX);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.string("TRACECAST_LOG_LEVEL") {
        settings.logging.level = LogLevel::from_str_lossy(&v);
    }
    if let Some(v) = env.string("TRACECAST_LOG_FORMAT") {
        match parse_log_format(&v) {
            Some(format) => settings.logging.format = format,
            None => warn!(key = "TRACECAST_LOG_FORMAT", value = %v, "invalid log format, ignoring"),
        }
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a log format name (case-insensitive).
pub fn parse_log_format(val: &str) -> Option<LogFormat> {
    match val.to_lowercase().as_str() {
        "compact" | "text" | "pretty" => Some(LogFormat::Compact),
        "json" => Some(LogFormat::Json),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Env readers ─────────────────────────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
