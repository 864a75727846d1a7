//! Reconnect policy and backoff calculation.
//!
//! - [`ReconnectPolicy`]: attempts, delays and jitter for stream reconnects
//! - [`backoff_delay_ms`]: exponential backoff with explicit randomness

use std::time::Duration;

use tracecast_settings::ClientSettings;

/// How the watcher retries a dropped push channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    /// Attempts before giving up.
    pub max_retries: u32,
    /// Delay before the first attempt.
    pub base_delay: Duration,
    /// Delay cap.
    pub max_delay: Duration,
    /// Jitter factor (0.0–1.0), applied symmetrically.
    pub jitter_factor: f64,
    /// History poll interval while reconnecting.
    pub poll_interval: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_settings(&ClientSettings::default())
    }
}

impl ReconnectPolicy {
    /// Policy from client settings.
    pub fn from_settings(settings: &ClientSettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: Duration::from_millis(settings.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(settings.reconnect_max_delay_ms),
            jitter_factor: settings.jitter_factor.clamp(0.0, 1.0),
            poll_interval: Duration::from_millis(settings.history_poll_interval_ms.max(1)),
        }
    }

    /// Delay before zero-based `attempt`, with `random` in `[0.0, 1.0)`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn delay_with_random(&self, attempt: u32, random: f64) -> Duration {
        Duration::from_millis(backoff_delay_ms(
            attempt,
            self.base_delay.as_millis() as u64,
            self.max_delay.as_millis() as u64,
            self.jitter_factor,
            random,
        ))
    }

    /// Delay before zero-based `attempt`, jittered with a thread-local RNG.
    pub fn delay(&self, attempt: u32) -> Duration {
        self.delay_with_random(attempt, rand::random::<f64>())
    }

    /// Whether another attempt is allowed after `attempts` failures.
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_retries
    }
}

/// Exponential backoff: `min(max, base * 2^attempt) * (1 + (2r - 1) * jitter)`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_ms(
    attempt: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << attempt.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor;
    let with_jitter = (capped as f64) * jitter;

    with_jitter.round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(4_000),
            jitter_factor: 0.2,
            poll_interval: Duration::from_secs(2),
        }
    }

    #[test]
    fn defaults_follow_settings() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.max_retries, 8);
        assert_eq!(p.base_delay, Duration::from_millis(500));
        assert_eq!(p.poll_interval, Duration::from_secs(2));
    }

    #[test]
    fn exponential_growth_without_jitter() {
        let delays: Vec<u64> = (0..4).map(|a| backoff_delay_ms(a, 500, 60_000, 0.0, 0.9)).collect();
        assert_eq!(delays, vec![500, 1000, 2000, 4000]);
    }

    #[test]
    fn capped_at_max() {
        assert_eq!(backoff_delay_ms(10, 500, 4_000, 0.0, 0.0), 4_000);
    }

    #[test]
    fn high_attempt_no_overflow() {
        let d = backoff_delay_ms(200, 1_000, 60_000, 0.2, 1.0);
        assert_eq!(d, 72_000);
    }

    #[test]
    fn jitter_is_symmetric() {
        let p = policy();
        assert_eq!(p.delay_with_random(0, 0.0), Duration::from_millis(400));
        assert_eq!(p.delay_with_random(0, 0.5), Duration::from_millis(500));
        assert_eq!(p.delay_with_random(0, 1.0), Duration::from_millis(600));
    }

    #[test]
    fn random_delay_within_bounds() {
        let p = policy();
        for attempt in 0..6 {
            let d = p.delay(attempt);
            assert!(d >= Duration::from_millis(400));
            assert!(d <= Duration::from_millis(4_800));
        }
    }

    #[test]
    fn allows_until_max_retries() {
        let p = policy();
        assert!(p.allows(0));
        assert!(p.allows(2));
        assert!(!p.allows(3));
    }

    #[test]
    fn jitter_clamped_from_settings() {
        let settings = ClientSettings {
            jitter_factor: 4.0,
            ..ClientSettings::default()
        };
        assert!((ReconnectPolicy::from_settings(&settings).jitter_factor - 1.0).abs() < f64::EPSILON);
    }
}
