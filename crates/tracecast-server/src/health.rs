//! `/health` endpoint.

use serde::Serialize;
use tokio::time::Instant;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// `"ok"` while serving, `"draining"` once shutdown began.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Live broker sessions.
    pub sessions: usize,
    /// Attached stream subscribers across all sessions.
    pub subscribers: usize,
}

/// Build a health response from live counters.
pub fn health_check(
    start_time: Instant,
    sessions: usize,
    subscribers: usize,
    shutting_down: bool,
) -> HealthResponse {
    HealthResponse {
        status: if shutting_down { "draining" } else { "ok" },
        uptime_secs: start_time.elapsed().as_secs(),
        sessions,
        subscribers,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn status_reflects_shutdown() {
        assert_eq!(health_check(Instant::now(), 0, 0, false).status, "ok");
        assert_eq!(health_check(Instant::now(), 0, 0, true).status, "draining");
    }

    #[tokio::test(start_paused = true)]
    async fn uptime_increases() {
        let start = Instant::now();
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(health_check(start, 0, 0, false).uptime_secs >= 60);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), 3, 7, false);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["sessions"], 3);
        assert_eq!(parsed["subscribers"], 7);
        assert!(parsed["uptime_secs"].is_number());
    }
}
