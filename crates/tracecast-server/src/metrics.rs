//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render `/metrics`. Fails if a global recorder
/// is already installed.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Raw events accepted by the ingestion endpoint (counter).
pub const EVENTS_INGESTED_TOTAL: &str = "events_ingested_total";
/// Events published to sessions (counter, labels: kind).
pub const EVENTS_PUBLISHED_TOTAL: &str = "events_published_total";
/// Active subscribers across all sessions (gauge).
pub const SUBSCRIBERS_ACTIVE: &str = "subscribers_active";
/// Subscribers dropped by the broker (counter, labels: reason).
pub const SUBSCRIBERS_DROPPED_TOTAL: &str = "subscribers_dropped_total";
/// Live sessions in the registry (gauge).
pub const SESSIONS_ACTIVE: &str = "sessions_active";
/// Sessions evicted by the reaper (counter).
pub const SESSIONS_REAPED_TOTAL: &str = "sessions_reaped_total";
/// Chunk frames folded into a later frame (counter).
pub const FRAMES_COALESCED_TOTAL: &str = "frames_coalesced_total";
/// SSE streams opened (counter).
pub const STREAM_CONNECTIONS_TOTAL: &str = "stream_connections_total";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_without_global_install() {
        let handle = PrometheusBuilder::new().build_recorder().handle();
        let output = render(&handle);
        assert!(output.is_empty() || output.contains('#') || output.contains('\n'));
    }

    #[test]
    fn metric_constants_are_snake_case() {
        let names = [
            EVENTS_INGESTED_TOTAL,
            EVENTS_PUBLISHED_TOTAL,
            SUBSCRIBERS_ACTIVE,
            SUBSCRIBERS_DROPPED_TOTAL,
            SESSIONS_ACTIVE,
            SESSIONS_REAPED_TOTAL,
            FRAMES_COALESCED_TOTAL,
            STREAM_CONNECTIONS_TOTAL,
        ];
        for name in names {
            assert!(
                name.chars().all(|c| c.is_ascii_lowercase() || c == '_'),
                "metric name not snake_case: {name}"
            );
        }
    }

    #[test]
    fn recorded_counter_appears_in_render() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, || {
            metrics::counter!(EVENTS_INGESTED_TOTAL).increment(3);
        });
        assert!(handle.render().contains(EVENTS_INGESTED_TOTAL));
    }
}
