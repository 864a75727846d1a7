//! `GET /investigations/{id}/stream`.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures::StreamExt;
use metrics::counter;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::broker::Lifecycle;
use crate::errors::ApiError;
use crate::metrics::STREAM_CONNECTIONS_TOTAL;
use crate::server::AppState;
use crate::transport::{boxed_terminal, into_sse, live_frames};

/// Header browsers send when resuming an event stream.
pub const LAST_EVENT_ID: &str = "last-event-id";

/// Query parameters.
#[derive(Debug, Default, Deserialize)]
pub struct StreamQuery {
    /// Replay events with a sequence greater than this.
    #[serde(default)]
    pub after: Option<String>,
}

fn resume_point(headers: &HeaderMap, query: &StreamQuery) -> Result<Option<u64>, ApiError> {
    let from_header = headers
        .get(LAST_EVENT_ID)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    if from_header.is_some() {
        return Ok(from_header);
    }
    match query.after.as_deref() {
        None | Some("") => Ok(None),
        Some(raw) => raw
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ApiError::invalid(format!("after must be a sequence number, got {raw:?}"))),
    }
}

/// Open the push channel.
///
/// An investigation that is already terminal gets `connected`, `completion`
/// and the terminal marker instead of a live subscription.
#[instrument(skip_all, fields(investigation_id = %id))]
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let after = resume_point(&headers, &query)?;
    let investigation = state.store.get(&id).await?;
    counter!(STREAM_CONNECTIONS_TOTAL).increment(1);

    if investigation.status.is_terminal() {
        debug!(status = %investigation.status, "investigation terminal, sending snapshot");
        return Ok(into_sse(boxed_terminal(&investigation)).into_response());
    }

    let session = state.registry.get_or_create(&id);
    let subscription = session.subscribe(after);

    // The terminal event may have landed between the store read and subscribe.
    if session.lifecycle() != Lifecycle::Open {
        let latest = state.store.get(&id).await?;
        if latest.status.is_terminal() {
            drop(subscription);
            return Ok(into_sse(boxed_terminal(&latest)).into_response());
        }
    }

    debug!(subscriber_id = %subscription.id(), ?after, "stream opened");
    let frames = live_frames(
        subscription,
        state.transport.clone(),
        state.shutdown.token(),
    )
    .boxed();
    Ok(into_sse(frames).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn header_wins_over_query() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(LAST_EVENT_ID, HeaderValue::from_static("12"));
        let query = StreamQuery {
            after: Some("3".into()),
        };
        assert_eq!(resume_point(&headers, &query).unwrap(), Some(12));
    }

    #[test]
    fn query_used_without_header() {
        let query = StreamQuery {
            after: Some("3".into()),
        };
        assert_eq!(resume_point(&HeaderMap::new(), &query).unwrap(), Some(3));
        assert_eq!(resume_point(&HeaderMap::new(), &StreamQuery::default()).unwrap(), None);
    }

    #[test]
    fn garbage_header_ignored_garbage_query_rejected() {
        let mut headers = HeaderMap::new();
        let _ = headers.insert(LAST_EVENT_ID, HeaderValue::from_static("abc"));
        assert_eq!(resume_point(&headers, &StreamQuery::default()).unwrap(), None);

        let query = StreamQuery {
            after: Some("abc".into()),
        };
        assert!(resume_point(&HeaderMap::new(), &query).is_err());
    }
}
