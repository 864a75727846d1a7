//! Frame → SSE encoding.

use std::convert::Infallible;

use axum::response::sse::{Event as SseEvent, Sse};
use futures::{Stream, StreamExt};
use tracing::warn;

use super::stream::Frame;

/// Data payload of the terminal marker frame.
pub const DONE_MARKER: &str = "[DONE]";

/// Encode one frame: `id: <sequence>` when the event has one, `data: <json>`.
pub fn encode(frame: &Frame) -> Result<SseEvent, axum::Error> {
    match frame {
        Frame::Event(event) => {
            let sse = SseEvent::default().json_data(event)?;
            Ok(match event.sequence {
                Some(seq) => sse.id(seq.to_string()),
                None => sse,
            })
        }
        Frame::Done => Ok(SseEvent::default().data(DONE_MARKER)),
    }
}

/// Wrap a frame stream as an SSE response. Frames that fail to encode are
/// logged and skipped.
pub fn into_sse<S>(frames: S) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>>
where
    S: Stream<Item = Frame> + Send + 'static,
{
    let events = frames.filter_map(|frame| async move {
        match encode(&frame) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!(error = %e, "failed to encode frame");
                None
            }
        }
    });
    Sse::new(events)
}
