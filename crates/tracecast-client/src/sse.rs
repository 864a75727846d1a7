//! # SSE Parser
//!
//! Turns the push channel's `text/event-stream` body into frames and then
//! into events. Handles:
//! - Line buffering across arbitrary chunk boundaries
//! - `id:` and multi-line `data:` fields, dispatched on a blank line
//! - Comment lines and unknown fields (ignored)
//! - The `[DONE]` terminal marker
//!
//! A read error ends the stream after yielding the error, so callers can tell
//! a dropped connection from a clean end.

use bytes::{Bytes, BytesMut};
use futures::Stream;
use tokio_stream::StreamExt;
use tracecast_core::Event;
use tracing::warn;

use crate::errors::ClientError;

/// Data of the frame that ends a stream cleanly.
pub const DONE_MARKER: &str = "[DONE]";

/// One dispatched SSE frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the last `id:` field in the frame.
    pub id: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
}

/// A decoded unit of the push channel.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamItem {
    /// An event frame.
    Event(Event),
    /// Terminal marker.
    Done,
}

#[derive(Default)]
struct FrameBuilder {
    id: Option<String>,
    data: Vec<String>,
}

impl FrameBuilder {
    /// Feed one line. Returns a frame when the line is a dispatching blank line.
    fn line(&mut self, line: &str) -> Option<SseFrame> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseFrame> {
        if self.data.is_empty() {
            self.id = None;
            return None;
        }
        let frame = SseFrame {
            id: self.id.take(),
            data: self.data.join("\n"),
        };
        self.data.clear();
        Some(frame)
    }
}

struct ParserState<S> {
    stream: S,
    buffer: BytesMut,
    builder: FrameBuilder,
    done: bool,
}

/// Parse SSE frames from a byte stream.
///
/// A trailing frame without its blank line is dispatched when the stream
/// ends; a read error is yielded once and ends the stream.
pub fn parse_sse_frames<S>(byte_stream: S) -> impl Stream<Item = Result<SseFrame, ClientError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let state = ParserState {
        stream: byte_stream,
        buffer: BytesMut::with_capacity(8192),
        builder: FrameBuilder::default(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }

        loop {
            if let Some(newline_pos) = state.buffer.iter().position(|&b| b == b'\n') {
                let mut line_bytes = state.buffer.split_to(newline_pos + 1);
                line_bytes.truncate(line_bytes.len() - 1);
                if line_bytes.last() == Some(&b'\r') {
                    line_bytes.truncate(line_bytes.len() - 1);
                }
                let Ok(line) = std::str::from_utf8(&line_bytes) else {
                    continue;
                };
                if let Some(frame) = state.builder.line(line) {
                    return Some((Ok(frame), state));
                }
                continue;
            }

            match state.stream.next().await {
                Some(Ok(chunk)) => state.buffer.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(ClientError::Http(e)), state));
                }
                None => {
                    state.done = true;
                    if !state.buffer.is_empty() {
                        let rest = state.buffer.split();
                        if let Ok(line) = std::str::from_utf8(&rest) {
                            let _ = state.builder.line(line.trim_end_matches('\r'));
                        }
                    }
                    return state.builder.dispatch().map(|frame| (Ok(frame), state));
                }
            }
        }
    })
}

/// Decode one frame. Returns `None` (with a warning) for undecodable data.
pub fn decode_frame(frame: &SseFrame) -> Option<StreamItem> {
    if frame.data.trim() == DONE_MARKER {
        return Some(StreamItem::Done);
    }
    match serde_json::from_str::<Event>(&frame.data) {
        Ok(event) => Some(StreamItem::Event(event)),
        Err(e) => {
            warn!(
                error = %e,
                data_preview = tracecast_core::text::truncate_str(&frame.data, 100),
                "failed to decode stream frame"
            );
            None
        }
    }
}

/// Parse and decode a push-channel body into [`StreamItem`]s.
///
/// Nothing is yielded after [`StreamItem::Done`].
pub fn parse_event_stream<S>(
    byte_stream: S,
) -> impl Stream<Item = Result<StreamItem, ClientError>> + Send
where
    S: Stream<Item = Result<Bytes, reqwest::Error>> + Send + Unpin + 'static,
{
    let items = parse_sse_frames(byte_stream).filter_map(|frame| match frame {
        Ok(frame) => decode_frame(&frame).map(Ok),
        Err(e) => Some(Err(e)),
    });
    futures::StreamExt::scan(items, false, |finished, item| {
        let out = if *finished {
            None
        } else {
            *finished = matches!(item, Ok(StreamItem::Done));
            Some(item)
        };
        futures::future::ready(out)
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
