//! Chunk coalescing.
//!
//! Chunks carry cumulative content, so when several chunks for one message
//! arrive inside the window only the newest needs to go out. A pending chunk
//! is flushed when its window elapses, before any other event, and when the
//! stream ends.

use std::time::Duration;

use metrics::counter;
use tokio::time::Instant;
use tracecast_core::{Event, EventPayload};

use crate::metrics::FRAMES_COALESCED_TOTAL;

struct Pending {
    event: Event,
    deadline: Instant,
}

impl Pending {
    fn chunk_key(&self) -> Option<(&str, u64)> {
        chunk_key(&self.event)
    }
}

fn chunk_key(event: &Event) -> Option<(&str, u64)> {
    match &event.payload {
        EventPayload::MessageChunk(c) => Some((c.message_id.as_str(), c.chunk_index)),
        _ => None,
    }
}

/// Holds back at most one chunk per stream.
pub struct ChunkCoalescer {
    window: Duration,
    pending: Option<Pending>,
    merged: u64,
}

impl ChunkCoalescer {
    /// A zero window disables coalescing.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            merged: 0,
        }
    }

    /// Whether chunks are held back at all.
    pub fn is_enabled(&self) -> bool {
        !self.window.is_zero()
    }

    /// Frames folded into a later frame so far.
    pub fn merged(&self) -> u64 {
        self.merged
    }

    /// When the pending chunk must go out, if one is held.
    pub fn deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.deadline)
    }

    /// Offer an event. Returns the events ready to send, in order.
    pub fn push(&mut self, event: Event, now: Instant) -> Vec<Event> {
        if !self.is_enabled() {
            return vec![event];
        }

        let Some((message_id, chunk_index)) = chunk_key(&event) else {
            let mut out: Vec<Event> = self.flush().into_iter().collect();
            out.push(event);
            return out;
        };

        if let Some(pending) = &mut self.pending {
            if let Some((pending_id, pending_index)) = pending.chunk_key() {
                if pending_id == message_id {
                    if chunk_index >= pending_index {
                        pending.event = event;
                    }
                    self.merged += 1;
                    counter!(FRAMES_COALESCED_TOTAL).increment(1);
                    return Vec::new();
                }
            }
        }

        let out: Vec<Event> = self.flush().into_iter().collect();
        self.pending = Some(Pending {
            event,
            deadline: now + self.window,
        });
        out
    }

    /// Release the pending chunk if its window has elapsed.
    pub fn poll_expired(&mut self, now: Instant) -> Option<Event> {
        if self.deadline().is_some_and(|d| d <= now) {
            self.flush()
        } else {
            None
        }
    }

    /// Release the pending chunk unconditionally.
    pub fn flush(&mut self) -> Option<Event> {
        self.pending.take().map(|p| p.event)
    }
}
