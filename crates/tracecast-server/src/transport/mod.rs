//! SSE push channel.
//!
//! A [`Subscription`](crate::broker::Subscription) becomes a stream of
//! [`Frame`]s (coalesced chunks, heartbeats, terminal marker), which
//! [`into_sse`] encodes as `text/event-stream`.

pub mod coalesce;
pub mod sse;
pub mod stream;

pub use coalesce::ChunkCoalescer;
pub use sse::{DONE_MARKER, encode, into_sse};
pub use stream::{Frame, SUBSCRIBER_LAGGED, boxed_terminal, live_frames, terminal_frames};
