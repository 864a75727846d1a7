//! # tracecast-client
//!
//! Viewer side of tracecast.
//!
//! - **Reconciler**: [`Reconciler`] turns history plus an at-least-once live
//!   feed into one ordered, de-duplicated message log
//! - **Merge**: [`merge`] keeps the highest revision per message id
//! - **API**: [`ApiClient`] wraps the investigation endpoints and the push channel
//! - **SSE**: [`sse`] parses `text/event-stream` bodies
//! - **Watcher**: [`InvestigationWatcher`] reconnects with backoff and publishes
//!   a [`ViewModel`] through a `tokio::sync::watch` channel

#![deny(unsafe_code)]

pub mod api;
pub mod backoff;
pub mod errors;
pub mod merge;
pub mod reconciler;
pub mod sse;
pub mod view;
pub mod watcher;

pub use api::{ApiClient, EventStream};
pub use backoff::ReconnectPolicy;
pub use errors::{ClientError, Result};
pub use merge::{Revision, Versioned, merge};
pub use reconciler::{MessageState, Outcome, Reconciler};
pub use sse::{SseFrame, StreamItem};
pub use view::{ConnectionState, ViewModel};
pub use watcher::InvestigationWatcher;
