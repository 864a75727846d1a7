//! # tracecast-server
//!
//! Per-investigation session broker and the SSE push channel in front of it.
//!
//! - [`broker`]: sequence assignment, replay ring, bounded subscriber channels, idle reaping
//! - [`pipeline`]: raw runtime events → classified, assembled, persisted, published
//! - [`transport`]: heartbeat, chunk coalescing, `text/event-stream` encoding
//! - [`http`]: investigation CRUD, chat history, ingestion and stream endpoints
//! - Graceful shutdown via [`ShutdownCoordinator`]; Prometheus metrics on `/metrics`

#![deny(unsafe_code)]

pub mod broker;
pub mod config;
pub mod errors;
pub mod health;
pub mod http;
pub mod metrics;
pub mod pipeline;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use broker::{CloseReason, Lifecycle, SessionBroker, SessionRegistry, Subscription};
pub use config::{BrokerConfig, ServerConfig, TransportConfig};
pub use errors::ApiError;
pub use pipeline::{ChunkAssembler, Pipeline};
pub use server::{AppState, TracecastServer};
pub use shutdown::ShutdownCoordinator;
pub use transport::Frame;
