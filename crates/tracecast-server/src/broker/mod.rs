//! Per-investigation event fan-out.
//!
//! - [`SessionBroker`]: sequence assignment, replay ring, bounded per-subscriber channels
//! - [`SessionRegistry`]: investigation ID → session, idle reaping
//! - [`Subscription`]: transport-side guard; dropping it unsubscribes

pub mod registry;
pub mod session;
pub mod subscriber;

pub use registry::SessionRegistry;
pub use session::{Lifecycle, SessionBroker};
pub use subscriber::{CloseReason, Subscription};
