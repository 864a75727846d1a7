//! Error types for the wire format.

use thiserror::Error;

use crate::event::EventKind;

/// A wire frame whose payload does not match its declared `type`.
#[derive(Debug, Error)]
#[error("invalid {kind} payload: {source}")]
pub struct EventDecodeError {
    /// Declared event kind.
    pub kind: EventKind,
    /// Underlying JSON error.
    #[source]
    pub source: serde_json::Error,
}
