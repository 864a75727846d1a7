//! Store error types.

use thiserror::Error;

/// Errors returned by [`InvestigationStore`](crate::InvestigationStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No investigation with this ID.
    #[error("investigation not found: {0}")]
    NotFound(String),

    /// An investigation with this ID already exists.
    #[error("investigation already exists: {0}")]
    AlreadyExists(String),

    /// Backend failure (I/O, serialization, ...).
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Convenience type alias for store results.
pub type Result<T> = std::result::Result<T, StoreError>;
