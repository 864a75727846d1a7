//! # tracecast-store
//!
//! The investigation store is an external collaborator: investigation
//! metadata and chat history live behind [`InvestigationStore`], an async
//! get/put boundary keyed by investigation ID. The broker never touches it;
//! only HTTP handlers and the ingestion pipeline do, and never while holding
//! a broker lock.
//!
//! [`InMemoryStore`] backs tests and the default server binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod memory;

pub use errors::{Result, StoreError};
pub use memory::InMemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracecast_core::{Investigation, InvestigationStatus, Message};

/// Async store for investigation records and their chat history.
#[async_trait]
pub trait InvestigationStore: Send + Sync {
    /// Insert a new investigation.
    async fn create(&self, investigation: Investigation) -> Result<Investigation>;

    /// Fetch one investigation.
    async fn get(&self, id: &str) -> Result<Investigation>;

    /// All investigations, newest first.
    async fn list(&self) -> Result<Vec<Investigation>>;

    /// Apply a status transition and return the updated record.
    async fn update_status(
        &self,
        id: &str,
        status: InvestigationStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Investigation>;

    /// Record the final agent result.
    async fn set_result(&self, id: &str, result: Value) -> Result<()>;

    /// Remove an investigation and its history.
    async fn delete(&self, id: &str) -> Result<()>;

    /// Append one message to the investigation's history.
    async fn append_message(&self, message: Message) -> Result<()>;

    /// Chat history sorted by timestamp (insertion order breaks ties).
    async fn history(&self, id: &str) -> Result<Vec<Message>>;
}
