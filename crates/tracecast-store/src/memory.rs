//! In-memory store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracecast_core::{Investigation, InvestigationStatus, Message};
use tracing::debug;

use crate::errors::{Result, StoreError};
use crate::InvestigationStore;

struct Record {
    investigation: Investigation,
    messages: Vec<Message>,
}

/// Process-local [`InvestigationStore`].
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, Record>>,
}

impl InMemoryStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored investigations.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl InvestigationStore for InMemoryStore {
    async fn create(&self, investigation: Investigation) -> Result<Investigation> {
        let mut records = self.records.write();
        if records.contains_key(&investigation.id) {
            return Err(StoreError::AlreadyExists(investigation.id));
        }
        debug!(investigation_id = %investigation.id, "investigation created");
        let _ = records.insert(
            investigation.id.clone(),
            Record {
                investigation: investigation.clone(),
                messages: Vec::new(),
            },
        );
        Ok(investigation)
    }

    async fn get(&self, id: &str) -> Result<Investigation> {
        self.records
            .read()
            .get(id)
            .map(|r| r.investigation.clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list(&self) -> Result<Vec<Investigation>> {
        let mut all: Vec<Investigation> = self
            .records
            .read()
            .values()
            .map(|r| r.investigation.clone())
            .collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(all)
    }

    async fn update_status(
        &self,
        id: &str,
        status: InvestigationStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) -> Result<Investigation> {
        let mut records = self.records.write();
        let investigation = records
            .get_mut(id)
            .map(|r| &mut r.investigation)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        investigation.transition(status, error_message, at);
        Ok(investigation.clone())
    }

    async fn set_result(&self, id: &str, result: Value) -> Result<()> {
        let mut records = self.records.write();
        let investigation = records
            .get_mut(id)
            .map(|r| &mut r.investigation)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        investigation.result = Some(result);
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.records
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn append_message(&self, message: Message) -> Result<()> {
        let mut records = self.records.write();
        let record = records
            .get_mut(&message.investigation_id)
            .ok_or_else(|| StoreError::NotFound(message.investigation_id.clone()))?;
        // Same id appended twice (a retried ingest) replaces the earlier copy.
        if let Some(existing) = record.messages.iter_mut().find(|m| m.id == message.id) {
            *existing = message;
        } else {
            record.messages.push(message);
        }
        Ok(())
    }

    async fn history(&self, id: &str) -> Result<Vec<Message>> {
        let records = self.records.read();
        let record = records
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let mut messages = record.messages.clone();
        // stable: insertion order breaks timestamp ties
        messages.sort_by_key(|m| m.timestamp);
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Duration;
    use tracecast_core::MessageType;

    fn msg(id: &str, offset_ms: i64, base: DateTime<Utc>) -> Message {
        Message::new(
            id,
            "inv_1",
            MessageType::Agent,
            id,
            base + Duration::milliseconds(offset_ms),
        )
    }

    #[tokio::test]
    async fn create_and_get() {
        let store = InMemoryStore::new();
        let _ = store.create(Investigation::new("inv_1")).await.unwrap();
        let inv = store.get("inv_1").await.unwrap();
        assert_eq!(inv.status, InvestigationStatus::Pending);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_create_rejected() {
        let store = InMemoryStore::new();
        let _ = store.create(Investigation::new("inv_1")).await.unwrap();
        assert_matches!(
            store.create(Investigation::new("inv_1")).await,
            Err(StoreError::AlreadyExists(id)) if id == "inv_1"
        );
    }

    #[tokio::test]
    async fn missing_investigation_is_not_found() {
        let store = InMemoryStore::new();
        assert_matches!(store.get("nope").await, Err(StoreError::NotFound(_)));
        assert_matches!(store.history("nope").await, Err(StoreError::NotFound(_)));
        assert_matches!(store.delete("nope").await, Err(StoreError::NotFound(_)));
        assert_matches!(
            store.append_message(msg("m1", 0, Utc::now())).await,
            Err(StoreError::NotFound(_))
        );
    }

    #[tokio::test]
    async fn history_sorted_by_timestamp_with_stable_ties() {
        let store = InMemoryStore::new();
        let _ = store.create(Investigation::new("inv_1")).await.unwrap();
        let base = Utc::now();
        store.append_message(msg("late", 20, base)).await.unwrap();
        store.append_message(msg("tie_a", 10, base)).await.unwrap();
        store.append_message(msg("tie_b", 10, base)).await.unwrap();
        store.append_message(msg("early", 0, base)).await.unwrap();

        let ids: Vec<String> = store
            .history("inv_1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(ids, vec!["early", "tie_a", "tie_b", "late"]);
    }

    #[tokio::test]
    async fn append_same_id_replaces() {
        let store = InMemoryStore::new();
        let _ = store.create(Investigation::new("inv_1")).await.unwrap();
        let base = Utc::now();
        store.append_message(msg("m1", 0, base)).await.unwrap();
        let mut updated = msg("m1", 0, base);
        updated.content = "final".into();
        store.append_message(updated).await.unwrap();

        let history = store.history("inv_1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "final");
    }

    #[tokio::test]
    async fn update_status_and_result() {
        let store = InMemoryStore::new();
        let _ = store.create(Investigation::new("inv_1")).await.unwrap();
        let inv = store
            .update_status("inv_1", InvestigationStatus::Completed, None, Utc::now())
            .await
            .unwrap();
        assert!(inv.completed_at.is_some());
        store
            .set_result("inv_1", serde_json::json!("all clear"))
            .await
            .unwrap();
        assert_eq!(
            store.get("inv_1").await.unwrap().result,
            Some(serde_json::json!("all clear"))
        );
    }

    #[tokio::test]
    async fn delete_removes_history() {
        let store = InMemoryStore::new();
        let _ = store.create(Investigation::new("inv_1")).await.unwrap();
        store.delete("inv_1").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn list_newest_first() {
        let store = InMemoryStore::new();
        let mut older = Investigation::new("a");
        older.created_at -= Duration::seconds(10);
        let _ = store.create(older).await.unwrap();
        let _ = store.create(Investigation::new("b")).await.unwrap();
        let ids: Vec<String> = store.list().await.unwrap().into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }
}
