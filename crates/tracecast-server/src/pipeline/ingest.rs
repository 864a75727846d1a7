//! Runtime ingestion: adapter → classifier → assembler → store → broker.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use parking_lot::Mutex;
use serde_json::Value;
use tracecast_core::{
    Event, EventPayload, InvestigationStatus, Message, RawEvent, classify, finalized_message,
};
use tracecast_store::InvestigationStore;
use tracing::{debug, instrument, warn};

use super::assembler::ChunkAssembler;
use crate::broker::SessionRegistry;
use crate::metrics::EVENTS_INGESTED_TOTAL;

/// Turns raw runtime output into published events and keeps history in step.
///
/// Store writes happen before the matching publish, so a viewer that sees a
/// terminal event live also finds the terminal status in the store.
pub struct Pipeline {
    registry: Arc<SessionRegistry>,
    store: Arc<dyn InvestigationStore>,
    assemblers: Mutex<HashMap<String, ChunkAssembler>>,
}

impl Pipeline {
    /// Create a pipeline over the given registry and store.
    pub fn new(registry: Arc<SessionRegistry>, store: Arc<dyn InvestigationStore>) -> Self {
        Self {
            registry,
            store,
            assemblers: Mutex::new(HashMap::new()),
        }
    }

    /// Session registry this pipeline publishes into.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Ingest one raw runtime payload (which may expand to several events).
    ///
    /// Returns the sequences assigned; events published to a closed session
    /// are dropped and contribute nothing.
    #[instrument(skip_all, fields(investigation_id = %investigation_id))]
    pub async fn ingest(&self, investigation_id: &str, value: &Value) -> Vec<u64> {
        let raws = RawEvent::normalize(value);
        counter!(EVENTS_INGESTED_TOTAL).increment(1);
        let mut sequences = Vec::with_capacity(raws.len());
        for raw in &raws {
            let event = classify(investigation_id, raw, Utc::now());
            let event = {
                let mut assemblers = self.assemblers.lock();
                assemblers
                    .entry(investigation_id.to_string())
                    .or_default()
                    .apply(raw, event)
            };
            if let Some(seq) = self.emit(event).await {
                sequences.push(seq);
            }
        }
        sequences
    }

    /// Persist what `event` implies, then publish it.
    #[instrument(skip_all, fields(investigation_id = %event.investigation_id, kind = %event.kind()))]
    pub async fn emit(&self, event: Event) -> Option<u64> {
        let investigation_id = event.investigation_id.clone();

        if let Some(message) = finalized_message(&event) {
            self.persist(message).await;
        }
        self.apply_status(&event).await;

        if event.is_terminal() {
            let leftovers = self
                .assemblers
                .lock()
                .remove(&investigation_id)
                .map(|mut asm| asm.finish(&investigation_id))
                .unwrap_or_default();
            for message in leftovers {
                debug!(message_id = %message.id, "finalizing unfinished message");
                self.persist(message).await;
            }
        }

        let session = if reopens(&event) {
            Some(self.registry.get_or_create(&investigation_id))
        } else {
            self.registry.publisher(&investigation_id)
        };
        let sequence = session.and_then(|s| s.publish(event));
        if sequence.is_none() {
            debug!("session closed, event not published");
        }
        sequence
    }

    /// Forget assembler state for an investigation.
    pub fn forget(&self, investigation_id: &str) {
        let _ = self.assemblers.lock().remove(investigation_id);
    }

    async fn persist(&self, message: Message) {
        let message_id = message.id.clone();
        if let Err(e) = self.store.append_message(message).await {
            warn!(message_id, error = %e, "failed to persist message");
        }
    }

    async fn apply_status(&self, event: &Event) {
        let id = event.investigation_id.as_str();
        let (status, error_message) = match &event.payload {
            EventPayload::Started(_) => (InvestigationStatus::Running, None),
            EventPayload::StatusChanged(p) => (p.status, p.error_message.clone()),
            EventPayload::Completion(p) => (p.status, None),
            _ => return,
        };
        if let Err(e) = self
            .store
            .update_status(id, status, error_message, event.timestamp)
            .await
        {
            warn!(status = %status, error = %e, "failed to record status");
            return;
        }
        if let EventPayload::Completion(p) = &event.payload {
            if let Some(result) = &p.result {
                if let Err(e) = self.store.set_result(id, Value::String(result.clone())).await {
                    warn!(error = %e, "failed to record result");
                }
            }
        }
    }
}

/// Events that (re)start an investigation and so may replace a closed session.
fn reopens(event: &Event) -> bool {
    match &event.payload {
        EventPayload::Started(_) => true,
        EventPayload::StatusChanged(p) => !p.status.is_terminal(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tracecast_core::{EventKind, Investigation, MessageType};
    use tracecast_store::InMemoryStore;

    async fn setup() -> (Pipeline, Arc<InMemoryStore>) {
        setup_with(BrokerConfig::default()).await
    }

    async fn setup_with(config: BrokerConfig) -> (Pipeline, Arc<InMemoryStore>) {
        let store = Arc::new(InMemoryStore::new());
        let _ = store.create(Investigation::new("inv_1")).await.unwrap();
        let registry = Arc::new(SessionRegistry::new(config));
        (Pipeline::new(registry, store.clone()), store)
    }

    fn step(n: u32) -> Value {
        json!({"type": "progress", "message": format!("step {n}")})
    }

    fn drain(sub: &mut crate::broker::Subscription) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(e) = sub.try_recv() {
            out.push(e);
        }
        out
    }

    #[tokio::test]
    async fn streamed_text_reaches_subscribers_cumulatively() {
        let (pipeline, _store) = setup().await;
        let mut sub = pipeline.registry().get_or_create("inv_1").subscribe(None);

        for delta in ["Pump ", "3 is ", "overheating"] {
            let _ = pipeline
                .ingest("inv_1", &json!({"text": delta, "partial": true}))
                .await;
        }
        let seqs = pipeline
            .ingest("inv_1", &json!({"text": "Pump 3 is overheating", "partial": false}))
            .await;
        assert_eq!(seqs, vec![4]);

        let events = drain(&mut sub);
        let kinds: Vec<_> = events.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Connected,
                EventKind::MessageChunk,
                EventKind::MessageChunk,
                EventKind::MessageChunk,
                EventKind::MessageComplete,
            ]
        );
        assert_matches!(&events[3].payload, EventPayload::MessageChunk(c) if c.content == "Pump 3 is overheating" && c.chunk_index == 3);
        assert_eq!(events[1].message_id(), events[4].message_id());
    }

    #[tokio::test]
    async fn finalized_messages_are_persisted() {
        let (pipeline, store) = setup().await;
        let _ = pipeline
            .ingest("inv_1", &json!({"text": "partial", "partial": true}))
            .await;
        let _ = pipeline
            .ingest("inv_1", &json!({"text": "final answer", "partial": false}))
            .await;
        let _ = pipeline
            .ingest(
                "inv_1",
                &json!({"function_call": {"id": "c1", "name": "get_alarms", "args": {}}}),
            )
            .await;

        let history = store.history("inv_1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "final answer");
        assert_eq!(history[1].id, "c1");
        assert_eq!(history[1].message_type, MessageType::ToolCall);
    }

    #[tokio::test]
    async fn adk_payload_expands_to_several_events() {
        let (pipeline, _store) = setup().await;
        let raw = json!({
            "author": "analyst",
            "content": {"parts": [
                {"text": "Checking alarms"},
                {"function_call": {"id": "c1", "name": "get_alarms", "args": {"plant": 7}}}
            ]}
        });
        let seqs = pipeline.ingest("inv_1", &raw).await;
        assert_eq!(seqs.len(), 1);
    }

    #[tokio::test]
    async fn status_events_update_store() {
        let (pipeline, store) = setup().await;
        let _ = pipeline.ingest("inv_1", &json!({"type": "started"})).await;
        assert_eq!(store.get("inv_1").await.unwrap().status, InvestigationStatus::Running);

        let _ = pipeline
            .ingest(
                "inv_1",
                &json!({"type": "completion", "status": "completed", "result": "Valve replaced"}),
            )
            .await;
        let inv = store.get("inv_1").await.unwrap();
        assert_eq!(inv.status, InvestigationStatus::Completed);
        assert_eq!(inv.result, Some(json!("Valve replaced")));
    }

    #[tokio::test]
    async fn terminal_event_persists_unfinished_chunks() {
        let (pipeline, store) = setup().await;
        let _ = pipeline
            .ingest("inv_1", &json!({"text": "half a thought", "partial": true}))
            .await;
        let _ = pipeline
            .ingest("inv_1", &json!({"status": "failed", "error": "quota exceeded"}))
            .await;

        let history = store.history("inv_1").await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].content, "half a thought");
        let inv = store.get("inv_1").await.unwrap();
        assert_eq!(inv.error_message.as_deref(), Some("quota exceeded"));
    }

    #[tokio::test]
    async fn terminal_event_drains_subscribers() {
        let (pipeline, _store) = setup().await;
        let session = pipeline.registry().get_or_create("inv_1");
        let mut sub = session.subscribe(None);
        let _ = pipeline
            .ingest("inv_1", &json!({"type": "completion", "result": "done"}))
            .await;
        let events = drain(&mut sub);
        assert_eq!(events.last().unwrap().kind(), EventKind::Completion);
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn unrecognized_payload_becomes_error_event() {
        let (pipeline, _store) = setup().await;
        let mut sub = pipeline.registry().get_or_create("inv_1").subscribe(None);
        let _ = pipeline.ingest("inv_1", &json!({"weird": true})).await;
        let events = drain(&mut sub);
        assert_matches!(&events[1].payload, EventPayload::Error(e) if e.code.as_deref() == Some("UNCLASSIFIED"));
    }

    // ── session continuity ──

    #[tokio::test(start_paused = true)]
    async fn sequences_continue_after_idle_session_is_reaped() {
        let (pipeline, _store) = setup_with(BrokerConfig {
            idle_timeout: std::time::Duration::from_secs(10),
            ..BrokerConfig::default()
        })
        .await;
        for n in 1..=5 {
            let _ = pipeline.ingest("inv_1", &step(n)).await;
        }

        tokio::time::advance(std::time::Duration::from_secs(11)).await;
        let reaped = pipeline.registry().reap(tokio::time::Instant::now());
        assert_eq!(reaped, vec!["inv_1".to_string()]);

        let seqs = pipeline.ingest("inv_1", &step(6)).await;
        assert_eq!(seqs, vec![6]);

        let mut resumed = pipeline.registry().get_or_create("inv_1").subscribe(Some(5));
        let events = drain(&mut resumed);
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].sequence, Some(6));
    }

    #[tokio::test]
    async fn publishing_after_close_is_ignored() {
        let (pipeline, _store) = setup().await;
        let done = pipeline
            .ingest("inv_1", &json!({"type": "completion", "result": "done"}))
            .await;
        assert_eq!(done, vec![1]);

        assert!(pipeline.ingest("inv_1", &step(1)).await.is_empty());
        let session = pipeline.registry().get("inv_1").unwrap();
        assert_eq!(session.lifecycle(), crate::broker::Lifecycle::Closed);

        // Still ignored once the closed session has been reaped.
        let _ = pipeline.registry().reap(tokio::time::Instant::now());
        assert!(pipeline.ingest("inv_1", &step(2)).await.is_empty());
        assert_eq!(pipeline.registry().session_count(), 0);
    }

    #[tokio::test]
    async fn restart_opens_new_session_with_continued_sequence() {
        let (pipeline, _store) = setup().await;
        let _ = pipeline
            .ingest("inv_1", &json!({"type": "completion", "result": "done"}))
            .await;
        let _ = pipeline.registry().reap(tokio::time::Instant::now());

        let seqs = pipeline.ingest("inv_1", &json!({"type": "started"})).await;
        assert_eq!(seqs, vec![2]);
        assert_eq!(pipeline.ingest("inv_1", &step(1)).await, vec![3]);
    }
}
