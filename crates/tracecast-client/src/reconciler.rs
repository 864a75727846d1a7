//! Client-side reconciliation of history and live events.
//!
//! Each message id moves `Absent → Streaming → Finalized` and never back.
//! The reconciler is synchronous and owns no I/O; the watcher feeds it
//! history snapshots and stream events and renders [`Reconciler::view`].

use std::collections::{HashMap, HashSet};

use serde_json::json;
use tracecast_core::{
    Event, EventPayload, InvestigationStatus, Message, MessageChunkPayload, finalized_message,
};
use tracing::{debug, trace};

use crate::merge::{Revision, Versioned, merge};
use crate::view::{ConnectionState, ViewModel};

/// Gap between consecutive history sequences.
pub const HISTORY_SEQUENCE_STEP: u64 = 1000;

/// Base of the live sequence range; everything below is history.
///
/// A live message is ordered by `LIVE_SEQUENCE_BASE + server sequence`, so
/// equal-timestamp messages sort the way the server published them whatever
/// order they arrive in.
pub const LIVE_SEQUENCE_BASE: u64 = 1 << 48;

/// Per-message state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageState {
    /// Receiving chunks.
    Streaming,
    /// Content is fixed.
    Finalized,
}

/// What applying one event did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The view changed.
    Updated,
    /// Nothing visible changed.
    Unchanged,
    /// A chunk older than one already applied.
    Stale,
    /// A chunk for a finalized message.
    Conflict,
}

#[derive(Clone, Debug)]
struct LiveEntry {
    message: Message,
    state: MessageState,
    chunk_index: u64,
}

impl LiveEntry {
    fn revision(&self) -> Revision {
        match self.state {
            MessageState::Streaming => Revision::streaming(self.chunk_index),
            MessageState::Finalized => Revision::FINAL,
        }
    }
}

/// Merges the authoritative history with an at-least-once live feed.
#[derive(Debug)]
pub struct Reconciler {
    investigation_id: String,
    history: Vec<Message>,
    history_ids: HashSet<String>,
    live: HashMap<String, LiveEntry>,
    next_live_sequence: u64,
    last_server_sequence: Option<u64>,
    status: Option<InvestigationStatus>,
    notice: Option<String>,
    deleted: bool,
    conflicts: u64,
}

impl Reconciler {
    /// Empty reconciler for one investigation.
    pub fn new(investigation_id: impl Into<String>) -> Self {
        Self {
            investigation_id: investigation_id.into(),
            history: Vec::new(),
            history_ids: HashSet::new(),
            live: HashMap::new(),
            next_live_sequence: LIVE_SEQUENCE_BASE,
            last_server_sequence: None,
            status: None,
            notice: None,
            deleted: false,
            conflicts: 0,
        }
    }

    /// Investigation this reconciler follows.
    pub fn investigation_id(&self) -> &str {
        &self.investigation_id
    }

    /// Highest server sequence seen on the live feed; resume point for a
    /// reconnect.
    pub fn last_sequence(&self) -> Option<u64> {
        self.last_server_sequence
    }

    /// Last known status.
    pub fn status(&self) -> Option<InvestigationStatus> {
        self.status
    }

    /// Record a status learned out of band (e.g. from the investigation record).
    pub fn set_status(&mut self, status: InvestigationStatus) {
        self.status = Some(status);
    }

    /// Latest stream notice.
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    /// Whether a `deleted` event arrived.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Chunks ignored because their message was already finalized.
    pub fn conflicts(&self) -> u64 {
        self.conflicts
    }

    /// State of a message id (`None` while absent).
    pub fn state_of(&self, id: &str) -> Option<MessageState> {
        if self.history_ids.contains(id) {
            return Some(MessageState::Finalized);
        }
        self.live.get(id).map(|e| e.state)
    }

    /// Replace the history snapshot.
    ///
    /// History is authoritative and always finalized. Entries get sequences
    /// `1000, 2000, ...` in timestamp order, all below the live range, so they
    /// sort before live messages with equal timestamps.
    pub fn load_history(&mut self, mut messages: Vec<Message>) {
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let mut seen = HashSet::with_capacity(messages.len());
        messages.retain(|m| seen.insert(m.id.clone()));
        for (i, message) in (1u64..).zip(messages.iter_mut()) {
            message.sequence = i * HISTORY_SEQUENCE_STEP;
        }
        self.history_ids = seen;
        self.history = messages;

        let history_ids = &self.history_ids;
        self.live.retain(|id, _| !history_ids.contains(id));
        debug!(
            investigation_id = %self.investigation_id,
            history = self.history.len(),
            live = self.live.len(),
            "history loaded"
        );
    }

    /// Add a message the server returned directly (e.g. a posted user message).
    pub fn insert_message(&mut self, message: Message) -> Outcome {
        self.finalize(message, None)
    }

    /// Apply one live event.
    pub fn apply(&mut self, event: &Event) -> Outcome {
        if let Some(seq) = event.sequence {
            self.last_server_sequence = Some(self.last_server_sequence.map_or(seq, |s| s.max(seq)));
        }

        match &event.payload {
            EventPayload::MessageChunk(chunk) => self.apply_chunk(event, chunk),
            EventPayload::MessageComplete(_)
            | EventPayload::ToolCallRequested(_)
            | EventPayload::ToolResult(_)
            | EventPayload::ProgressUpdate(_)
            | EventPayload::WorkorderStatus(_) => match finalized_message(event) {
                Some(message) => self.finalize(message, event.sequence),
                None => Outcome::Unchanged,
            },
            EventPayload::Started(_) => self.update_status(InvestigationStatus::Running),
            EventPayload::StatusChanged(p) => self.update_status(p.status),
            EventPayload::Completion(p) => self.update_status(p.status),
            EventPayload::Deleted(_) => {
                self.deleted = true;
                let _ = self.force_finalize();
                Outcome::Updated
            }
            EventPayload::Error(p) => {
                self.notice = Some(p.error.clone());
                Outcome::Updated
            }
            EventPayload::Connected(_) | EventPayload::Heartbeat(_) | EventPayload::StateDelta(_) => {
                Outcome::Unchanged
            }
        }
    }

    /// Reconciled log in display order.
    pub fn messages(&self) -> Vec<Message> {
        let history = self.history.iter().cloned().map(Versioned::finalized);
        let live = self.live.values().map(|e| Versioned {
            message: e.message.clone(),
            revision: e.revision(),
        });
        merge(history.chain(live))
    }

    /// Snapshot for renderers.
    pub fn view(&self, connection: ConnectionState) -> ViewModel {
        ViewModel {
            messages: self.messages(),
            status: self.status,
            connection,
            notice: self.notice.clone(),
            deleted: self.deleted,
        }
    }

    /// Ordering sequence for a new live message.
    ///
    /// Derived from the server sequence when the event carries one. Messages
    /// without one (posted directly) follow everything seen so far.
    fn live_sequence(&mut self, server_sequence: Option<u64>) -> u64 {
        if let Some(seq) = server_sequence {
            return LIVE_SEQUENCE_BASE.saturating_add(seq);
        }
        let after_seen = self
            .last_server_sequence
            .map_or(LIVE_SEQUENCE_BASE, |s| LIVE_SEQUENCE_BASE.saturating_add(s));
        let seq = self.next_live_sequence.max(after_seen.saturating_add(1));
        self.next_live_sequence = seq.saturating_add(1);
        seq
    }

    fn apply_chunk(&mut self, event: &Event, chunk: &MessageChunkPayload) -> Outcome {
        if self.state_of(&chunk.message_id) == Some(MessageState::Finalized) {
            self.conflicts += 1;
            trace!(message_id = %chunk.message_id, "chunk for finalized message ignored");
            return Outcome::Conflict;
        }

        if let Some(entry) = self.live.get_mut(&chunk.message_id) {
            if chunk.chunk_index < entry.chunk_index {
                return Outcome::Stale;
            }
            if chunk.chunk_index == entry.chunk_index && entry.message.content == chunk.content {
                return Outcome::Unchanged;
            }
            entry.chunk_index = chunk.chunk_index;
            entry.message.content.clone_from(&chunk.content);
            return Outcome::Updated;
        }

        let sequence = self.live_sequence(event.sequence);
        let mut message = Message::new(
            &chunk.message_id,
            &event.investigation_id,
            chunk.message_type,
            &chunk.content,
            event.timestamp,
        );
        message.sequence = sequence;
        if let Some(author) = &chunk.author {
            message.metadata = Some(json!({ "author": author }));
        }
        let _ = self.live.insert(
            chunk.message_id.clone(),
            LiveEntry {
                message,
                state: MessageState::Streaming,
                chunk_index: chunk.chunk_index,
            },
        );
        Outcome::Updated
    }

    fn finalize(&mut self, mut message: Message, server_sequence: Option<u64>) -> Outcome {
        if self.history_ids.contains(&message.id) {
            return Outcome::Unchanged;
        }
        match self.live.get_mut(&message.id) {
            Some(entry) if entry.state == MessageState::Finalized => Outcome::Unchanged,
            Some(entry) => {
                message.sequence = entry.message.sequence;
                if message.content.is_empty() {
                    message.content = std::mem::take(&mut entry.message.content);
                }
                if message.metadata.is_none() {
                    message.metadata = entry.message.metadata.take();
                }
                entry.message = message;
                entry.state = MessageState::Finalized;
                Outcome::Updated
            }
            None => {
                message.sequence = self.live_sequence(server_sequence);
                let _ = self.live.insert(
                    message.id.clone(),
                    LiveEntry {
                        message,
                        state: MessageState::Finalized,
                        chunk_index: 0,
                    },
                );
                Outcome::Updated
            }
        }
    }

    fn update_status(&mut self, status: InvestigationStatus) -> Outcome {
        let changed = self.status != Some(status);
        self.status = Some(status);
        let finalized = status.is_terminal() && self.force_finalize() > 0;
        if changed || finalized {
            Outcome::Updated
        } else {
            Outcome::Unchanged
        }
    }

    /// Finalize every streaming message with its last content.
    fn force_finalize(&mut self) -> usize {
        let mut count = 0;
        for entry in self.live.values_mut() {
            if entry.state == MessageState::Streaming {
                entry.state = MessageState::Finalized;
                count += 1;
            }
        }
        if count > 0 {
            debug!(
                investigation_id = %self.investigation_id,
                count,
                "force-finalized streaming messages"
            );
        }
        count
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
