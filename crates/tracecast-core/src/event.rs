//! Wire events.
//!
//! An [`Event`] is the unit pushed from the broker to viewers. On the wire it
//! is a flat JSON object:
//!
//! ```json
//! {"type":"message_chunk","investigation_id":"inv_1","timestamp":"...","sequence":7,
//!  "payload":{"message_id":"m1","chunk_index":2,"content":"Hello world"}}
//! ```
//!
//! In memory the payload is typed ([`EventPayload`]) so a frame whose payload
//! does not match its `type` is rejected at decode time instead of surfacing
//! as a half-rendered message.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::EventDecodeError;
use crate::investigation::InvestigationStatus;
use crate::message::MessageType;

// ─────────────────────────────────────────────────────────────────────────────
// EventKind
// ─────────────────────────────────────────────────────────────────────────────

/// The fixed event vocabulary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Synthetic: stream open.
    Connected,
    /// Investigation processing started.
    Started,
    /// Partial agent text (cumulative).
    MessageChunk,
    /// Final agent text.
    MessageComplete,
    /// Agent invoked a tool.
    ToolCallRequested,
    /// Tool returned.
    ToolResult,
    /// Agent state / artifact delta.
    StateDelta,
    /// Investigation status transition.
    StatusChanged,
    /// Progress narration.
    ProgressUpdate,
    /// Investigation run finished.
    Completion,
    /// Work-order side channel.
    WorkorderStatus,
    /// Investigation deleted.
    Deleted,
    /// Liveness tick.
    Heartbeat,
    /// Producer-side or classification error.
    Error,
}

impl EventKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 14] = [
        Self::Connected,
        Self::Started,
        Self::MessageChunk,
        Self::MessageComplete,
        Self::ToolCallRequested,
        Self::ToolResult,
        Self::StateDelta,
        Self::StatusChanged,
        Self::ProgressUpdate,
        Self::Completion,
        Self::WorkorderStatus,
        Self::Deleted,
        Self::Heartbeat,
        Self::Error,
    ];

    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Started => "started",
            Self::MessageChunk => "message_chunk",
            Self::MessageComplete => "message_complete",
            Self::ToolCallRequested => "tool_call_requested",
            Self::ToolResult => "tool_result",
            Self::StateDelta => "state_delta",
            Self::StatusChanged => "status_changed",
            Self::ProgressUpdate => "progress_update",
            Self::Completion => "completion",
            Self::WorkorderStatus => "workorder_status",
            Self::Deleted => "deleted",
            Self::Heartbeat => "heartbeat",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// `connected` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// Broker-assigned subscriber ID.
    pub subscriber_id: String,
}

/// `started` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StartedPayload {
    /// Human-readable note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// `message_chunk` payload. `content` is cumulative, never a delta.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageChunkPayload {
    /// Message entity ID.
    pub message_id: String,
    /// 1-based, strictly increasing per message.
    pub chunk_index: u64,
    /// All text seen so far for this message.
    pub content: String,
    /// Message type (agent prose or thinking).
    #[serde(default)]
    pub message_type: MessageType,
    /// Producing agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
}

/// `message_complete` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageCompletePayload {
    /// Message entity ID.
    pub message_id: String,
    /// Final text.
    pub content: String,
    /// Message type.
    #[serde(default)]
    pub message_type: MessageType,
    /// Producing agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Extra metadata carried into the rendered message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

/// `tool_call_requested` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequestedPayload {
    /// Tool call ID.
    pub call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Call arguments.
    #[serde(default)]
    pub arguments: Value,
    /// Text that rode along with the call; never rendered as prose.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_text: Option<String>,
}

/// `tool_result` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultPayload {
    /// Tool call ID this result answers.
    pub call_id: String,
    /// Tool name.
    pub tool_name: String,
    /// Tool output.
    #[serde(default)]
    pub result: Value,
    /// Whether the tool reported failure.
    #[serde(default)]
    pub is_error: bool,
}

/// `state_delta` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDeltaPayload {
    /// Changed keys.
    #[serde(default)]
    pub delta: Map<String, Value>,
}

/// `status_changed` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusChangedPayload {
    /// New status.
    pub status: InvestigationStatus,
    /// Failure reason.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

/// `progress_update` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdatePayload {
    /// Narration.
    pub message: String,
    /// Fraction complete in `0.0..=1.0`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    /// Step label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// `completion` payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionPayload {
    /// Final status.
    pub status: InvestigationStatus,
    /// Final agent result text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

/// `workorder_status` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkorderStatusPayload {
    /// Work-order status label (`workorder_requested`, `workorder_created`, ...).
    pub status: String,
    /// Human-readable note.
    #[serde(default)]
    pub message: String,
}

/// `deleted` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeletedPayload {}

/// `heartbeat` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatPayload {}

/// `error` payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error text.
    pub error: String,
    /// Machine-readable code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Typed payload, one variant per [`EventKind`].
#[derive(Clone, Debug, PartialEq)]
#[allow(missing_docs)]
pub enum EventPayload {
    Connected(ConnectedPayload),
    Started(StartedPayload),
    MessageChunk(MessageChunkPayload),
    MessageComplete(MessageCompletePayload),
    ToolCallRequested(ToolCallRequestedPayload),
    ToolResult(ToolResultPayload),
    StateDelta(StateDeltaPayload),
    StatusChanged(StatusChangedPayload),
    ProgressUpdate(ProgressUpdatePayload),
    Completion(CompletionPayload),
    WorkorderStatus(WorkorderStatusPayload),
    Deleted(DeletedPayload),
    Heartbeat(HeartbeatPayload),
    Error(ErrorPayload),
}

impl EventPayload {
    /// Kind of this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected(_) => EventKind::Connected,
            Self::Started(_) => EventKind::Started,
            Self::MessageChunk(_) => EventKind::MessageChunk,
            Self::MessageComplete(_) => EventKind::MessageComplete,
            Self::ToolCallRequested(_) => EventKind::ToolCallRequested,
            Self::ToolResult(_) => EventKind::ToolResult,
            Self::StateDelta(_) => EventKind::StateDelta,
            Self::StatusChanged(_) => EventKind::StatusChanged,
            Self::ProgressUpdate(_) => EventKind::ProgressUpdate,
            Self::Completion(_) => EventKind::Completion,
            Self::WorkorderStatus(_) => EventKind::WorkorderStatus,
            Self::Deleted(_) => EventKind::Deleted,
            Self::Heartbeat(_) => EventKind::Heartbeat,
            Self::Error(_) => EventKind::Error,
        }
    }

    /// Shorthand for an `error` payload.
    pub fn error(error: impl Into<String>, code: Option<&str>) -> Self {
        Self::Error(ErrorPayload {
            error: error.into(),
            code: code.map(str::to_string),
        })
    }

    fn to_value(&self) -> Value {
        let value = match self {
            Self::Connected(p) => serde_json::to_value(p),
            Self::Started(p) => serde_json::to_value(p),
            Self::MessageChunk(p) => serde_json::to_value(p),
            Self::MessageComplete(p) => serde_json::to_value(p),
            Self::ToolCallRequested(p) => serde_json::to_value(p),
            Self::ToolResult(p) => serde_json::to_value(p),
            Self::StateDelta(p) => serde_json::to_value(p),
            Self::StatusChanged(p) => serde_json::to_value(p),
            Self::ProgressUpdate(p) => serde_json::to_value(p),
            Self::Completion(p) => serde_json::to_value(p),
            Self::WorkorderStatus(p) => serde_json::to_value(p),
            Self::Deleted(p) => serde_json::to_value(p),
            Self::Heartbeat(p) => serde_json::to_value(p),
            Self::Error(p) => serde_json::to_value(p),
        };
        value.unwrap_or_else(|_| Value::Object(Map::new()))
    }

    fn from_value(kind: EventKind, value: Value) -> Result<Self, EventDecodeError> {
        let wrap = |source| EventDecodeError { kind, source };
        Ok(match kind {
            EventKind::Connected => Self::Connected(serde_json::from_value(value).map_err(wrap)?),
            EventKind::Started => Self::Started(serde_json::from_value(value).map_err(wrap)?),
            EventKind::MessageChunk => {
                Self::MessageChunk(serde_json::from_value(value).map_err(wrap)?)
            }
            EventKind::MessageComplete => {
                Self::MessageComplete(serde_json::from_value(value).map_err(wrap)?)
            }
            EventKind::ToolCallRequested => {
                Self::ToolCallRequested(serde_json::from_value(value).map_err(wrap)?)
            }
            EventKind::ToolResult => Self::ToolResult(serde_json::from_value(value).map_err(wrap)?),
            EventKind::StateDelta => Self::StateDelta(serde_json::from_value(value).map_err(wrap)?),
            EventKind::StatusChanged => {
                Self::StatusChanged(serde_json::from_value(value).map_err(wrap)?)
            }
            EventKind::ProgressUpdate => {
                Self::ProgressUpdate(serde_json::from_value(value).map_err(wrap)?)
            }
            EventKind::Completion => Self::Completion(serde_json::from_value(value).map_err(wrap)?),
            EventKind::WorkorderStatus => {
                Self::WorkorderStatus(serde_json::from_value(value).map_err(wrap)?)
            }
            EventKind::Deleted => Self::Deleted(serde_json::from_value(value).map_err(wrap)?),
            EventKind::Heartbeat => Self::Heartbeat(serde_json::from_value(value).map_err(wrap)?),
            EventKind::Error => Self::Error(serde_json::from_value(value).map_err(wrap)?),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Event
// ─────────────────────────────────────────────────────────────────────────────

/// The wire unit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct Event {
    /// Producing investigation.
    pub investigation_id: String,
    /// Server-assigned wall-clock time.
    pub timestamp: DateTime<Utc>,
    /// Broker-assigned sequence (absent before publish).
    pub sequence: Option<u64>,
    /// Typed payload.
    pub payload: EventPayload,
}

impl Event {
    /// New event stamped with the current time.
    pub fn new(investigation_id: impl Into<String>, payload: EventPayload) -> Self {
        Self::at(investigation_id, Utc::now(), payload)
    }

    /// New event with an explicit timestamp.
    pub fn at(
        investigation_id: impl Into<String>,
        timestamp: DateTime<Utc>,
        payload: EventPayload,
    ) -> Self {
        Self {
            investigation_id: investigation_id.into(),
            timestamp,
            sequence: None,
            payload,
        }
    }

    /// Set the sequence.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = Some(sequence);
        self
    }

    /// Event kind.
    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// The terminal status this event announces, if any.
    ///
    /// `deleted` counts as terminal (`cancelled`) since nothing follows it.
    pub fn terminal_status(&self) -> Option<InvestigationStatus> {
        match &self.payload {
            EventPayload::StatusChanged(p) if p.status.is_terminal() => Some(p.status),
            EventPayload::Completion(p) if p.status.is_terminal() => Some(p.status),
            EventPayload::Deleted(_) => Some(InvestigationStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether no further events are expected after this one.
    pub fn is_terminal(&self) -> bool {
        self.terminal_status().is_some()
    }

    /// Message ID for chunk/complete events.
    pub fn message_id(&self) -> Option<&str> {
        match &self.payload {
            EventPayload::MessageChunk(p) => Some(&p.message_id),
            EventPayload::MessageComplete(p) => Some(&p.message_id),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
    #[serde(rename = "type")]
    kind: EventKind,
    investigation_id: String,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sequence: Option<u64>,
    #[serde(default = "empty_object")]
    payload: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

impl TryFrom<WireEvent> for Event {
    type Error = EventDecodeError;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        Ok(Self {
            investigation_id: wire.investigation_id,
            timestamp: wire.timestamp,
            sequence: wire.sequence,
            payload: EventPayload::from_value(wire.kind, wire.payload)?,
        })
    }
}

impl From<Event> for WireEvent {
    fn from(event: Event) -> Self {
        Self {
            kind: event.payload.kind(),
            payload: event.payload.to_value(),
            investigation_id: event.investigation_id,
            timestamp: event.timestamp,
            sequence: event.sequence,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
