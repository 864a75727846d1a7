//! # tracecast-core
//!
//! Shared vocabulary for the tracecast workspace.
//!
//! - **Events**: [`Event`] wire unit with one typed payload per [`EventKind`]
//! - **Messages**: [`Message`] view entity rendered by viewers
//! - **Status**: [`InvestigationStatus`] lifecycle and the [`Investigation`] record
//! - **Runtime adapter**: [`RawEvent`] normalizes whatever the agent runtime emits
//! - **Classifier**: [`classify`] maps a [`RawEvent`] onto exactly one [`Event`]
//! - **Projection**: [`finalized_message`] derives the history entry an event produces

#![deny(unsafe_code)]

pub mod classify;
pub mod errors;
pub mod event;
pub mod ids;
pub mod investigation;
pub mod message;
pub mod projection;
pub mod raw;
pub mod text;

pub use classify::classify;
pub use errors::EventDecodeError;
pub use event::{
    CompletionPayload, ConnectedPayload, DeletedPayload, ErrorPayload, Event, EventKind,
    EventPayload, HeartbeatPayload, MessageChunkPayload, MessageCompletePayload,
    ProgressUpdatePayload, StartedPayload, StateDeltaPayload, StatusChangedPayload,
    ToolCallRequestedPayload, ToolResultPayload, WorkorderStatusPayload,
};
pub use ids::{new_investigation_id, new_message_id, new_subscriber_id};
pub use investigation::{Investigation, InvestigationStatus};
pub use message::{Message, MessageType};
pub use projection::finalized_message;
pub use raw::{RawEvent, RawToolCall, RawToolResult};
