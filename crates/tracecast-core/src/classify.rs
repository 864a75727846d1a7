//! Event classification.
//!
//! [`classify`] is pure and total: every [`RawEvent`] maps to exactly one
//! [`Event`]. First match wins:
//!
//! 1. tool invocation → `tool_call_requested` (text rides along as `trailing_text`)
//! 2. tool result → `tool_result`
//! 3. partial text → `message_chunk`
//! 4. final text → `message_complete`
//! 5. state/artifact delta without text → `state_delta`
//! 6. explicit markers and status fields, falling back to `error`

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::event::{
    CompletionPayload, DeletedPayload, Event, EventPayload, MessageChunkPayload,
    MessageCompletePayload, ProgressUpdatePayload, StartedPayload, StateDeltaPayload,
    StatusChangedPayload, ToolCallRequestedPayload, ToolResultPayload, WorkorderStatusPayload,
};
use crate::investigation::InvestigationStatus;
use crate::message::MessageType;
use crate::raw::RawEvent;

/// Error code for raw events matching no rule.
pub const UNCLASSIFIED: &str = "UNCLASSIFIED";
/// Error code for runtime-reported errors without their own code.
pub const RUNTIME_ERROR: &str = "RUNTIME_ERROR";

/// Classify one raw runtime event.
pub fn classify(investigation_id: &str, raw: &RawEvent, received_at: DateTime<Utc>) -> Event {
    Event::at(investigation_id, received_at, payload_for(investigation_id, raw, received_at))
}

fn payload_for(investigation_id: &str, raw: &RawEvent, received_at: DateTime<Utc>) -> EventPayload {
    let text = raw.text.as_deref().filter(|t| !t.is_empty());

    if let Some(call) = &raw.tool_call {
        return EventPayload::ToolCallRequested(ToolCallRequestedPayload {
            call_id: fallback_id(&call.id, &call.name, received_at),
            tool_name: call.name.clone(),
            arguments: call.arguments.clone(),
            trailing_text: text.map(str::to_string),
        });
    }

    if let Some(result) = &raw.tool_result {
        return EventPayload::ToolResult(ToolResultPayload {
            call_id: fallback_id(&result.id, &result.name, received_at),
            tool_name: result.name.clone(),
            result: result.result.clone(),
            is_error: result.is_error,
        });
    }

    if let Some(text) = text {
        let message_id = raw
            .message_id
            .clone()
            .unwrap_or_else(|| derived_message_id(investigation_id, raw, received_at));
        let message_type = raw.message_type.unwrap_or(MessageType::Agent);
        if raw.partial {
            return EventPayload::MessageChunk(MessageChunkPayload {
                message_id,
                chunk_index: raw.chunk_index.unwrap_or(1).max(1),
                content: text.to_string(),
                message_type,
                author: raw.author.clone(),
            });
        }
        return EventPayload::MessageComplete(MessageCompletePayload {
            message_id,
            content: text.to_string(),
            message_type,
            author: raw.author.clone(),
            metadata: raw.metadata.clone(),
        });
    }

    if !raw.state_delta.is_empty() {
        return EventPayload::StateDelta(StateDeltaPayload {
            delta: raw.state_delta.clone(),
        });
    }

    classify_marker(raw)
}

fn classify_marker(raw: &RawEvent) -> EventPayload {
    let marker = raw
        .marker
        .as_deref()
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    let status = raw.status.as_deref().map(str::to_ascii_lowercase);
    let parsed_status = status
        .as_deref()
        .and_then(|s| s.parse::<InvestigationStatus>().ok());

    if matches!(
        marker.as_str(),
        "completion" | "complete" | "final_result" | "final_response"
    ) {
        return EventPayload::Completion(CompletionPayload {
            status: parsed_status
                .filter(|s| s.is_terminal())
                .unwrap_or(InvestigationStatus::Completed),
            result: raw.result.as_ref().map(result_text).or_else(|| raw.note.clone()),
        });
    }

    // A terminal status outranks a trailing progress value.
    if let Some(status) = parsed_status.filter(|s| s.is_terminal()) {
        return EventPayload::StatusChanged(StatusChangedPayload {
            status,
            error_message: raw.error.clone(),
        });
    }

    if matches!(marker.as_str(), "progress" | "progress_update") || raw.progress.is_some() {
        return EventPayload::ProgressUpdate(ProgressUpdatePayload {
            message: raw
                .note
                .clone()
                .or_else(|| raw.step.clone())
                .unwrap_or_default(),
            progress: raw.progress.map(|p| p.clamp(0.0, 1.0)),
            step: raw.step.clone(),
        });
    }

    let workorder_status = status.as_deref().filter(|s| s.starts_with("workorder_"));
    if matches!(marker.as_str(), "workorder_status" | "workorder") || workorder_status.is_some() {
        return EventPayload::WorkorderStatus(WorkorderStatusPayload {
            status: raw.status.clone().unwrap_or_else(|| marker.clone()),
            message: raw.note.clone().unwrap_or_default(),
        });
    }

    if matches!(marker.as_str(), "started" | "investigation_started") {
        return EventPayload::Started(StartedPayload {
            message: raw.note.clone(),
        });
    }

    if matches!(marker.as_str(), "deleted" | "investigation_deleted") {
        return EventPayload::Deleted(DeletedPayload {});
    }

    if let Some(status) = parsed_status {
        return EventPayload::StatusChanged(StatusChangedPayload {
            status,
            error_message: raw.error.clone(),
        });
    }

    if marker == "error" || raw.error.is_some() {
        let error = raw
            .error
            .clone()
            .or_else(|| raw.note.clone())
            .unwrap_or_else(|| "runtime reported an error".to_string());
        return EventPayload::error(
            error,
            Some(raw.error_code.as_deref().unwrap_or(RUNTIME_ERROR)),
        );
    }

    let description = if marker.is_empty() {
        "unrecognized runtime event".to_string()
    } else {
        format!("unrecognized runtime event: {marker}")
    };
    EventPayload::error(description, Some(UNCLASSIFIED))
}

fn result_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn fallback_id(id: &str, name: &str, at: DateTime<Utc>) -> String {
    if id.is_empty() {
        format!("call_{name}_{}", at.timestamp_micros())
    } else {
        id.to_string()
    }
}

fn derived_message_id(investigation_id: &str, raw: &RawEvent, at: DateTime<Utc>) -> String {
    let author = raw.author.as_deref().unwrap_or("agent");
    format!("{investigation_id}:{author}:{}", at.timestamp_micros())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
