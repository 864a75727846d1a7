//! Event → message projection.
//!
//! Shared by the server (what goes into history) and the client (what the
//! reconciler renders), so both sides derive the same message ID from the
//! same event.

use serde_json::{Map, Value, json};

use crate::event::{Event, EventPayload};
use crate::message::{Message, MessageType};

/// ID of the `tool_result` message answering `call_id`.
pub fn tool_result_id(call_id: &str) -> String {
    format!("result:{call_id}")
}

/// ID of a progress narration message.
pub fn progress_id(event: &Event) -> String {
    format!("progress:{}", event.timestamp.timestamp_micros())
}

/// ID of a work-order notice.
pub fn workorder_id(event: &Event, status: &str) -> String {
    format!("workorder:{status}:{}", event.timestamp.timestamp_micros())
}

/// The finalized message an event produces, if any.
///
/// Chunks are never final; lifecycle, state and transport events produce no
/// message.
pub fn finalized_message(event: &Event) -> Option<Message> {
    let inv = event.investigation_id.as_str();
    let ts = event.timestamp;
    let message = match &event.payload {
        EventPayload::MessageComplete(p) => {
            let mut msg = Message::new(&p.message_id, inv, p.message_type, &p.content, ts);
            msg.metadata = merge_author(p.metadata.clone(), p.author.as_deref());
            msg
        }
        EventPayload::ToolCallRequested(p) => {
            let mut meta = json!({
                "tool_name": p.tool_name,
                "arguments": p.arguments,
            });
            if let Some(text) = &p.trailing_text {
                meta["trailing_text"] = Value::String(text.clone());
            }
            Message::new(&p.call_id, inv, MessageType::ToolCall, &p.tool_name, ts)
                .with_metadata(meta)
        }
        EventPayload::ToolResult(p) => {
            let content = match &p.result {
                Value::String(s) => s.clone(),
                Value::Null => String::new(),
                other => other.to_string(),
            };
            Message::new(tool_result_id(&p.call_id), inv, MessageType::ToolResult, content, ts)
                .with_metadata(json!({
                    "tool_name": p.tool_name,
                    "call_id": p.call_id,
                    "is_error": p.is_error,
                }))
        }
        EventPayload::ProgressUpdate(p) => {
            let mut msg = Message::new(progress_id(event), inv, MessageType::Thinking, &p.message, ts);
            if p.progress.is_some() || p.step.is_some() {
                msg.metadata = Some(json!({"progress": p.progress, "step": p.step}));
            }
            msg
        }
        EventPayload::WorkorderStatus(p) => {
            let content = if p.message.is_empty() {
                p.status.clone()
            } else {
                p.message.clone()
            };
            Message::new(workorder_id(event, &p.status), inv, MessageType::System, content, ts)
                .with_metadata(json!({"workorder_status": p.status}))
        }
        _ => return None,
    };
    Some(message)
}

fn merge_author(metadata: Option<Value>, author: Option<&str>) -> Option<Value> {
    let Some(author) = author else {
        return metadata;
    };
    let mut map = match metadata {
        Some(Value::Object(map)) => map,
        Some(other) => {
            let mut map = Map::new();
            let _ = map.insert("value".into(), other);
            map
        }
        None => Map::new(),
    };
    let _ = map
        .entry("author")
        .or_insert_with(|| Value::String(author.to_string()));
    Some(Value::Object(map))
}
