//! Conversation message view entity.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who or what produced a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Human input.
    User,
    /// Agent prose.
    #[default]
    Agent,
    /// System notice (workorder status, lifecycle).
    System,
    /// Agent reasoning / progress narration.
    Thinking,
    /// Tool invocation.
    ToolCall,
    /// Tool output.
    ToolResult,
}

impl MessageType {
    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
            Self::Thinking => "thinking",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the rendered conversation log.
///
/// Two messages are the same entity iff they share `id`. The ordering key is
/// `(timestamp, sequence)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Entity ID.
    pub id: String,
    /// Owning investigation.
    #[serde(default)]
    pub investigation_id: String,
    /// Message type.
    #[serde(rename = "type", alias = "message_type")]
    pub message_type: MessageType,
    /// Text content.
    pub content: String,
    /// Authoritative server timestamp.
    pub timestamp: DateTime<Utc>,
    /// Tie-breaker for equal timestamps (assigned by the consumer).
    #[serde(default)]
    pub sequence: u64,
    /// Free-form metadata (author, tool name, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    /// New message with no metadata and sequence 0.
    pub fn new(
        id: impl Into<String>,
        investigation_id: impl Into<String>,
        message_type: MessageType,
        content: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            investigation_id: investigation_id.into(),
            message_type,
            content: content.into(),
            timestamp,
            sequence: 0,
            metadata: None,
        }
    }

    /// Attach metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Ordering key.
    pub fn order_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }
}
