//! Runtime event adapter.
//!
//! The agent runtime is an opaque producer. It emits JSON in a couple of
//! shapes: a flat `{text, partial}` form, and a nested form where text and
//! tool traffic live under `content.parts` with side effects under `actions`.
//! [`RawEvent::normalize`] flattens either shape into [`RawEvent`] values the
//! classifier can match on without knowing which convention produced them.

use serde_json::{Map, Value};

use crate::message::MessageType;

/// A tool invocation extracted from a runtime event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawToolCall {
    /// Call ID (may be empty when the runtime omits it).
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Call arguments.
    pub arguments: Value,
}

/// A tool result extracted from a runtime event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawToolResult {
    /// Call ID this result answers.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Tool output.
    pub result: Value,
    /// Whether the tool reported failure.
    pub is_error: bool,
}

/// One normalized runtime event.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawEvent {
    /// Producing agent.
    pub author: Option<String>,
    /// Explicit message ID.
    pub message_id: Option<String>,
    /// Explicit event marker (`type` or `event` field).
    pub marker: Option<String>,
    /// Text content.
    pub text: Option<String>,
    /// Whether `text` is partial (more tokens follow).
    pub partial: bool,
    /// Whether partial `text` is already cumulative instead of a delta.
    pub cumulative: bool,
    /// Explicit chunk index.
    pub chunk_index: Option<u64>,
    /// Message type hint (`thought` parts become [`MessageType::Thinking`]).
    pub message_type: Option<MessageType>,
    /// Tool invocation.
    pub tool_call: Option<RawToolCall>,
    /// Tool result.
    pub tool_result: Option<RawToolResult>,
    /// State / artifact delta.
    pub state_delta: Map<String, Value>,
    /// Explicit status field.
    pub status: Option<String>,
    /// Free-form narration (`message` string field).
    pub note: Option<String>,
    /// Fraction complete.
    pub progress: Option<f64>,
    /// Step label.
    pub step: Option<String>,
    /// Final result.
    pub result: Option<Value>,
    /// Runtime error text.
    pub error: Option<String>,
    /// Runtime error code.
    pub error_code: Option<String>,
    /// Extra metadata.
    pub metadata: Option<Value>,
}

impl RawEvent {
    /// Normalize one runtime JSON value into one or more raw events.
    ///
    /// A value carrying several tool calls or results yields one raw event
    /// per call/result. Accompanying text rides on the first of them. A
    /// non-object value yields a single empty event.
    pub fn normalize(value: &Value) -> Vec<Self> {
        let Some(obj) = value.as_object() else {
            return vec![Self::default()];
        };

        let mut base = Self {
            author: str_field(obj, "author"),
            message_id: str_field(obj, "message_id"),
            marker: str_field(obj, "type").or_else(|| str_field(obj, "event")),
            partial: bool_field(obj, "partial"),
            cumulative: bool_field(obj, "cumulative"),
            chunk_index: obj.get("chunk_index").and_then(Value::as_u64),
            status: str_field(obj, "status"),
            progress: obj.get("progress").and_then(Value::as_f64),
            step: str_field(obj, "step"),
            result: obj.get("result").filter(|v| !v.is_null()).cloned(),
            error: error_text(obj.get("error")),
            error_code: str_field(obj, "error_code").or_else(|| str_field(obj, "code")),
            metadata: obj.get("metadata").filter(|v| v.is_object()).cloned(),
            ..Self::default()
        };

        if let Some(kind) = str_field(obj, "message_type") {
            base.message_type = parse_message_type(&kind);
        }
        if bool_field(obj, "thought") {
            base.message_type = Some(MessageType::Thinking);
        }

        let mut calls = Vec::new();
        let mut results = Vec::new();
        let mut texts = Vec::new();

        // Flat text.
        if let Some(text) = str_field(obj, "text") {
            texts.push(text);
        }

        match obj.get("message") {
            Some(Value::String(note)) => base.note = Some(note.clone()),
            Some(Value::Object(inner)) => {
                if let Some(text) =
                    str_field(inner, "content").or_else(|| str_field(inner, "text"))
                {
                    texts.push(text);
                }
                if base.message_id.is_none() {
                    base.message_id = str_field(inner, "id");
                }
                if let Some(kind) =
                    str_field(inner, "message_type").or_else(|| str_field(inner, "type"))
                {
                    base.message_type = parse_message_type(&kind).or(base.message_type);
                }
                if base.metadata.is_none() {
                    base.metadata = inner.get("metadata").filter(|v| v.is_object()).cloned();
                }
            }
            _ => {}
        }

        match obj.get("content") {
            Some(Value::String(text)) => texts.push(text.clone()),
            Some(Value::Object(content)) => {
                if let Some(parts) = content.get("parts").and_then(Value::as_array) {
                    for part in parts.iter().filter_map(Value::as_object) {
                        if let Some(text) = str_field(part, "text") {
                            if bool_field(part, "thought") {
                                base.message_type = Some(MessageType::Thinking);
                            }
                            texts.push(text);
                        }
                        if let Some(call) = part.get("function_call").and_then(parse_call) {
                            calls.push(call);
                        }
                        if let Some(result) =
                            part.get("function_response").and_then(parse_result)
                        {
                            results.push(result);
                        }
                    }
                }
            }
            _ => {}
        }

        for key in ["tool_call", "function_call"] {
            if let Some(call) = obj.get(key).and_then(parse_call) {
                calls.push(call);
            }
        }
        for key in ["tool_result", "function_response"] {
            if let Some(result) = obj.get(key).and_then(parse_result) {
                results.push(result);
            }
        }

        if let Some(Value::Object(delta)) = obj.get("state_delta") {
            base.state_delta.extend(delta.clone());
        }
        if let Some(actions) = obj.get("actions").and_then(Value::as_object) {
            for key in ["state_delta", "artifact_delta"] {
                if let Some(Value::Object(delta)) = actions.get(key) {
                    base.state_delta.extend(delta.clone());
                }
            }
            for key in ["transfer_to_agent", "escalate"] {
                if let Some(v) = actions.get(key).filter(|v| is_present(v)) {
                    let _ = base.state_delta.insert(key.to_string(), v.clone());
                }
            }
        }

        if !texts.is_empty() {
            base.text = Some(texts.concat());
        }

        if calls.is_empty() && results.is_empty() {
            return vec![base];
        }

        // Text travels with the first tool event only.
        let mut out = Vec::with_capacity(calls.len() + results.len());
        for call in calls {
            let mut event = base.clone();
            event.tool_call = Some(call);
            out.push(event);
            base.text = None;
        }
        for result in results {
            let mut event = base.clone();
            event.tool_result = Some(result);
            out.push(event);
            base.text = None;
        }
        out
    }

    /// Normalize and keep only the first resulting event.
    pub fn from_value(value: &Value) -> Self {
        Self::normalize(value).into_iter().next().unwrap_or_default()
    }

    /// Flat text event, handy for tests and simple producers.
    pub fn text(text: impl Into<String>, partial: bool) -> Self {
        Self {
            text: Some(text.into()),
            partial,
            ..Self::default()
        }
    }

    /// Set the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }
}

fn str_field(obj: &Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn bool_field(obj: &Map<String, Value>, key: &str) -> bool {
    obj.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn error_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null | Value::Bool(false) => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => {
            str_field(obj, "message").or_else(|| Some(Value::Object(obj.clone()).to_string()))
        }
        other => Some(other.to_string()),
    }
}

fn parse_message_type(kind: &str) -> Option<MessageType> {
    serde_json::from_value(Value::String(kind.to_string())).ok()
}

fn parse_call(value: &Value) -> Option<RawToolCall> {
    let obj = value.as_object()?;
    let name = str_field(obj, "name")?;
    Some(RawToolCall {
        id: str_field(obj, "id").unwrap_or_default(),
        name,
        arguments: obj
            .get("args")
            .or_else(|| obj.get("arguments"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new())),
    })
}

fn parse_result(value: &Value) -> Option<RawToolResult> {
    let obj = value.as_object()?;
    let name = str_field(obj, "name")?;
    let result = obj
        .get("response")
        .or_else(|| obj.get("result"))
        .cloned()
        .unwrap_or(Value::Null);
    let is_error = bool_field(obj, "is_error")
        || result.get("error").is_some_and(is_present);
    Some(RawToolResult {
        id: str_field(obj, "id").unwrap_or_default(),
        name,
        result,
        is_error,
    })
}
