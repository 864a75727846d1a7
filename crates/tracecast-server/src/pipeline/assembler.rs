//! Delta → cumulative chunk assembly.
//!
//! The runtime streams partial text as deltas. Viewers need cumulative
//! content and a stable message ID per in-flight message, so chunks are
//! folded here before they reach the broker.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracecast_core::{Event, EventPayload, Message, MessageType, RawEvent};

const DEFAULT_AUTHOR: &str = "agent";

#[derive(Clone, Debug)]
struct InFlight {
    message_id: String,
    chunk_index: u64,
    content: String,
    author: Option<String>,
    started_at: DateTime<Utc>,
}

/// Per-investigation assembler. Keyed by `(author, message type)`.
#[derive(Debug, Default)]
pub struct ChunkAssembler {
    in_flight: HashMap<(String, MessageType), InFlight>,
}

impl ChunkAssembler {
    /// Create an empty assembler.
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages currently streaming.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Rewrite a classified event against in-flight state.
    ///
    /// `raw` is the runtime event `event` was classified from; it tells
    /// whether the producer supplied its own message ID and whether the text
    /// is already cumulative.
    pub fn apply(&mut self, raw: &RawEvent, mut event: Event) -> Event {
        match &mut event.payload {
            EventPayload::MessageChunk(chunk) => {
                let key = key(chunk.author.as_deref(), chunk.message_type);
                let restart = self.in_flight.get(&key).is_some_and(|entry| {
                    raw.message_id
                        .as_deref()
                        .is_some_and(|id| id != entry.message_id)
                });
                if restart {
                    let _ = self.in_flight.remove(&key);
                }
                let entry = self.in_flight.entry(key).or_insert_with(|| InFlight {
                    message_id: chunk.message_id.clone(),
                    chunk_index: 0,
                    content: String::new(),
                    author: chunk.author.clone(),
                    started_at: event.timestamp,
                });
                if raw.cumulative {
                    entry.content.clone_from(&chunk.content);
                } else {
                    entry.content.push_str(&chunk.content);
                }
                entry.chunk_index += 1;

                chunk.message_id.clone_from(&entry.message_id);
                chunk.chunk_index = entry.chunk_index;
                chunk.content.clone_from(&entry.content);
            }
            EventPayload::MessageComplete(complete) => {
                let key = key(complete.author.as_deref(), complete.message_type);
                let matches = self.in_flight.get(&key).is_some_and(|entry| {
                    raw.message_id
                        .as_deref()
                        .is_none_or(|id| id == entry.message_id)
                });
                if matches {
                    if let Some(entry) = self.in_flight.remove(&key) {
                        complete.message_id = entry.message_id;
                        if complete.content.is_empty() {
                            complete.content = entry.content;
                        }
                    }
                }
            }
            _ => {}
        }
        event
    }

    /// Drop all in-flight state, returning what was still streaming as
    /// finalized messages.
    pub fn finish(&mut self, investigation_id: &str) -> Vec<Message> {
        let mut messages: Vec<Message> = self
            .in_flight
            .drain()
            .map(|((_, message_type), entry)| {
                let msg = Message::new(
                    entry.message_id,
                    investigation_id,
                    message_type,
                    entry.content,
                    entry.started_at,
                );
                match entry.author {
                    Some(author) => msg.with_metadata(serde_json::json!({ "author": author })),
                    None => msg,
                }
            })
            .collect();
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        messages
    }
}

fn key(author: Option<&str>, message_type: MessageType) -> (String, MessageType) {
    (author.unwrap_or(DEFAULT_AUTHOR).to_string(), message_type)
}
