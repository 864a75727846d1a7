//! History ∪ live merge.
//!
//! Pure: the same inputs always give the same log, whatever order they are
//! supplied in (ties between equal revisions keep the first version seen).

use std::cmp::Ordering;
use std::collections::HashMap;
use std::collections::hash_map::Entry;

use tracecast_core::Message;

/// How far a message version has progressed. Higher wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Revision {
    /// Finalized versions beat any streaming version.
    pub finalized: bool,
    /// Highest chunk applied (0 for finalized versions).
    pub chunk_index: u64,
}

impl Revision {
    /// A finalized version.
    pub const FINAL: Self = Self {
        finalized: true,
        chunk_index: 0,
    };

    /// A streaming version at `chunk_index`.
    pub fn streaming(chunk_index: u64) -> Self {
        Self {
            finalized: false,
            chunk_index,
        }
    }
}

/// A message paired with its revision.
#[derive(Clone, Debug, PartialEq)]
pub struct Versioned {
    /// The message.
    pub message: Message,
    /// Its revision.
    pub revision: Revision,
}

impl Versioned {
    /// A finalized message (history entries are always finalized).
    pub fn finalized(message: Message) -> Self {
        Self {
            message,
            revision: Revision::FINAL,
        }
    }
}

/// Log order: `(timestamp, sequence, id)`.
pub fn log_order(a: &Message, b: &Message) -> Ordering {
    a.timestamp
        .cmp(&b.timestamp)
        .then(a.sequence.cmp(&b.sequence))
        .then_with(|| a.id.cmp(&b.id))
}

/// Keep the highest revision per id and sort into log order.
pub fn merge(entries: impl IntoIterator<Item = Versioned>) -> Vec<Message> {
    let mut by_id: HashMap<String, Versioned> = HashMap::new();
    for entry in entries {
        match by_id.entry(entry.message.id.clone()) {
            Entry::Occupied(mut slot) => {
                if entry.revision > slot.get().revision {
                    let _ = slot.insert(entry);
                }
            }
            Entry::Vacant(slot) => {
                let _ = slot.insert(entry);
            }
        }
    }
    let mut messages: Vec<Message> = by_id.into_values().map(|v| v.message).collect();
    messages.sort_by(log_order);
    messages
}
