//! Subscriber slots and the transport-facing [`Subscription`] guard.

use std::fmt;
use std::sync::{Arc, OnceLock, Weak};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tracecast_core::Event;

use super::session::SessionBroker;

/// Why the broker stopped feeding a subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// The investigation reached a terminal state; everything was delivered.
    Draining,
    /// The subscriber's channel filled up; events were lost.
    Lagged,
    /// The session was already closed when the subscriber attached.
    Closed,
}

impl CloseReason {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draining => "draining",
            Self::Lagged => "lagged",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of offering one event to a subscriber.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Sent,
    Full,
    Gone,
}

/// Broker-side half of a subscriber.
pub(crate) struct SubscriberSlot {
    pub(crate) id: String,
    tx: Option<mpsc::Sender<Event>>,
    reason: Arc<OnceLock<CloseReason>>,
    pub(crate) last_sent_sequence: u64,
    pub(crate) attached_at: Instant,
}

impl SubscriberSlot {
    pub(crate) fn is_live(&self) -> bool {
        self.tx.is_some()
    }

    /// Offer an event without waiting.
    pub(crate) fn offer(&mut self, event: &Event) -> Delivery {
        let Some(tx) = &self.tx else {
            return Delivery::Gone;
        };
        match tx.try_send(event.clone()) {
            Ok(()) => {
                if let Some(seq) = event.sequence {
                    self.last_sent_sequence = seq;
                }
                Delivery::Sent
            }
            Err(TrySendError::Full(_)) => Delivery::Full,
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        }
    }

    /// Stop feeding this subscriber. The receiver drains what is buffered,
    /// then observes `reason`.
    pub(crate) fn close(&mut self, reason: CloseReason) {
        let _ = self.reason.set(reason);
        self.tx = None;
    }
}

/// Transport-facing handle to one subscriber.
///
/// Dropping it unsubscribes synchronously.
pub struct Subscription {
    id: String,
    investigation_id: String,
    rx: mpsc::Receiver<Event>,
    reason: Arc<OnceLock<CloseReason>>,
    broker: Weak<SessionBroker>,
}

impl Subscription {
    /// Create a connected pair. `capacity` is clamped to at least 1.
    pub(crate) fn pair(
        id: String,
        investigation_id: &str,
        capacity: usize,
        broker: Weak<SessionBroker>,
    ) -> (SubscriberSlot, Self) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let reason = Arc::new(OnceLock::new());
        let slot = SubscriberSlot {
            id: id.clone(),
            tx: Some(tx),
            reason: Arc::clone(&reason),
            last_sent_sequence: 0,
            attached_at: Instant::now(),
        };
        let subscription = Self {
            id,
            investigation_id: investigation_id.to_string(),
            rx,
            reason,
            broker,
        };
        (slot, subscription)
    }

    /// Subscriber ID.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Investigation this subscription follows.
    pub fn investigation_id(&self) -> &str {
        &self.investigation_id
    }

    /// Next event, or `None` once the broker closed this subscriber and the
    /// buffer is drained.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Why the broker closed this subscriber, if it did.
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason.get().copied()
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("investigation_id", &self.investigation_id)
            .field("close_reason", &self.close_reason())
            .finish_non_exhaustive()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broker) = self.broker.upgrade() {
            broker.unsubscribe(&self.id);
        }
    }
}
