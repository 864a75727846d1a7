//! Per-investigation fan-out.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, gauge};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracecast_core::{ConnectedPayload, Event, EventPayload, new_subscriber_id};
use tracing::{debug, info, warn};

use super::subscriber::{CloseReason, Delivery, SubscriberSlot, Subscription};
use crate::config::BrokerConfig;
use crate::metrics::{EVENTS_PUBLISHED_TOTAL, SUBSCRIBERS_ACTIVE, SUBSCRIBERS_DROPPED_TOTAL};

/// Session lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Accepting events and subscribers.
    Open,
    /// A terminal event was published; remaining subscribers are flushing.
    Draining,
    /// Draining finished. Publishes are ignored.
    Closed,
}

struct State {
    lifecycle: Lifecycle,
    counter: u64,
    ring: VecDeque<Event>,
    subscribers: Vec<SubscriberSlot>,
    last_activity: Instant,
}

impl State {
    fn close_if_drained(&mut self, investigation_id: &str) {
        if self.lifecycle == Lifecycle::Draining && self.subscribers.is_empty() {
            self.lifecycle = Lifecycle::Closed;
            debug!(investigation_id, "session closed");
        }
    }

    fn remove(&mut self, subscriber_id: &str) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != subscriber_id);
        let removed = self.subscribers.len() != before;
        if removed {
            gauge!(SUBSCRIBERS_ACTIVE).decrement(1.0);
        }
        removed
    }
}

/// Buffers and fans out classified events for one investigation.
///
/// Every mutation happens under one `parking_lot` mutex; nothing awaits while
/// it is held, so `publish` never blocks on a slow subscriber.
pub struct SessionBroker {
    investigation_id: String,
    config: BrokerConfig,
    state: Mutex<State>,
}

impl SessionBroker {
    /// Create an open session.
    pub fn new(investigation_id: impl Into<String>, config: BrokerConfig) -> Arc<Self> {
        Self::resume(investigation_id, config, 0)
    }

    /// Create an open session whose first sequence follows `last_sequence`.
    ///
    /// Used when a session replaces an earlier one for the same
    /// investigation, so resume points handed out before stay valid.
    pub fn resume(
        investigation_id: impl Into<String>,
        config: BrokerConfig,
        last_sequence: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            investigation_id: investigation_id.into(),
            state: Mutex::new(State {
                lifecycle: Lifecycle::Open,
                counter: last_sequence,
                ring: VecDeque::with_capacity(config.ring_capacity.min(64)),
                subscribers: Vec::new(),
                last_activity: Instant::now(),
            }),
            config,
        })
    }

    /// Investigation this session serves.
    pub fn investigation_id(&self) -> &str {
        &self.investigation_id
    }

    /// Current lifecycle.
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lock().lifecycle
    }

    /// Registered subscribers, including ones already closed but not yet dropped.
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Highest sequence assigned so far.
    pub fn last_sequence(&self) -> u64 {
        self.state.lock().counter
    }

    /// Events currently held for replay.
    pub fn ring_len(&self) -> usize {
        self.state.lock().ring.len()
    }

    /// Time since the last publish, subscribe or unsubscribe.
    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.state.lock().last_activity)
    }

    /// Assign a sequence, buffer, and deliver to every live subscriber.
    ///
    /// Returns the assigned sequence, or `None` if the session is closed.
    pub fn publish(&self, mut event: Event) -> Option<u64> {
        let mut state = self.state.lock();
        if state.lifecycle == Lifecycle::Closed {
            debug!(
                investigation_id = %self.investigation_id,
                kind = %event.kind(),
                "publish on closed session ignored"
            );
            return None;
        }

        let sequence = match event.sequence {
            Some(supplied) if supplied > state.counter => supplied,
            _ => state.counter + 1,
        };
        state.counter = sequence;
        event.sequence = Some(sequence);
        state.last_activity = Instant::now();

        state.ring.push_back(event.clone());
        while state.ring.len() > self.config.ring_capacity {
            let _ = state.ring.pop_front();
        }

        let mut gone = Vec::new();
        for slot in state.subscribers.iter_mut().filter(|s| s.is_live()) {
            match slot.offer(&event) {
                Delivery::Sent => {}
                Delivery::Full => {
                    warn!(
                        investigation_id = %self.investigation_id,
                        subscriber_id = %slot.id,
                        sequence,
                        last_sent = slot.last_sent_sequence,
                        attached_for = ?slot.attached_at.elapsed(),
                        "subscriber lagged, dropping"
                    );
                    slot.close(CloseReason::Lagged);
                    counter!(SUBSCRIBERS_DROPPED_TOTAL, "reason" => CloseReason::Lagged.as_str())
                        .increment(1);
                }
                Delivery::Gone => gone.push(slot.id.clone()),
            }
        }
        for id in gone {
            debug!(investigation_id = %self.investigation_id, subscriber_id = %id, "receiver gone");
            let _ = state.remove(&id);
        }

        counter!(EVENTS_PUBLISHED_TOTAL, "kind" => event.kind().as_str()).increment(1);

        if state.lifecycle == Lifecycle::Open && event.is_terminal() {
            state.lifecycle = Lifecycle::Draining;
            let draining = state.subscribers.len();
            for slot in &mut state.subscribers {
                slot.close(CloseReason::Draining);
            }
            info!(
                investigation_id = %self.investigation_id,
                sequence,
                kind = %event.kind(),
                subscribers = draining,
                "session draining"
            );
            state.close_if_drained(&self.investigation_id);
        }

        Some(sequence)
    }

    /// Attach a subscriber.
    ///
    /// The channel first receives a synthetic `connected` event, then every
    /// buffered event with `sequence > after`. A draining session closes the
    /// subscription right after replay; a closed session returns one that is
    /// already closed.
    pub fn subscribe(self: &Arc<Self>, after: Option<u64>) -> Subscription {
        let mut state = self.state.lock();
        let id = new_subscriber_id();

        if state.lifecycle == Lifecycle::Closed {
            let (mut slot, subscription) =
                Subscription::pair(id, &self.investigation_id, 1, Arc::downgrade(self));
            slot.close(CloseReason::Closed);
            debug!(investigation_id = %self.investigation_id, "subscribe on closed session");
            return subscription;
        }

        let replay: Vec<Event> = match after {
            Some(after) => state
                .ring
                .iter()
                .filter(|e| e.sequence.is_some_and(|s| s > after))
                .cloned()
                .collect(),
            None => Vec::new(),
        };
        if let (Some(after), Some(first)) = (after, state.ring.front().and_then(|e| e.sequence)) {
            if first > after + 1 {
                debug!(
                    investigation_id = %self.investigation_id,
                    after,
                    oldest = first,
                    "replay gap, ring no longer holds requested range"
                );
            }
        }

        let capacity = self.config.subscriber_buffer + replay.len() + 1;
        let (mut slot, subscription) =
            Subscription::pair(id.clone(), &self.investigation_id, capacity, Arc::downgrade(self));

        let connected = Event::new(
            self.investigation_id.clone(),
            EventPayload::Connected(ConnectedPayload {
                subscriber_id: id.clone(),
            }),
        );
        let _ = slot.offer(&connected);
        for event in &replay {
            let _ = slot.offer(event);
        }
        if state.lifecycle == Lifecycle::Draining {
            slot.close(CloseReason::Draining);
        }

        debug!(
            investigation_id = %self.investigation_id,
            subscriber_id = %id,
            replayed = replay.len(),
            lifecycle = ?state.lifecycle,
            "subscriber attached"
        );
        state.subscribers.push(slot);
        state.last_activity = Instant::now();
        gauge!(SUBSCRIBERS_ACTIVE).increment(1.0);
        subscription
    }

    /// Detach a subscriber. Unknown IDs are ignored.
    pub fn unsubscribe(&self, subscriber_id: &str) {
        let mut state = self.state.lock();
        if state.remove(subscriber_id) {
            state.last_activity = Instant::now();
            debug!(
                investigation_id = %self.investigation_id,
                subscriber_id,
                "subscriber detached"
            );
            state.close_if_drained(&self.investigation_id);
        }
    }
}

impl std::fmt::Debug for SessionBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SessionBroker")
            .field("investigation_id", &self.investigation_id)
            .field("lifecycle", &state.lifecycle)
            .field("counter", &state.counter)
            .field("subscribers", &state.subscribers.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use tracecast_core::{
        CompletionPayload, DeletedPayload, EventKind, InvestigationStatus, ProgressUpdatePayload,
        StatusChangedPayload,
    };

    fn config(ring: usize, buffer: usize) -> BrokerConfig {
        BrokerConfig {
            ring_capacity: ring,
            subscriber_buffer: buffer,
            ..BrokerConfig::default()
        }
    }

    fn progress(n: u32) -> Event {
        Event::new(
            "inv_1",
            EventPayload::ProgressUpdate(ProgressUpdatePayload {
                message: format!("step {n}"),
                progress: None,
                step: None,
            }),
        )
    }

    fn completed() -> Event {
        Event::new(
            "inv_1",
            EventPayload::Completion(CompletionPayload {
                status: InvestigationStatus::Completed,
                result: Some("done".into()),
            }),
        )
    }

    fn drain(sub: &mut Subscription) -> Vec<Event> {
        let mut out = Vec::new();
        while let Some(e) = sub.try_recv() {
            out.push(e);
        }
        out
    }

    // ── publish ──

    #[test]
    fn publish_assigns_increasing_sequences() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        assert_eq!(broker.publish(progress(1)), Some(1));
        assert_eq!(broker.publish(progress(2)), Some(2));
        assert_eq!(broker.last_sequence(), 2);
    }

    #[test]
    fn larger_supplied_sequence_advances_counter() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        assert_eq!(broker.publish(progress(1).with_sequence(10)), Some(10));
        assert_eq!(broker.publish(progress(2)), Some(11));
        // Stale supplied sequence is replaced.
        assert_eq!(broker.publish(progress(3).with_sequence(4)), Some(12));
    }

    #[test]
    fn ring_keeps_last_k() {
        let broker = SessionBroker::new("inv_1", config(3, 8));
        for n in 0..10 {
            let _ = broker.publish(progress(n));
        }
        assert_eq!(broker.ring_len(), 3);
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_fine() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        assert!(broker.publish(progress(1)).is_some());
        assert_eq!(broker.subscriber_count(), 0);
    }

    // ── subscribe ──

    #[tokio::test]
    async fn subscribe_gets_connected_first() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let mut sub = broker.subscribe(None);
        let first = sub.recv().await.unwrap();
        assert_matches!(first.payload, EventPayload::Connected(ref p) if p.subscriber_id == sub.id());
        assert_eq!(first.sequence, None);
        assert_eq!(broker.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn live_events_arrive_in_publish_order() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let mut sub = broker.subscribe(None);
        for n in 0..5 {
            let _ = broker.publish(progress(n));
        }
        let seqs: Vec<_> = drain(&mut sub).iter().filter_map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn replay_after_sequence() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        for n in 0..5 {
            let _ = broker.publish(progress(n));
        }
        let mut sub = broker.subscribe(Some(3));
        let events = drain(&mut sub);
        assert_eq!(events[0].kind(), EventKind::Connected);
        let seqs: Vec<_> = events.iter().filter_map(|e| e.sequence).collect();
        assert_eq!(seqs, vec![4, 5]);
    }

    #[tokio::test]
    async fn no_replay_without_after() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let _ = broker.publish(progress(1));
        let mut sub = broker.subscribe(None);
        assert_eq!(drain(&mut sub).len(), 1);
    }

    #[tokio::test]
    async fn replay_larger_than_buffer_fits() {
        let broker = SessionBroker::new("inv_1", config(64, 2));
        for n in 0..20 {
            let _ = broker.publish(progress(n));
        }
        let mut sub = broker.subscribe(Some(0));
        assert_eq!(drain(&mut sub).len(), 21);
        assert!(sub.close_reason().is_none());
    }

    // ── slow subscribers ──

    #[tokio::test]
    async fn full_subscriber_is_dropped_without_blocking() {
        let broker = SessionBroker::new("inv_1", config(8, 2));
        let mut slow = broker.subscribe(None);
        let mut fast = broker.subscribe(None);

        for n in 0..10 {
            let _ = broker.publish(progress(n));
            let _ = drain(&mut fast);
        }

        assert_eq!(slow.close_reason(), Some(CloseReason::Lagged));
        assert!(fast.close_reason().is_none());
        // Slow one still drains what it buffered, then ends.
        let buffered = drain(&mut slow);
        assert!(!buffered.is_empty());
        assert!(slow.recv().await.is_none());
    }

    #[test]
    fn lagged_drop_is_logged_with_context() {
        let (logs, _guard) = tracecast_logging::capture_logs();
        let broker = SessionBroker::new("inv_1", config(8, 2));
        let slow = broker.subscribe(None);

        let _ = broker.publish(progress(1));
        let _ = broker.publish(progress(2));

        assert_eq!(slow.close_reason(), Some(CloseReason::Lagged));
        let warnings = logs.find(tracing::Level::WARN, "subscriber lagged");
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].field("investigation_id"), Some("inv_1"));
        assert_eq!(warnings[0].field("sequence"), Some("2"));
        assert!(warnings[0].field("attached_for").is_some());
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_affect_others() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let gone = broker.subscribe(None);
        let mut kept = broker.subscribe(None);
        drop(gone);
        let _ = broker.publish(progress(1));
        assert_eq!(broker.subscriber_count(), 1);
        assert_eq!(drain(&mut kept).len(), 2);
    }

    // ── unsubscribe ──

    #[tokio::test]
    async fn unsubscribe_is_idempotent() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let sub = broker.subscribe(None);
        let id = sub.id().to_string();
        broker.unsubscribe(&id);
        broker.unsubscribe(&id);
        assert_eq!(broker.subscriber_count(), 0);
        drop(sub);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn drop_guard_unsubscribes() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let sub = broker.subscribe(None);
        assert_eq!(broker.subscriber_count(), 1);
        drop(sub);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn dropping_subscription_after_broker_is_safe() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let sub = broker.subscribe(None);
        drop(broker);
        drop(sub);
    }

    // ── lifecycle ──

    #[tokio::test]
    async fn terminal_event_drains_then_closes() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let mut sub = broker.subscribe(None);
        let _ = broker.publish(progress(1));
        let _ = broker.publish(completed());
        assert_eq!(broker.lifecycle(), Lifecycle::Draining);

        let events = drain(&mut sub);
        assert_eq!(events.last().unwrap().kind(), EventKind::Completion);
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.close_reason(), Some(CloseReason::Draining));

        drop(sub);
        assert_eq!(broker.lifecycle(), Lifecycle::Closed);
        assert_eq!(broker.publish(progress(2)), None);
    }

    #[test]
    fn terminal_with_no_subscribers_closes_immediately() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let _ = broker.publish(Event::new(
            "inv_1",
            EventPayload::StatusChanged(StatusChangedPayload {
                status: InvestigationStatus::Failed,
                error_message: Some("quota".into()),
            }),
        ));
        assert_eq!(broker.lifecycle(), Lifecycle::Closed);
    }

    #[test]
    fn non_terminal_status_keeps_open() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let _ = broker.publish(Event::new(
            "inv_1",
            EventPayload::StatusChanged(StatusChangedPayload {
                status: InvestigationStatus::Running,
                error_message: None,
            }),
        ));
        assert_eq!(broker.lifecycle(), Lifecycle::Open);
    }

    #[tokio::test]
    async fn subscribe_while_draining_gets_replay_then_closes() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let _holder = broker.subscribe(None);
        let _ = broker.publish(progress(1));
        let _ = broker.publish(Event::new("inv_1", EventPayload::Deleted(DeletedPayload {})));
        assert_eq!(broker.lifecycle(), Lifecycle::Draining);

        let mut late = broker.subscribe(Some(0));
        let events = drain(&mut late);
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].kind(), EventKind::Deleted);
        assert!(late.recv().await.is_none());
        assert_eq!(late.close_reason(), Some(CloseReason::Draining));
    }

    #[tokio::test]
    async fn subscribe_on_closed_is_already_closed() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        let _ = broker.publish(completed());
        assert_eq!(broker.lifecycle(), Lifecycle::Closed);

        let mut sub = broker.subscribe(Some(0));
        assert!(sub.recv().await.is_none());
        assert_eq!(sub.close_reason(), Some(CloseReason::Closed));
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_time_tracks_activity() {
        let broker = SessionBroker::new("inv_1", config(8, 8));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(broker.idle_for(Instant::now()) >= Duration::from_secs(5));
        let _ = broker.publish(progress(1));
        assert!(broker.idle_for(Instant::now()) < Duration::from_secs(1));
    }
}
