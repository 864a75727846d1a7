//! Subscription → frame stream with heartbeat and coalescing.

use futures::Stream;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracecast_core::{
    CompletionPayload, ConnectedPayload, Event, EventPayload, HeartbeatPayload, Investigation,
    new_subscriber_id,
};
use tracing::{debug, info};

use super::coalesce::ChunkCoalescer;
use crate::broker::{CloseReason, Subscription};
use crate::config::TransportConfig;

/// Error code sent when the broker dropped a slow subscriber.
pub const SUBSCRIBER_LAGGED: &str = "SUBSCRIBER_LAGGED";

/// One unit written to the wire.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// An event frame.
    Event(Event),
    /// Clean end of stream.
    Done,
}

enum Step {
    Shutdown,
    Received(Option<Event>),
    WindowElapsed,
    Heartbeat,
}

/// Drive a subscription until it closes, the shutdown token fires, or the
/// consumer drops the stream (which drops the subscription and unsubscribes).
pub fn live_frames(
    subscription: Subscription,
    config: TransportConfig,
    shutdown: CancellationToken,
) -> impl Stream<Item = Frame> + Send + 'static {
    async_stream::stream! {
        let mut subscription = subscription;
        let investigation_id = subscription.investigation_id().to_string();
        let mut coalescer = ChunkCoalescer::new(config.coalesce_window);
        let mut heartbeat = tokio::time::interval(config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let _ = heartbeat.tick().await;

        debug!(
            investigation_id = %investigation_id,
            subscriber_id = %subscription.id(),
            "stream started"
        );

        loop {
            let deadline = coalescer.deadline();
            let step = tokio::select! {
                biased;
                () = shutdown.cancelled() => Step::Shutdown,
                received = subscription.recv() => Step::Received(received),
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    Step::WindowElapsed
                }
                _ = heartbeat.tick() => Step::Heartbeat,
            };

            match step {
                Step::Received(Some(event)) => {
                    for ready in coalescer.push(event, Instant::now()) {
                        yield Frame::Event(ready);
                    }
                }
                Step::WindowElapsed => {
                    if let Some(ready) = coalescer.poll_expired(Instant::now()) {
                        yield Frame::Event(ready);
                    }
                }
                Step::Heartbeat => {
                    let beat = Event::new(
                        investigation_id.clone(),
                        EventPayload::Heartbeat(HeartbeatPayload {}),
                    );
                    for ready in coalescer.push(beat, Instant::now()) {
                        yield Frame::Event(ready);
                    }
                }
                Step::Received(None) => {
                    if let Some(ready) = coalescer.flush() {
                        yield Frame::Event(ready);
                    }
                    let reason = subscription.close_reason();
                    info!(
                        investigation_id = %investigation_id,
                        subscriber_id = %subscription.id(),
                        reason = reason.map_or("unknown", CloseReason::as_str),
                        "stream ended"
                    );
                    if reason == Some(CloseReason::Lagged) {
                        yield Frame::Event(Event::new(
                            investigation_id.clone(),
                            EventPayload::error(
                                "subscriber fell behind; reload history and reconnect",
                                Some(SUBSCRIBER_LAGGED),
                            ),
                        ));
                    } else {
                        yield Frame::Done;
                    }
                    break;
                }
                Step::Shutdown => {
                    if let Some(ready) = coalescer.flush() {
                        yield Frame::Event(ready);
                    }
                    debug!(investigation_id = %investigation_id, "stream stopped for shutdown");
                    break;
                }
            }
        }
    }
}

/// Frames for an investigation that is already terminal: `connected`, one
/// `completion` carrying the stored outcome, then the terminal marker.
pub fn terminal_frames(investigation: &Investigation) -> Vec<Frame> {
    let connected = Event::new(
        investigation.id.clone(),
        EventPayload::Connected(ConnectedPayload {
            subscriber_id: new_subscriber_id(),
        }),
    );
    let result = investigation.result.as_ref().map(|v| match v {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    let completion = Event::new(
        investigation.id.clone(),
        EventPayload::Completion(CompletionPayload {
            status: investigation.status,
            result,
        }),
    );
    vec![Frame::Event(connected), Frame::Event(completion), Frame::Done]
}

/// [`terminal_frames`] as a boxed stream.
pub fn boxed_terminal(investigation: &Investigation) -> BoxStream<'static, Frame> {
    stream::iter(terminal_frames(investigation)).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use assert_matches::assert_matches;
    use futures::StreamExt;
    use tracecast_core::{
        EventKind, InvestigationStatus, MessageChunkPayload, MessageType, ProgressUpdatePayload,
    };

    use crate::broker::SessionBroker;
    use crate::config::BrokerConfig;

    fn transport(heartbeat_ms: u64, window_ms: u64) -> TransportConfig {
        TransportConfig {
            heartbeat_interval: Duration::from_millis(heartbeat_ms),
            coalesce_window: Duration::from_millis(window_ms),
        }
    }

    fn chunk(index: u64, content: &str) -> Event {
        Event::new(
            "inv_1",
            EventPayload::MessageChunk(MessageChunkPayload {
                message_id: "m1".into(),
                chunk_index: index,
                content: content.into(),
                message_type: MessageType::Agent,
                author: None,
            }),
        )
    }

    fn progress() -> Event {
        Event::new(
            "inv_1",
            EventPayload::ProgressUpdate(ProgressUpdatePayload {
                message: "working".into(),
                progress: None,
                step: None,
            }),
        )
    }

    fn completion() -> Event {
        Event::new(
            "inv_1",
            EventPayload::Completion(CompletionPayload {
                status: InvestigationStatus::Completed,
                result: None,
            }),
        )
    }

    fn kind(frame: &Frame) -> Option<EventKind> {
        match frame {
            Frame::Event(e) => Some(e.kind()),
            Frame::Done => None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn connected_then_events_then_done() {
        let broker = SessionBroker::new("inv_1", BrokerConfig::default());
        let sub = broker.subscribe(None);
        let _ = broker.publish(progress());
        let _ = broker.publish(completion());

        let frames: Vec<Frame> =
            live_frames(sub, transport(30_000, 0), CancellationToken::new())
                .collect()
                .await;
        let kinds: Vec<_> = frames.iter().map(kind).collect();
        assert_eq!(
            kinds,
            vec![
                Some(EventKind::Connected),
                Some(EventKind::ProgressUpdate),
                Some(EventKind::Completion),
                None,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_emitted_when_idle() {
        let broker = SessionBroker::new("inv_1", BrokerConfig::default());
        let sub = broker.subscribe(None);
        let mut frames = Box::pin(live_frames(sub, transport(1_000, 0), CancellationToken::new()));

        assert_matches!(frames.next().await, Some(Frame::Event(ref e)) if e.kind() == EventKind::Connected);
        let beat = frames.next().await.unwrap();
        assert_matches!(beat, Frame::Event(ref e) if e.kind() == EventKind::Heartbeat && e.sequence.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn coalesced_chunk_flushes_on_idle() {
        let broker = SessionBroker::new("inv_1", BrokerConfig::default());
        let sub = broker.subscribe(None);
        let _ = broker.publish(chunk(1, "H"));
        let _ = broker.publish(chunk(2, "He"));
        let _ = broker.publish(chunk(3, "Hel"));

        let mut frames = Box::pin(live_frames(sub, transport(30_000, 50), CancellationToken::new()));
        assert_matches!(frames.next().await, Some(Frame::Event(ref e)) if e.kind() == EventKind::Connected);

        // No further publish: the window elapsing alone must release the chunk.
        let next = frames.next().await.unwrap();
        assert_matches!(next, Frame::Event(Event { payload: EventPayload::MessageChunk(ref c), .. }) if c.content == "Hel" && c.chunk_index == 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_chunk_flushed_before_done() {
        let broker = SessionBroker::new("inv_1", BrokerConfig::default());
        let sub = broker.subscribe(None);
        let _ = broker.publish(chunk(1, "H"));
        let _ = broker.publish(chunk(2, "Hi"));
        let _ = broker.publish(completion());

        let frames: Vec<Frame> =
            live_frames(sub, transport(30_000, 5_000), CancellationToken::new())
                .collect()
                .await;
        let kinds: Vec<_> = frames.iter().map(kind).collect();
        assert_eq!(
            kinds,
            vec![
                Some(EventKind::Connected),
                Some(EventKind::MessageChunk),
                Some(EventKind::Completion),
                None,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn lagged_subscriber_gets_error_and_ends() {
        let broker = SessionBroker::new(
            "inv_1",
            BrokerConfig {
                subscriber_buffer: 1,
                ..BrokerConfig::default()
            },
        );
        let sub = broker.subscribe(None);
        for _ in 0..5 {
            let _ = broker.publish(progress());
        }

        let frames: Vec<Frame> =
            live_frames(sub, transport(30_000, 0), CancellationToken::new())
                .collect()
                .await;
        let last = frames.last().unwrap();
        assert_matches!(last, Frame::Event(Event { payload: EventPayload::Error(e), .. }) if e.code.as_deref() == Some(SUBSCRIBER_LAGGED));
        assert!(!frames.contains(&Frame::Done));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_stream_without_marker() {
        let broker = SessionBroker::new("inv_1", BrokerConfig::default());
        let sub = broker.subscribe(None);
        let token = CancellationToken::new();
        let mut frames = Box::pin(live_frames(sub, transport(30_000, 0), token.clone()));
        let _ = frames.next().await;
        token.cancel();
        assert!(frames.next().await.is_none());
    }

    #[tokio::test]
    async fn dropping_stream_unsubscribes() {
        let broker = SessionBroker::new("inv_1", BrokerConfig::default());
        let sub = broker.subscribe(None);
        let mut frames = Box::pin(live_frames(sub, transport(30_000, 0), CancellationToken::new()));
        let _ = frames.next().await;
        assert_eq!(broker.subscriber_count(), 1);
        drop(frames);
        assert_eq!(broker.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn terminal_snapshot_frames() {
        let mut inv = Investigation::new("inv_1");
        inv.transition(InvestigationStatus::Failed, Some("quota".into()), chrono::Utc::now());
        let frames: Vec<Frame> = boxed_terminal(&inv).collect().await;
        assert_eq!(frames.len(), 3);
        assert_matches!(&frames[1], Frame::Event(Event { payload: EventPayload::Completion(c), .. }) if c.status == InvestigationStatus::Failed);
        assert_eq!(frames[2], Frame::Done);
    }
}
