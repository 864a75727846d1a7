//! Reconnecting driver: API client + push channel → reconciler → view model.
//!
//! Subscribes before loading history so nothing published in between is
//! lost (duplicates are harmless to the reconciler). When the stream drops
//! it polls history while retrying with backoff, and resumes after the last
//! sequence it saw.

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracecast_core::EventKind;
use tracecast_settings::ClientSettings;
use tracing::{debug, info, instrument, warn};

use crate::api::{ApiClient, EventStream};
use crate::backoff::ReconnectPolicy;
use crate::errors::{ClientError, Result};
use crate::reconciler::{Outcome, Reconciler};
use crate::sse::StreamItem;
use crate::view::{ConnectionState, ViewModel};

enum StreamEnd {
    Done,
    Cancelled,
    Dropped(ClientError),
}

/// Follows one investigation until its stream ends cleanly, the watcher is
/// cancelled, or reconnecting gives up.
pub struct InvestigationWatcher {
    api: ApiClient,
    reconciler: Reconciler,
    policy: ReconnectPolicy,
    tx: watch::Sender<ViewModel>,
    connection: ConnectionState,
}

impl InvestigationWatcher {
    /// Watcher for `investigation_id`.
    pub fn new(api: ApiClient, investigation_id: impl Into<String>, policy: ReconnectPolicy) -> Self {
        let (tx, _) = watch::channel(ViewModel::default());
        Self {
            api,
            reconciler: Reconciler::new(investigation_id),
            policy,
            tx,
            connection: ConnectionState::Connecting,
        }
    }

    /// Watcher configured from client settings.
    pub fn from_settings(settings: &ClientSettings, investigation_id: impl Into<String>) -> Self {
        Self::new(
            ApiClient::from_settings(settings),
            investigation_id,
            ReconnectPolicy::from_settings(settings),
        )
    }

    /// Observe view updates.
    pub fn subscribe(&self) -> watch::Receiver<ViewModel> {
        self.tx.subscribe()
    }

    /// Run on a task; returns the view receiver and the task handle.
    pub fn spawn(
        self,
        cancel: CancellationToken,
    ) -> (watch::Receiver<ViewModel>, JoinHandle<Result<ViewModel>>) {
        let rx = self.subscribe();
        let handle = tokio::spawn(self.run(cancel));
        (rx, handle)
    }

    /// Drive the watcher to completion and return the last view.
    ///
    /// Fails when the initial investigation or history fetch fails, or when
    /// reconnect attempts are exhausted. Cancellation returns the current
    /// view.
    #[instrument(skip_all, fields(investigation_id = %self.reconciler.investigation_id()))]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<ViewModel> {
        let id = self.reconciler.investigation_id().to_string();
        self.publish(ConnectionState::Connecting);

        let investigation = match self.api.get_investigation(&id).await {
            Ok(investigation) => investigation,
            Err(e) => return Err(self.fail(e)),
        };
        self.reconciler.set_status(investigation.status);

        let mut stream = match self.api.open_stream(&id, None).await {
            Ok(stream) => Some(stream),
            Err(e) if e.is_not_found() => return Err(self.fail(e)),
            Err(e) => {
                warn!(error = %e, "initial stream open failed");
                None
            }
        };

        match self.api.history(&id).await {
            Ok(history) => self.reconciler.load_history(history),
            Err(e) => return Err(self.fail(e)),
        }

        let mut attempts = 0u32;
        loop {
            if let Some(open) = stream.take() {
                self.publish(ConnectionState::Live);
                match self.drive(open, &cancel, &mut attempts).await {
                    StreamEnd::Done => {
                        info!("stream ended");
                        self.publish(ConnectionState::Ended);
                        return Ok(self.current());
                    }
                    StreamEnd::Cancelled => return Ok(self.current()),
                    StreamEnd::Dropped(e) => warn!(error = %e, "stream dropped"),
                }
            }

            self.publish(ConnectionState::Reconnecting);
            match self.reconnect(&cancel, &mut attempts).await? {
                Some(open) => stream = Some(open),
                None => return Ok(self.current()),
            }
        }
    }

    async fn drive(
        &mut self,
        mut stream: EventStream,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> StreamEnd {
        loop {
            let item = tokio::select! {
                biased;
                () = cancel.cancelled() => return StreamEnd::Cancelled,
                item = stream.next() => item,
            };
            match item {
                Some(Ok(StreamItem::Event(event))) => {
                    if event.kind() == EventKind::Connected {
                        *attempts = 0;
                    }
                    if self.reconciler.apply(&event) == Outcome::Updated {
                        self.publish(self.connection);
                    }
                }
                Some(Ok(StreamItem::Done)) => return StreamEnd::Done,
                Some(Err(e)) => return StreamEnd::Dropped(e),
                None => return StreamEnd::Dropped(ClientError::StreamClosed),
            }
        }
    }

    /// Retry the stream with backoff, polling history in the meantime.
    /// `Ok(None)` means cancelled.
    async fn reconnect(
        &mut self,
        cancel: &CancellationToken,
        attempts: &mut u32,
    ) -> Result<Option<EventStream>> {
        let id = self.reconciler.investigation_id().to_string();
        let mut poll = tokio::time::interval(self.policy.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let _ = poll.tick().await;

        loop {
            if !self.policy.allows(*attempts) {
                return Err(self.fail(ClientError::RetriesExhausted {
                    attempts: *attempts,
                }));
            }
            let delay = self.policy.delay(*attempts);
            *attempts += 1;
            debug!(attempt = *attempts, delay_ms = delay.as_millis(), "reconnecting");

            let wake = Instant::now() + delay;
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Ok(None),
                    () = tokio::time::sleep_until(wake) => break,
                    _ = poll.tick() => self.refresh_history().await,
                }
            }

            let after = self.reconciler.last_sequence();
            match self.api.open_stream(&id, after).await {
                Ok(stream) => {
                    info!(attempt = *attempts, ?after, "stream reopened");
                    self.refresh_history().await;
                    return Ok(Some(stream));
                }
                Err(e) if e.is_not_found() => return Err(self.fail(e)),
                Err(e) => warn!(attempt = *attempts, error = %e, "reconnect failed"),
            }
        }
    }

    async fn refresh_history(&mut self) {
        let id = self.reconciler.investigation_id().to_string();
        match self.api.history(&id).await {
            Ok(history) => {
                self.reconciler.load_history(history);
                self.publish(self.connection);
            }
            Err(e) => warn!(error = %e, "history refresh failed"),
        }
    }

    fn fail(&mut self, error: ClientError) -> ClientError {
        warn!(error = %error, "watcher failed");
        self.publish(ConnectionState::Failed);
        error
    }

    fn publish(&mut self, connection: ConnectionState) {
        self.connection = connection;
        let _ = self.tx.send_replace(self.reconciler.view(connection));
    }

    fn current(&self) -> ViewModel {
        self.tx.borrow().clone()
    }
}
