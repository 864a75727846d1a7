//! Investigation ID → session map with idle reaping.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{counter, gauge};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::session::{Lifecycle, SessionBroker};
use crate::config::BrokerConfig;
use crate::metrics::{SESSIONS_ACTIVE, SESSIONS_REAPED_TOTAL};

/// What the registry remembers about a session it no longer holds.
#[derive(Clone, Copy, Debug)]
struct Retired {
    last_sequence: u64,
    closed: bool,
}

#[derive(Default)]
struct Sessions {
    live: HashMap<String, Arc<SessionBroker>>,
    retired: HashMap<String, Retired>,
}

impl Sessions {
    fn retire(&mut self, investigation_id: &str) -> Option<Arc<SessionBroker>> {
        let broker = self.live.remove(investigation_id)?;
        let _ = self.retired.insert(
            investigation_id.to_string(),
            Retired {
                last_sequence: broker.last_sequence(),
                closed: broker.lifecycle() == Lifecycle::Closed,
            },
        );
        Some(broker)
    }

    fn start(&mut self, investigation_id: &str, config: &BrokerConfig) -> Arc<SessionBroker> {
        let last_sequence = self
            .retired
            .remove(investigation_id)
            .map_or(0, |r| r.last_sequence);
        let broker = SessionBroker::resume(investigation_id, config.clone(), last_sequence);
        let _ = self
            .live
            .insert(investigation_id.to_string(), Arc::clone(&broker));
        gauge!(SESSIONS_ACTIVE).increment(1.0);
        debug!(investigation_id, last_sequence, "session created");
        broker
    }
}

/// Owns every live [`SessionBroker`].
///
/// Sequences never restart for an investigation: when a session is reaped,
/// removed or replaced, its last sequence is kept and the next session for
/// the same investigation continues from it.
pub struct SessionRegistry {
    sessions: RwLock<Sessions>,
    config: BrokerConfig,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            sessions: RwLock::new(Sessions::default()),
            config,
        }
    }

    /// Broker tuning applied to new sessions.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Existing session, or a fresh one. A closed session is replaced.
    ///
    /// This is the entry point for subscribers and for (re)starting an
    /// investigation; plain publishes go through [`publisher`](Self::publisher).
    pub fn get_or_create(&self, investigation_id: &str) -> Arc<SessionBroker> {
        if let Some(existing) = self.sessions.read().live.get(investigation_id) {
            if existing.lifecycle() != Lifecycle::Closed {
                return Arc::clone(existing);
            }
        }

        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.live.get(investigation_id) {
            if existing.lifecycle() != Lifecycle::Closed {
                return Arc::clone(existing);
            }
        }
        if sessions.retire(investigation_id).is_some() {
            gauge!(SESSIONS_ACTIVE).decrement(1.0);
        }
        sessions.start(investigation_id, &self.config)
    }

    /// Session to publish into.
    ///
    /// Returns the current session whatever its lifecycle, so publishing after
    /// close stays a no-op. A session is only created when the investigation
    /// has none and its last session did not close; `None` otherwise.
    pub fn publisher(&self, investigation_id: &str) -> Option<Arc<SessionBroker>> {
        if let Some(existing) = self.sessions.read().live.get(investigation_id) {
            return Some(Arc::clone(existing));
        }

        let mut sessions = self.sessions.write();
        if let Some(existing) = sessions.live.get(investigation_id) {
            return Some(Arc::clone(existing));
        }
        if sessions
            .retired
            .get(investigation_id)
            .is_some_and(|r| r.closed)
        {
            return None;
        }
        Some(sessions.start(investigation_id, &self.config))
    }

    /// Existing session, if any.
    pub fn get(&self, investigation_id: &str) -> Option<Arc<SessionBroker>> {
        self.sessions.read().live.get(investigation_id).cloned()
    }

    /// Highest sequence ever assigned for an investigation, live or retired.
    pub fn last_sequence(&self, investigation_id: &str) -> Option<u64> {
        let sessions = self.sessions.read();
        sessions
            .live
            .get(investigation_id)
            .map(|s| s.last_sequence())
            .or_else(|| sessions.retired.get(investigation_id).map(|r| r.last_sequence))
    }

    /// Forget a session. Subscribers already attached keep their handles.
    pub fn remove(&self, investigation_id: &str) -> Option<Arc<SessionBroker>> {
        let removed = self.sessions.write().retire(investigation_id);
        if removed.is_some() {
            gauge!(SESSIONS_ACTIVE).decrement(1.0);
        }
        removed
    }

    /// Number of sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.read().live.len()
    }

    /// Subscribers across all sessions.
    pub fn subscriber_count(&self) -> usize {
        self.sessions
            .read()
            .live
            .values()
            .map(|s| s.subscriber_count())
            .sum()
    }

    /// Evict closed sessions and sessions idle past the timeout with no
    /// subscribers. Returns the evicted IDs.
    pub fn reap(&self, now: Instant) -> Vec<String> {
        let mut sessions = self.sessions.write();
        let idle_timeout = self.config.idle_timeout;
        let expired: Vec<String> = sessions
            .live
            .iter()
            .filter(|(_, s)| {
                s.lifecycle() == Lifecycle::Closed
                    || (s.subscriber_count() == 0 && s.idle_for(now) >= idle_timeout)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            let _ = sessions.retire(id);
        }
        if !expired.is_empty() {
            let count = expired.len();
            gauge!(SESSIONS_ACTIVE).decrement(count as f64);
            counter!(SESSIONS_REAPED_TOTAL).increment(count as u64);
            debug!(count, remaining = sessions.live.len(), "sessions reaped");
        }
        expired
    }

    /// Run [`reap`](Self::reap) every `reap_interval` until cancelled.
    pub fn spawn_reaper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let period = self.config.reap_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            let _ = interval.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("session reaper stopped");
                        break;
                    }
                    _ = interval.tick() => {
                        let _ = registry.reap(Instant::now());
                    }
                }
            }
        })
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}
