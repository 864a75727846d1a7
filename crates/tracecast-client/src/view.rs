//! View model published to renderers.

use std::fmt;

use serde::Serialize;
use tracecast_core::{InvestigationStatus, Message};

/// Push-channel state as shown to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Initial load in progress.
    #[default]
    Connecting,
    /// Stream open.
    Live,
    /// Stream dropped; retrying while polling history.
    Reconnecting,
    /// Terminal marker received.
    Ended,
    /// Retries exhausted or initial load failed.
    Failed,
}

impl ConnectionState {
    /// Wire/display string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
            Self::Ended => "ended",
            Self::Failed => "failed",
        }
    }

    /// Whether the watcher has stopped.
    pub fn is_final(self) -> bool {
        matches!(self, Self::Ended | Self::Failed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a renderer needs for one investigation.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ViewModel {
    /// Reconciled log, in display order.
    pub messages: Vec<Message>,
    /// Last known investigation status.
    pub status: Option<InvestigationStatus>,
    /// Push-channel state.
    pub connection: ConnectionState,
    /// Latest non-fatal error surfaced by the stream.
    pub notice: Option<String>,
    /// Investigation was deleted.
    pub deleted: bool,
}
