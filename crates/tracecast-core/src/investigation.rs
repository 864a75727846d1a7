//! Investigation status and record.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle status of an investigation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvestigationStatus {
    /// Created, agent not started yet.
    #[default]
    Pending,
    /// Agent is running.
    Running,
    /// Agent finished successfully.
    Completed,
    /// Agent failed.
    Failed,
    /// Cancelled by a user.
    Cancelled,
}

impl InvestigationStatus {
    /// Whether no further events are expected after this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for InvestigationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvestigationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "running" | "in_progress" => Ok(Self::Running),
            "completed" | "complete" | "done" => Ok(Self::Completed),
            "failed" | "error" => Ok(Self::Failed),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            other => Err(format!("unknown investigation status: {other}")),
        }
    }
}

/// Investigation metadata as held by the external store.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Investigation {
    /// Investigation ID.
    pub id: String,
    /// Current status.
    pub status: InvestigationStatus,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
    /// When the investigation reached `completed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Failure reason, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Final agent result, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl Investigation {
    /// New pending investigation created now.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            status: InvestigationStatus::Pending,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error_message: None,
            result: None,
        }
    }

    /// Apply a status transition, stamping `updated_at`/`completed_at`.
    pub fn transition(
        &mut self,
        status: InvestigationStatus,
        error_message: Option<String>,
        at: DateTime<Utc>,
    ) {
        self.status = status;
        self.updated_at = at;
        if error_message.is_some() {
            self.error_message = error_message;
        }
        if status == InvestigationStatus::Completed {
            self.completed_at = Some(at);
        }
    }
}
