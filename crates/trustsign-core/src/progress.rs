//! Request state snapshots and the reporter sink that receives them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::artifact::ArtifactStatus;

/// Lifecycle of one signing request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RequestState {
    Created,
    Authenticating,
    Submitting,
    Polling,
    Completing,
    Completed,
    Failed,
    Cancelled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Authenticating => "authenticating",
            Self::Submitting => "submitting",
            Self::Polling => "polling",
            Self::Completing => "completing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for RequestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts derived from per-file statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Progress {
    pub fn from_statuses(statuses: &[ArtifactStatus]) -> Self {
        let mut progress = Self {
            total: statuses.len(),
            ..Self::default()
        };
        for status in statuses {
            match status {
                ArtifactStatus::Completed => progress.completed += 1,
                ArtifactStatus::Failed => progress.failed += 1,
                _ => {}
            }
        }
        progress
    }

    /// Completed + Failed.
    pub fn processed(&self) -> usize {
        self.completed + self.failed
    }

    /// `processed / total * 100`, or 0 for an empty request.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.processed() as f64 / self.total as f64 * 100.0
    }

    /// Every file processed and none failed.
    pub fn all_succeeded(&self) -> bool {
        self.processed() == self.total && self.failed == 0
    }
}

/// Owned view of a request at one point in time.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSnapshot {
    pub request_id: Uuid,
    pub state: RequestState,
    pub created_at: DateTime<Utc>,
    pub remote_id: Option<String>,
    pub file_statuses: Vec<ArtifactStatus>,
    pub error_message: Option<String>,
}

impl RequestSnapshot {
    pub fn progress(&self) -> Progress {
        Progress::from_statuses(&self.file_statuses)
    }

    pub fn progress_percent(&self) -> f64 {
        self.progress().percent()
    }
}

/// Sink for request state transitions.
///
/// Called at least once per transition and once per poll, from whichever
/// task drives the request.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, snapshot: &RequestSnapshot);
}

/// Discards every report.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _snapshot: &RequestSnapshot) {}
}

/// Logs every report at `info`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, snapshot: &RequestSnapshot) {
        let progress = snapshot.progress();
        info!(
            request_id = %snapshot.request_id,
            state = %snapshot.state,
            processed = progress.processed(),
            total = progress.total,
            error = snapshot.error_message.as_deref().unwrap_or(""),
            "signing request progress"
        );
    }
}
