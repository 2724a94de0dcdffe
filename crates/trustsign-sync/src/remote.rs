//! Request/response records exchanged with the signing authority.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::GatewayError;

/// Status of a submitted batch as reported by the signing authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    /// A status string this client does not recognise.
    Unknown(String),
}

impl RemoteStatus {
    /// Parse a wire status. Case and `_`/`-` separators are ignored.
    pub fn parse(raw: &str) -> Self {
        let normalized: String = raw
            .chars()
            .filter(|c| *c != '_' && *c != '-' && !c.is_whitespace())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        match normalized.as_str() {
            "queued" | "notstarted" | "pending" => Self::Queued,
            "inprogress" | "running" => Self::InProgress,
            "completed" | "succeeded" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            _ => Self::Unknown(raw.to_string()),
        }
    }

    /// Status the orchestrator acts on: unknown values count as Failed.
    pub fn effective(&self) -> RemoteStatus {
        match self {
            Self::Unknown(_) => Self::Failed,
            other => other.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.effective(), Self::Queued | Self::InProgress)
    }
}

/// Bearer credential with an absolute expiry. The token value never leaves this crate.
#[derive(Clone)]
pub struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(value: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            expires_at,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub(crate) fn secret(&self) -> &str {
        &self.value
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// One file in a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchFile {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// A batch submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitBatch {
    /// Client-generated id, sent so the authority can de-duplicate resubmissions.
    pub request_id: Uuid,
    pub files: Vec<BatchFile>,
}

/// Result of one status poll.
///
/// A failed poll still yields a status (Failed) so the caller never spins on
/// an error; the cause is kept in `error`.
#[derive(Debug)]
pub struct PollOutcome {
    pub status: RemoteStatus,
    pub error: Option<GatewayError>,
}
