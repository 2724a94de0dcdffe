//! Files under consideration for signing.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

use crate::classify::extension_of;

/// Per-file signing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArtifactStatus {
    NotSigned,
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl ArtifactStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotSigned => "not-signed",
            Self::Queued => "queued",
            Self::InProgress => "in-progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Completed, Failed, or Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Counted towards request progress: Completed or Failed.
    pub fn is_processed(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for ArtifactStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One file under consideration for signing.
///
/// Status fields are private: the only way to change them is through the
/// transition methods, which keep `signing_request_id` set for every status
/// other than [`ArtifactStatus::NotSigned`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    path: PathBuf,
    name: String,
    extension: String,
    size_bytes: u64,
    status: ArtifactStatus,
    /// Caller-controlled; only selected artifacts are submitted.
    pub selected: bool,
    signing_request_id: Option<Uuid>,
    signed_at: Option<DateTime<Utc>>,
    error_message: Option<String>,
}

impl Artifact {
    /// Create an unsigned, selected artifact for `path`.
    pub fn new(path: impl Into<PathBuf>, size_bytes: u64) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = extension_of(&path);
        Self {
            path,
            name,
            extension,
            size_bytes,
            status: ArtifactStatus::NotSigned,
            selected: true,
            signing_request_id: None,
            signed_at: None,
            error_message: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    pub fn status(&self) -> ArtifactStatus {
        self.status
    }

    pub fn signing_request_id(&self) -> Option<Uuid> {
        self.signing_request_id
    }

    pub fn signed_at(&self) -> Option<DateTime<Utc>> {
        self.signed_at
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    // ── Transitions ──

    /// Join a freshly submitted request. Clears any outcome from a previous request.
    pub fn enqueue(&mut self, request_id: Uuid) {
        self.signing_request_id = Some(request_id);
        self.status = ArtifactStatus::Queued;
        self.signed_at = None;
        self.error_message = None;
    }

    /// Mirror a remote Queued/InProgress status. Ignored once terminal or before enqueue.
    pub fn mark_pending(&mut self, status: ArtifactStatus) {
        debug_assert!(matches!(
            status,
            ArtifactStatus::Queued | ArtifactStatus::InProgress
        ));
        if self.signing_request_id.is_some() && !self.status.is_terminal() {
            self.status = status;
        }
    }

    pub fn complete(&mut self, at: DateTime<Utc>) {
        if self.signing_request_id.is_none() {
            return;
        }
        self.status = ArtifactStatus::Completed;
        self.signed_at = Some(at);
        self.error_message = None;
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        if self.signing_request_id.is_none() {
            return;
        }
        self.status = ArtifactStatus::Failed;
        self.signed_at = None;
        self.error_message = Some(message.into());
    }

    pub fn cancel(&mut self) {
        if self.signing_request_id.is_none() {
            return;
        }
        self.status = ArtifactStatus::Cancelled;
        self.signed_at = None;
    }

    /// Forget every request association.
    pub fn reset(&mut self) {
        self.status = ArtifactStatus::NotSigned;
        self.signing_request_id = None;
        self.signed_at = None;
        self.error_message = None;
    }
}

/// An [`Artifact`] shared between the caller's collection and a signing request.
///
/// Clones point at the same artifact, so status changes made while a request
/// runs are visible to every holder.
#[derive(Debug, Clone)]
pub struct SharedArtifact(Arc<RwLock<Artifact>>);

impl SharedArtifact {
    pub fn new(artifact: Artifact) -> Self {
        Self(Arc::new(RwLock::new(artifact)))
    }

    pub async fn read(&self) -> RwLockReadGuard<'_, Artifact> {
        self.0.read().await
    }

    pub async fn write(&self) -> RwLockWriteGuard<'_, Artifact> {
        self.0.write().await
    }

    /// Owned copy of the current state.
    pub async fn snapshot(&self) -> Artifact {
        self.0.read().await.clone()
    }

    /// True if both handles refer to the same artifact.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl From<Artifact> for SharedArtifact {
    fn from(artifact: Artifact) -> Self {
        Self::new(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_fields() {
        let a = Artifact::new("/builds/out/Setup.EXE", 42);
        assert_eq!(a.name(), "Setup.EXE");
        assert_eq!(a.extension(), "exe");
        assert_eq!(a.size_bytes(), 42);
        assert_eq!(a.status(), ArtifactStatus::NotSigned);
        assert!(a.selected);
        assert!(a.signing_request_id().is_none());
    }

    #[test]
    fn transitions_keep_request_id_invariant() {
        let mut a = Artifact::new("/tmp/a.dll", 1);
        // Not enqueued yet: terminal transitions are refused.
        a.fail("boom");
        assert_eq!(a.status(), ArtifactStatus::NotSigned);
        assert!(a.error_message().is_none());

        let id = Uuid::new_v4();
        a.enqueue(id);
        assert_eq!(a.status(), ArtifactStatus::Queued);
        assert_eq!(a.signing_request_id(), Some(id));

        a.mark_pending(ArtifactStatus::InProgress);
        assert_eq!(a.status(), ArtifactStatus::InProgress);

        let now = Utc::now();
        a.complete(now);
        assert_eq!(a.status(), ArtifactStatus::Completed);
        assert_eq!(a.signed_at(), Some(now));

        // Terminal statuses are not overwritten by pending mirrors.
        a.mark_pending(ArtifactStatus::Queued);
        assert_eq!(a.status(), ArtifactStatus::Completed);

        a.reset();
        assert_eq!(a.status(), ArtifactStatus::NotSigned);
        assert!(a.signing_request_id().is_none());
        assert!(a.signed_at().is_none());
    }

    #[test]
    fn enqueue_clears_previous_outcome() {
        let mut a = Artifact::new("/tmp/a.msi", 1);
        let first = Uuid::new_v4();
        a.enqueue(first);
        a.fail("server rejected");
        let second = Uuid::new_v4();
        a.enqueue(second);
        assert_eq!(a.signing_request_id(), Some(second));
        assert!(a.error_message().is_none());
    }

    #[tokio::test]
    async fn shared_artifact_mutations_are_visible_to_clones() {
        let shared = SharedArtifact::new(Artifact::new("/tmp/x.sys", 10));
        let alias = shared.clone();
        alias.write().await.enqueue(Uuid::new_v4());
        assert_eq!(shared.read().await.status(), ArtifactStatus::Queued);
        assert!(shared.ptr_eq(&alias));
    }
}
