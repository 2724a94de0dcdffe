//! One batch submission and its lifecycle.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use trustsign_core::{ArtifactStatus, Progress, RequestSnapshot, RequestState, SharedArtifact};
use trustsign_sync::{BatchFile, SubmitBatch};
use uuid::Uuid;

/// A batch of artifacts submitted together.
///
/// Holds references to the caller's artifacts, not copies: status changes
/// made while the request runs are visible through the caller's handles.
#[derive(Debug)]
pub struct SigningRequest {
    request_id: Uuid,
    files: Vec<SharedArtifact>,
    /// Names the files are submitted and downloaded under; unique within the batch.
    batch_names: Vec<String>,
    created_at: DateTime<Utc>,
    state: RequestState,
    remote_id: Option<String>,
    error_message: Option<String>,
}

impl SigningRequest {
    pub(crate) async fn new(files: Vec<SharedArtifact>, created_at: DateTime<Utc>) -> Self {
        let mut names = Vec::with_capacity(files.len());
        for file in &files {
            names.push(file.read().await.name().to_string());
        }
        Self {
            request_id: Uuid::new_v4(),
            files,
            batch_names: unique_batch_names(&names),
            created_at,
            state: RequestState::Created,
            remote_id: None,
            error_message: None,
        }
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn files(&self) -> &[SharedArtifact] {
        &self.files
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    pub fn remote_id(&self) -> Option<&str> {
        self.remote_id.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub(crate) fn batch_name(&self, index: usize) -> &str {
        &self.batch_names[index]
    }

    pub(crate) fn set_state(&mut self, state: RequestState) {
        self.state = state;
    }

    pub(crate) fn set_remote_id(&mut self, remote_id: String) {
        self.remote_id = Some(remote_id);
    }

    pub(crate) fn set_error(&mut self, message: impl Into<String>) {
        self.error_message = Some(message.into());
    }

    pub(crate) async fn batch(&self) -> SubmitBatch {
        let mut files = Vec::with_capacity(self.files.len());
        for (file, name) in self.files.iter().zip(&self.batch_names) {
            let artifact = file.read().await;
            files.push(BatchFile {
                name: name.clone(),
                path: artifact.path().to_path_buf(),
                size_bytes: artifact.size_bytes(),
            });
        }
        SubmitBatch {
            request_id: self.request_id,
            files,
        }
    }

    pub async fn statuses(&self) -> Vec<ArtifactStatus> {
        let mut statuses = Vec::with_capacity(self.files.len());
        for file in &self.files {
            statuses.push(file.read().await.status());
        }
        statuses
    }

    pub async fn progress(&self) -> Progress {
        Progress::from_statuses(&self.statuses().await)
    }

    pub async fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            request_id: self.request_id,
            state: self.state,
            created_at: self.created_at,
            remote_id: self.remote_id.clone(),
            file_statuses: self.statuses().await,
            error_message: self.error_message.clone(),
        }
    }
}

/// Keep the first occurrence of each name; prefix later duplicates with `<n>_`.
fn unique_batch_names(names: &[String]) -> Vec<String> {
    let mut used: HashSet<String> = HashSet::with_capacity(names.len());
    names
        .iter()
        .map(|name| {
            let mut candidate = name.clone();
            let mut n = 1;
            while used.contains(&candidate) {
                n += 1;
                candidate = format!("{n}_{name}");
            }
            used.insert(candidate.clone());
            candidate
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use trustsign_core::Artifact;

    #[test]
    fn duplicate_names_made_unique() {
        let names: Vec<String> = ["a.exe", "b.dll", "a.exe", "a.exe"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            unique_batch_names(&names),
            vec!["a.exe", "b.dll", "2_a.exe", "3_a.exe"]
        );

        let tricky: Vec<String> = ["a.exe", "2_a.exe", "a.exe"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(
            unique_batch_names(&tricky),
            vec!["a.exe", "2_a.exe", "3_a.exe"]
        );
    }

    #[tokio::test]
    async fn new_request_is_created_with_fresh_id() {
        let files = vec![
            SharedArtifact::new(Artifact::new("/a/x.exe", 1)),
            SharedArtifact::new(Artifact::new("/b/x.exe", 2)),
        ];
        let first = SigningRequest::new(files.clone(), Utc::now()).await;
        let second = SigningRequest::new(files, Utc::now()).await;
        assert_ne!(first.request_id(), second.request_id());
        assert_eq!(first.state(), RequestState::Created);

        let batch = first.batch().await;
        assert_eq!(batch.request_id, first.request_id());
        assert_eq!(batch.files[1].name, "2_x.exe");
        assert_eq!(batch.files[1].size_bytes, 2);
    }

    #[tokio::test]
    async fn snapshot_reflects_artifact_statuses() {
        let files = vec![
            SharedArtifact::new(Artifact::new("/a/x.exe", 1)),
            SharedArtifact::new(Artifact::new("/a/y.exe", 1)),
        ];
        let request = SigningRequest::new(files.clone(), Utc::now()).await;
        files[0].write().await.enqueue(request.request_id());
        files[0].write().await.complete(Utc::now());

        let snap = request.snapshot().await;
        assert_eq!(
            snap.file_statuses,
            vec![ArtifactStatus::Completed, ArtifactStatus::NotSigned]
        );
        assert_eq!(snap.progress_percent(), 50.0);
    }
}
