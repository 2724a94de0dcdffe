//! Signing orchestrator: drives each signing request from submission to replaced files.
//!
//! A request moves through
//! `Created → Authenticating → Submitting → Polling → Completing`, ending in
//! `Completed`, `Failed` or `Cancelled`. Every transition and every poll is
//! pushed to the [`ProgressReporter`].
//!
//! - Artifacts are only marked Queued after the authority accepted the batch.
//! - At most `max_concurrent_signing_requests` requests are submitting or
//!   polling at once; the rest wait for a slot.
//! - The poll budget runs from submission, measured on the injected clock.
//! - Once the authority reports Completed, every file is downloaded and
//!   replaced independently; one bad file does not stop the others.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use trustsign_core::{
    ArtifactStatus, Clock, ProgressReporter, RequestState, Settings, SharedArtifact,
};
use trustsign_store::{BackupManager, ScanOptions};
use trustsign_sync::{GatewayError, RemoteStatus, SigningGateway};

use crate::SignError;
use crate::request::SigningRequest;

/// How a poll loop ended.
enum PollEnd {
    Completed,
    /// Authority reported Failed (or an unreadable status) or Cancelled.
    Remote(ArtifactStatus, String),
    Cancelled,
    TimedOut(Duration),
    /// The credential could not be refreshed before a poll.
    AuthLost,
}

fn rejected_identity() -> SignError {
    SignError::Auth("signing authority rejected the configured identity".into())
}

/// Drives signing requests. Cheap to clone; clones share the concurrency gate.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Settings,
    gateway: Arc<SigningGateway>,
    backups: BackupManager,
    reporter: Arc<dyn ProgressReporter>,
    clock: Arc<dyn Clock>,
    slots: Arc<Semaphore>,
    scans: Mutex<HashSet<PathBuf>>,
}

/// Marks a scan root busy until dropped.
struct ScanGuard<'a> {
    scans: &'a Mutex<HashSet<PathBuf>>,
    root: PathBuf,
}

impl<'a> ScanGuard<'a> {
    fn acquire(scans: &'a Mutex<HashSet<PathBuf>>, root: PathBuf) -> Result<Self, SignError> {
        let mut active = scans.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(root.clone()) {
            return Err(SignError::Busy(root));
        }
        Ok(Self { scans, root })
    }
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        self.scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.root);
    }
}

impl Orchestrator {
    pub fn new(
        settings: Settings,
        gateway: Arc<SigningGateway>,
        reporter: Arc<dyn ProgressReporter>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(settings.concurrency_limit()));
        Self {
            inner: Arc::new(Inner {
                backups: BackupManager::new(clock.clone()),
                settings,
                gateway,
                reporter,
                clock,
                slots,
                scans: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    // ── Scanning ──

    /// Scan `root` using the recursion and hidden-file flags from settings.
    pub async fn scan(&self, root: &Path) -> Result<Vec<SharedArtifact>, SignError> {
        let options = ScanOptions {
            recursive: self.inner.settings.recursive_scan,
            show_hidden: self.inner.settings.show_hidden_files,
        };
        self.scan_with(root, options).await
    }

    /// Scan `root` on the blocking pool.
    ///
    /// Fails with [`SignError::Busy`] while another scan of the same root is running.
    pub async fn scan_with(
        &self,
        root: &Path,
        options: ScanOptions,
    ) -> Result<Vec<SharedArtifact>, SignError> {
        let key = tokio::fs::canonicalize(root)
            .await
            .unwrap_or_else(|_| root.to_path_buf());
        let _guard = ScanGuard::acquire(&self.inner.scans, key)?;

        let root = root.to_path_buf();
        let artifacts = tokio::task::spawn_blocking(move || trustsign_store::scan(&root, &options))
            .await
            .map_err(|e| SignError::Task(e.to_string()))??;
        Ok(artifacts.into_iter().map(SharedArtifact::new).collect())
    }

    // ── Signing ──

    /// Sign every selected artifact in one request.
    ///
    /// Request-level failures (auth, submit, timeout) are reported and
    /// returned as errors. A request the authority failed or cancelled, a
    /// request the caller cancelled through `cancel`, and a request with
    /// per-file failures are returned as `Ok` with the matching state.
    pub async fn sign(
        &self,
        artifacts: &[SharedArtifact],
        cancel: CancellationToken,
    ) -> Result<SigningRequest, SignError> {
        let mut selected = Vec::with_capacity(artifacts.len());
        for artifact in artifacts {
            if artifact.read().await.selected {
                selected.push(artifact.clone());
            }
        }
        if selected.is_empty() {
            return Err(SignError::NoSelection);
        }
        if !self.inner.settings.is_configured() {
            return Err(SignError::Configuration(
                self.inner.settings.missing_fields(),
            ));
        }

        let mut request = SigningRequest::new(selected, self.inner.clock.now()).await;
        info!(
            request_id = %request.request_id(),
            files = request.files().len(),
            "signing request created"
        );
        self.report(&request).await;

        self.transition(&mut request, RequestState::Authenticating).await;
        // No-op while the cached credential is fresh; refreshes when near expiry.
        if !self.inner.gateway.authenticate().await {
            return Err(self.abort(&mut request, rejected_identity()).await);
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(request_id = %request.request_id(), "cancelled before submission");
                request.set_error("cancelled before submission");
                self.transition(&mut request, RequestState::Cancelled).await;
                return Ok(request);
            }
            permit = self.inner.slots.clone().acquire_owned() => {
                permit.map_err(|e| SignError::Task(e.to_string()))?
            }
        };

        // The slot wait may have outlived the credential.
        if !self.inner.gateway.authenticate().await {
            return Err(self.abort(&mut request, rejected_identity()).await);
        }

        self.transition(&mut request, RequestState::Submitting).await;
        let submitted_at = self.inner.clock.now();
        let batch = request.batch().await;
        let remote_id = match self.inner.gateway.submit(&batch).await {
            Ok(id) => id,
            Err(e) => return Err(self.abort(&mut request, e.into()).await),
        };
        request.set_remote_id(remote_id.clone());
        for file in request.files() {
            file.write().await.enqueue(request.request_id());
        }

        self.transition(&mut request, RequestState::Polling).await;
        let end = self
            .poll_until_terminal(&mut request, &remote_id, submitted_at, &cancel)
            .await;
        drop(permit);

        match end {
            PollEnd::Completed => {
                if !self.inner.gateway.authenticate().await {
                    return Err(self.auth_lost(&mut request).await);
                }
                self.complete(&mut request, &remote_id).await;
                Ok(request)
            }
            PollEnd::AuthLost => Err(self.auth_lost(&mut request).await),
            PollEnd::Remote(status, message) => {
                self.finish_remaining(&request, status, &message).await;
                request.set_error(message);
                let state = if status == ArtifactStatus::Cancelled {
                    RequestState::Cancelled
                } else {
                    RequestState::Failed
                };
                self.transition(&mut request, state).await;
                Ok(request)
            }
            PollEnd::Cancelled => {
                if let Err(e) = self.inner.gateway.cancel(&remote_id).await {
                    warn!(remote_id = %remote_id, error = %e, "remote cancellation failed");
                }
                self.finish_remaining(&request, ArtifactStatus::Cancelled, "cancelled")
                    .await;
                request.set_error("cancelled by caller");
                self.transition(&mut request, RequestState::Cancelled).await;
                Ok(request)
            }
            PollEnd::TimedOut(budget) => {
                let err = SignError::Timeout(budget);
                self.finish_remaining(&request, ArtifactStatus::Failed, &err.to_string())
                    .await;
                if let Err(e) = self.inner.gateway.cancel(&remote_id).await {
                    debug!(remote_id = %remote_id, error = %e, "cancel after timeout failed");
                }
                Err(self.abort(&mut request, err).await)
            }
        }
    }

    async fn poll_until_terminal(
        &self,
        request: &mut SigningRequest,
        remote_id: &str,
        submitted_at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> PollEnd {
        let interval = self.inner.settings.poll_interval();
        let budget = self.inner.settings.poll_timeout();
        let mut polls = 0u32;

        loop {
            let elapsed = self.elapsed_since(submitted_at);
            if elapsed >= budget {
                warn!(request_id = %request.request_id(), polls, "poll budget exhausted");
                return PollEnd::TimedOut(budget);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return PollEnd::Cancelled,
                _ = self.inner.clock.sleep(interval.min(budget - elapsed)) => {}
            }

            if !self.inner.gateway.authenticate().await {
                return PollEnd::AuthLost;
            }
            polls += 1;
            let outcome = self.inner.gateway.poll_status(remote_id).await;
            if let Some(e) = &outcome.error {
                request.set_error(e.to_string());
            }
            match outcome.status.effective() {
                RemoteStatus::Queued => self.mirror(request, ArtifactStatus::Queued).await,
                RemoteStatus::InProgress => {
                    self.mirror(request, ArtifactStatus::InProgress).await
                }
                RemoteStatus::Completed => return PollEnd::Completed,
                RemoteStatus::Cancelled => {
                    return PollEnd::Remote(
                        ArtifactStatus::Cancelled,
                        "cancelled by signing authority".into(),
                    );
                }
                RemoteStatus::Failed | RemoteStatus::Unknown(_) => {
                    let message = match (&outcome.error, &outcome.status) {
                        (Some(e), _) => format!("status check failed: {e}"),
                        (None, RemoteStatus::Unknown(raw)) => {
                            format!("unrecognised status from signing authority: {raw}")
                        }
                        _ => "signing authority reported failure".to_string(),
                    };
                    return PollEnd::Remote(ArtifactStatus::Failed, message);
                }
            }
            self.report(request).await;
        }
    }

    /// Download and replace every file; the request fails if any file did.
    async fn complete(&self, request: &mut SigningRequest, remote_id: &str) {
        self.transition(request, RequestState::Completing).await;

        let total = request.files().len();
        let mut failures = 0usize;
        for (index, file) in request.files().to_vec().into_iter().enumerate() {
            let name = request.batch_name(index).to_string();
            let path = file.read().await.path().to_path_buf();

            let downloaded = if self.inner.gateway.authenticate().await {
                self.inner.gateway.download(remote_id, &name).await
            } else {
                Err(GatewayError::NotAuthenticated)
            };
            let result = match downloaded {
                Ok(Some(bytes)) => self
                    .inner
                    .backups
                    .replace_with_signed(&path, bytes)
                    .await
                    .map_err(SignError::from),
                Ok(None) => Err(SignError::SignedFileMissing(name.clone())),
                Err(e) => Err(e.into()),
            };

            match result {
                Ok(backup) => {
                    debug!(path = %path.display(), backup = %backup.display(), "file signed");
                    file.write().await.complete(self.inner.clock.now());
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "file could not be finished");
                    failures += 1;
                    file.write().await.fail(e.to_string());
                }
            }
            self.report(request).await;
        }

        if failures == 0 {
            info!(request_id = %request.request_id(), total, "signing request completed");
            self.transition(request, RequestState::Completed).await;
        } else {
            request.set_error(format!("{failures} of {total} files failed"));
            warn!(request_id = %request.request_id(), failures, total, "signing request failed");
            self.transition(request, RequestState::Failed).await;
        }
    }

    async fn mirror(&self, request: &SigningRequest, status: ArtifactStatus) {
        for file in request.files() {
            file.write().await.mark_pending(status);
        }
    }

    /// Give every non-terminal artifact the same terminal status.
    async fn finish_remaining(
        &self,
        request: &SigningRequest,
        status: ArtifactStatus,
        message: &str,
    ) {
        for file in request.files() {
            let mut artifact = file.write().await;
            if artifact.status().is_terminal() {
                continue;
            }
            match status {
                ArtifactStatus::Cancelled => artifact.cancel(),
                _ => artifact.fail(message),
            }
        }
    }

    /// Credential refresh failed after submission: fail what is left.
    async fn auth_lost(&self, request: &mut SigningRequest) -> SignError {
        let err = rejected_identity();
        self.finish_remaining(request, ArtifactStatus::Failed, &err.to_string())
            .await;
        self.abort(request, err).await
    }

    async fn abort(&self, request: &mut SigningRequest, err: SignError) -> SignError {
        warn!(
            request_id = %request.request_id(),
            kind = %err.kind(),
            error = %err,
            "signing request aborted"
        );
        request.set_error(err.to_string());
        self.transition(request, RequestState::Failed).await;
        err
    }

    async fn transition(&self, request: &mut SigningRequest, state: RequestState) {
        debug!(
            request_id = %request.request_id(),
            from = %request.state(),
            to = %state,
            "state change"
        );
        request.set_state(state);
        self.report(request).await;
    }

    async fn report(&self, request: &SigningRequest) {
        let snapshot = request.snapshot().await;
        self.inner.reporter.report(&snapshot);
    }

    fn elapsed_since(&self, start: DateTime<Utc>) -> Duration {
        (self.inner.clock.now() - start).to_std().unwrap_or_default()
    }
}
