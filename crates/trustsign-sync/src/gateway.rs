//! Signing gateway: the single owner of the bearer credential.
//!
//! [`SigningTransport`] is the raw remote API (one call, no caching, no
//! retry). [`SigningGateway`] wraps a transport and adds:
//!
//! - credential lifetime: one cached token, refreshed under a mutex so
//!   concurrent callers share a single token exchange
//! - retry with exponential backoff on transient failures
//! - fail-safe polling: any error becomes a Failed status plus the error

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use trustsign_core::{Clock, Settings};

use crate::remote::{AccessToken, PollOutcome, RemoteStatus, SubmitBatch};
use crate::retry::{RetryPolicy, retry};
use crate::GatewayError;

/// Tokens expiring within this margin are refreshed before use.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Raw operations against the signing authority.
#[async_trait]
pub trait SigningTransport: Send + Sync {
    /// Exchange the configured identity for a bearer token.
    async fn request_token(&self) -> Result<AccessToken, GatewayError>;

    /// Submit a batch; returns the authority's id for it.
    async fn submit(&self, token: &str, batch: &SubmitBatch) -> Result<String, GatewayError>;

    async fn status(&self, token: &str, remote_id: &str) -> Result<RemoteStatus, GatewayError>;

    /// Signed bytes for `file_name`, or `None` if the authority produced none.
    async fn download(
        &self,
        token: &str,
        remote_id: &str,
        file_name: &str,
    ) -> Result<Option<Vec<u8>>, GatewayError>;

    async fn cancel(&self, token: &str, remote_id: &str) -> Result<(), GatewayError>;
}

/// Credential-owning client for the signing authority.
pub struct SigningGateway {
    transport: Arc<dyn SigningTransport>,
    settings: Settings,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    refresh_margin: Duration,
    credential: Mutex<Option<AccessToken>>,
}

impl SigningGateway {
    pub fn new(
        transport: Arc<dyn SigningTransport>,
        settings: Settings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            settings,
            clock,
            retry: RetryPolicy::default(),
            refresh_margin: DEFAULT_REFRESH_MARGIN,
            credential: Mutex::new(None),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn valid_for(&self, token: &AccessToken, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        token.expires_at() - margin > self.clock.now()
    }

    /// True iff a credential is held and expires strictly after now.
    pub async fn is_authenticated(&self) -> bool {
        let guard = self.credential.lock().await;
        guard
            .as_ref()
            .is_some_and(|t| self.valid_for(t, Duration::ZERO))
    }

    /// Obtain a credential unless a fresh one is already held.
    ///
    /// Fails closed: returns `false` (without contacting the authority) when
    /// settings are incomplete, and `false` when the exchange fails. The lock
    /// is held across the exchange, so callers racing here wait for the
    /// in-flight refresh and then reuse its token.
    pub async fn authenticate(&self) -> bool {
        if !self.settings.is_configured() {
            warn!(
                missing = ?self.settings.missing_fields(),
                "authentication skipped: settings incomplete"
            );
            return false;
        }

        let mut guard = self.credential.lock().await;
        if guard
            .as_ref()
            .is_some_and(|t| self.valid_for(t, self.refresh_margin))
        {
            debug!("reusing cached credential");
            return true;
        }

        let result = retry(&self.retry, self.clock.as_ref(), "authenticate", || {
            self.transport.request_token()
        })
        .await;
        match result {
            Ok(token) if self.valid_for(&token, Duration::ZERO) => {
                info!(expires_at = %token.expires_at(), "authenticated with signing authority");
                *guard = Some(token);
                true
            }
            Ok(token) => {
                warn!(
                    expires_at = %token.expires_at(),
                    "authority issued an already-expired token"
                );
                *guard = None;
                false
            }
            Err(e) => {
                warn!(error = %e, "authentication failed");
                *guard = None;
                false
            }
        }
    }

    /// Drop the cached credential.
    pub async fn sign_out(&self) {
        *self.credential.lock().await = None;
    }

    async fn token(&self) -> Result<String, GatewayError> {
        let guard = self.credential.lock().await;
        match guard.as_ref() {
            Some(t) if self.valid_for(t, Duration::ZERO) => Ok(t.secret().to_string()),
            _ => Err(GatewayError::NotAuthenticated),
        }
    }

    /// Submit a batch. Requires a valid credential; never re-authenticates.
    pub async fn submit(&self, batch: &SubmitBatch) -> Result<String, GatewayError> {
        let token = self.token().await?;
        let remote_id = retry(&self.retry, self.clock.as_ref(), "submit", || {
            self.transport.submit(&token, batch)
        })
        .await?;
        info!(
            request_id = %batch.request_id,
            remote_id = %remote_id,
            files = batch.files.len(),
            "batch submitted"
        );
        Ok(remote_id)
    }

    /// Poll the remote status. Errors map to [`RemoteStatus::Failed`] with the cause attached.
    pub async fn poll_status(&self, remote_id: &str) -> PollOutcome {
        let result = match self.token().await {
            Ok(token) => {
                retry(&self.retry, self.clock.as_ref(), "status", || {
                    self.transport.status(&token, remote_id)
                })
                .await
            }
            Err(e) => Err(e),
        };
        match result {
            Ok(status) => {
                if let RemoteStatus::Unknown(raw) = &status {
                    warn!(
                        remote_id,
                        status = %raw,
                        "unrecognised remote status, treating as failed"
                    );
                }
                debug!(remote_id, status = ?status, "polled status");
                PollOutcome {
                    status,
                    error: None,
                }
            }
            Err(e) => {
                warn!(remote_id, error = %e, "status poll failed");
                PollOutcome {
                    status: RemoteStatus::Failed,
                    error: Some(e),
                }
            }
        }
    }

    /// Fetch one signed file; `Ok(None)` if the authority did not produce it.
    pub async fn download(
        &self,
        remote_id: &str,
        file_name: &str,
    ) -> Result<Option<Vec<u8>>, GatewayError> {
        let token = self.token().await?;
        let bytes = retry(&self.retry, self.clock.as_ref(), "download", || {
            self.transport.download(&token, remote_id, file_name)
        })
        .await?;
        debug!(
            remote_id,
            file_name,
            bytes = ?bytes.as_ref().map(|b| b.len()),
            "download finished"
        );
        Ok(bytes)
    }

    /// Ask the authority to cancel; returns whether it acknowledged.
    pub async fn cancel(&self, remote_id: &str) -> Result<bool, GatewayError> {
        let token = self.token().await?;
        retry(&self.retry, self.clock.as_ref(), "cancel", || {
            self.transport.cancel(&token, remote_id)
        })
        .await?;
        info!(remote_id, "cancellation acknowledged");
        Ok(true)
    }
}
