use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use trustsign_core::ErrorKind;
use trustsign_store::StoreError;
use trustsign_sync::GatewayError;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("no files selected for signing")]
    NoSelection,

    #[error("signing settings incomplete, missing: {}", .0.join(", "))]
    Configuration(Vec<&'static str>),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("signing timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("a scan of {0} is already running")]
    Busy(PathBuf),

    #[error("signed file not produced by the signing authority: {0}")]
    SignedFileMissing(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("background task failed: {0}")]
    Task(String),
}

impl SignError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSelection => ErrorKind::InvalidInput,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Auth(_) => ErrorKind::Auth,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Busy(_) => ErrorKind::Busy,
            Self::SignedFileMissing(_) => ErrorKind::NotFound,
            Self::Store(e) => e.kind(),
            Self::Gateway(e) => e.kind(),
            Self::Task(_) => ErrorKind::Io,
        }
    }
}
