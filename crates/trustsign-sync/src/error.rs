use thiserror::Error;
use trustsign_core::ErrorKind;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[cfg(feature = "http")]
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("credential rejected by signing authority ({status})")]
    Unauthorized { status: u16 },
    #[error("not authenticated: call authenticate() first")]
    NotAuthenticated,
    #[error("signing settings incomplete, missing: {}", .0.join(", "))]
    NotConfigured(Vec<&'static str>),
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("cannot read {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GatewayError {
    /// Worth retrying: connection/timeout failures, 408, 429 and 5xx.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(feature = "http")]
            Self::Http(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| is_transient_status(s.as_u16()))
            }
            Self::Server { status, .. } => is_transient_status(*status),
            _ => false,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized { .. } | Self::NotAuthenticated => ErrorKind::Auth,
            Self::NotConfigured(_) | Self::InvalidUrl { .. } => ErrorKind::Configuration,
            Self::Io { .. } => ErrorKind::Io,
            Self::Server { status: 404, .. } => ErrorKind::NotFound,
            _ => ErrorKind::Transport,
        }
    }
}

fn is_transient_status(status: u16) -> bool {
    status == 408 || status == 429 || (500..600).contains(&status)
}
