use serde::Serialize;

/// Error category shared by every layer, so callers can render by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Settings incomplete; the network was not contacted.
    Configuration,
    /// Authentication rejected or credential expired.
    Auth,
    /// Local path or remote artifact missing.
    NotFound,
    /// Filesystem read/write/backup failure.
    Io,
    /// Remote call failed.
    Transport,
    /// Poll loop exceeded its budget.
    Timeout,
    /// Operation already in flight for the same target.
    Busy,
    /// Nothing to act on, e.g. an empty selection.
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Auth => "auth",
            Self::NotFound => "not-found",
            Self::Io => "io",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Busy => "busy",
            Self::InvalidInput => "invalid-input",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
