//! Crate-level error type.
//!
//! Every variant carries only owned strings and integers so that errors can
//! be cloned into [`StatusChanged`](crate::controller::StatusChanged) events
//! and compared in tests.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TunnelError>;

/// Errors surfaced by the tunnel controller and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TunnelError {
    /// The supplied settings cannot start a tunnel (no provider, port 0, ...).
    #[error("invalid tunnel configuration: {0}")]
    InvalidConfig(String),

    /// The backend could not be reached (connect failure, timeout, reset).
    #[error("tunnel backend unreachable at {url}: {detail}")]
    BackendUnreachable { url: String, detail: String },

    /// The backend answered but reported failure.
    #[error(
        "tunnel backend error (HTTP {status}): {}",
        .message.as_deref().unwrap_or("request was not successful")
    )]
    Backend { status: u16, message: Option<String> },

    /// The backend answered with a payload that does not match the contract.
    #[error("malformed backend response: {0}")]
    Malformed(String),

    /// Another start/stop/refresh is already in flight, or the tunnel is
    /// already up.
    #[error("another tunnel operation is already in progress")]
    Busy,

    /// The active poll session ran out of attempts before a URL appeared.
    #[error("no public tunnel URL after {attempts} status checks")]
    Timeout { attempts: u32 },

    /// The settings file could not be read or written.
    #[error("settings storage error: {0}")]
    Settings(String),
}

/// Fieldless discriminant of [`TunnelError`], handy for matching and exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConfig,
    BackendUnreachable,
    Backend,
    Malformed,
    Busy,
    Timeout,
    Settings,
}

impl TunnelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TunnelError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            TunnelError::BackendUnreachable { .. } => ErrorKind::BackendUnreachable,
            TunnelError::Backend { .. } => ErrorKind::Backend,
            TunnelError::Malformed(_) => ErrorKind::Malformed,
            TunnelError::Busy => ErrorKind::Busy,
            TunnelError::Timeout { .. } => ErrorKind::Timeout,
            TunnelError::Settings(_) => ErrorKind::Settings,
        }
    }

    /// Whether a poll tick that failed with this error should simply be
    /// retried on the next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::BackendUnreachable | ErrorKind::Backend | ErrorKind::Malformed
        )
    }
}

impl From<std::io::Error> for TunnelError {
    fn from(e: std::io::Error) -> Self {
        TunnelError::Settings(e.to_string())
    }
}

impl From<toml::de::Error> for TunnelError {
    fn from(e: toml::de::Error) -> Self {
        TunnelError::Settings(e.to_string())
    }
}

impl From<toml::ser::Error> for TunnelError {
    fn from(e: toml::ser::Error) -> Self {
        TunnelError::Settings(e.to_string())
    }
}
