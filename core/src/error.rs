//! Error types for genai-stress-core

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Engine-level error
///
/// Only configuration, lifecycle and startup problems surface as `StressError`.
/// Per-request failures are recorded as [`crate::Outcome::Failure`] values and
/// never leave the dispatch loop.
#[derive(Error, Debug)]
pub enum StressError {
    /// A session configuration failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Lifecycle operation attempted in the wrong state
    #[error("concurrency error: {0}")]
    Concurrency(String),

    /// A session could not acquire its collaborators
    #[error("startup error: {0}")]
    Startup(String),

    /// Required builder field was not provided
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// History store failure
    #[error("history store error: {0}")]
    History(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StressError {
    /// Builder field `field` was never set
    pub fn missing_config(field: &'static str) -> Self {
        Self::MissingConfig(field)
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a concurrency (lifecycle) error
    pub fn concurrency(msg: impl Into<String>) -> Self {
        Self::Concurrency(msg.into())
    }

    /// Create a startup error
    pub fn startup(msg: impl Into<String>) -> Self {
        Self::Startup(msg.into())
    }

    /// Create a history store error
    pub fn history(msg: impl Into<String>) -> Self {
        Self::History(msg.into())
    }
}

impl From<ConfigError> for StressError {
    fn from(err: ConfigError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type alias
pub type StressResult<T> = std::result::Result<T, StressError>;

/// Classification of a failed request attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request exceeded the HTTP deadline
    Timeout,
    /// Host name could not be resolved
    DnsFailure,
    /// Remote host refused the connection
    ConnectionRefused,
    /// HTTP 401 or 403
    Authentication,
    /// Other HTTP 4xx
    ClientError,
    /// HTTP 5xx
    ServerError,
    /// Transport failed after the stream started
    StreamError,
    /// Any other transport failure
    Transport,
}

impl ErrorKind {
    /// Network-level failure that never produced an HTTP response
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout | ErrorKind::DnsFailure | ErrorKind::ConnectionRefused
        )
    }

    /// Whether a later attempt could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::Timeout
                | ErrorKind::ConnectionRefused
                | ErrorKind::ServerError
                | ErrorKind::StreamError
                | ErrorKind::Transport
        )
    }

    /// Pick the HTTP error kind for a non-success status code
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorKind::Authentication,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::ClientError,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::DnsFailure => "dns_failure",
            ErrorKind::ConnectionRefused => "connection_refused",
            ErrorKind::Authentication => "authentication",
            ErrorKind::ClientError => "client_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::StreamError => "stream_error",
            ErrorKind::Transport => "transport",
        };
        f.write_str(label)
    }
}
