//! Normalized result of one request attempt

pub use crate::error::ErrorKind;

use serde::{Deserialize, Serialize};

/// What a [`crate::ProviderClient`] returns for one attempt
///
/// Failures are values: the dispatch loop records them and keeps going.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Endpoint answered and the text was extracted
    Success {
        /// Concatenated assistant text
        text: String,
        /// Time from request start to the end of the response
        latency_ms: f64,
        /// Time to the first streamed fragment
        #[serde(default, skip_serializing_if = "Option::is_none")]
        ttfb_ms: Option<f64>,
    },
    /// Attempt failed; classified for stats and overload decisions
    Failure {
        /// Failure class
        kind: ErrorKind,
        /// Human-readable message
        message: String,
        /// HTTP status, when a response was received
        #[serde(default, skip_serializing_if = "Option::is_none")]
        http_status: Option<u16>,
        /// Time spent before the failure was known
        #[serde(default)]
        latency_ms: f64,
    },
}

impl Outcome {
    /// Successful single-shot attempt
    pub fn success(text: impl Into<String>, latency_ms: f64) -> Self {
        Outcome::Success {
            text: text.into(),
            latency_ms,
            ttfb_ms: None,
        }
    }

    /// Successful streamed attempt
    pub fn streamed(text: impl Into<String>, latency_ms: f64, ttfb_ms: Option<f64>) -> Self {
        Outcome::Success {
            text: text.into(),
            latency_ms,
            ttfb_ms,
        }
    }

    /// Failed attempt with no HTTP response
    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Outcome::Failure {
            kind,
            message: message.into(),
            http_status: None,
            latency_ms: 0.0,
        }
    }

    /// Failed attempt carrying an HTTP status
    pub fn http_failure(status: u16, message: impl Into<String>) -> Self {
        Outcome::Failure {
            kind: ErrorKind::from_status(status),
            message: message.into(),
            http_status: Some(status),
            latency_ms: 0.0,
        }
    }

    /// Set the elapsed time on a failure; successes are unchanged
    pub fn with_latency(mut self, elapsed_ms: f64) -> Self {
        if let Outcome::Failure { latency_ms, .. } = &mut self {
            *latency_ms = elapsed_ms;
        }
        self
    }

    /// Whether the attempt succeeded
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Elapsed time of the attempt
    pub fn latency_ms(&self) -> f64 {
        match self {
            Outcome::Success { latency_ms, .. } | Outcome::Failure { latency_ms, .. } => {
                *latency_ms
            }
        }
    }

    /// Failure class, if failed
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { kind, .. } => Some(*kind),
        }
    }

    /// HTTP status of a failure
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Outcome::Success { .. } => None,
            Outcome::Failure { http_status, .. } => *http_status,
        }
    }
}
