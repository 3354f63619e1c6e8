//! Failure classification for request attempts
//!
//! The classifiers here take plain values (status, reason phrase, body text,
//! transport failure class) so they can be tested without a network.

use std::error::Error as StdError;

use genai_stress_core::{ErrorKind, Outcome};
use serde_json::Value;

/// Message used for every 401/403 regardless of the body
pub const AUTH_FAILURE_MESSAGE: &str = "invalid credential or insufficient permission";

/// Message for a request that exceeded its deadline
pub const TIMEOUT_MESSAGE: &str = "request timed out";

/// Message for a host name that did not resolve
pub const DNS_FAILURE_MESSAGE: &str = "DNS resolution failed";

/// Message for a refused TCP connection
pub const CONNECTION_REFUSED_MESSAGE: &str = "connection refused";

/// Transport-level failure class, derived from a client error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    /// Deadline exceeded
    Timeout,
    /// Name resolution failed
    Dns,
    /// Peer refused the connection
    ConnectionRefused,
    /// Anything else; reported with its raw text
    Other,
}

/// Outcome for a transport failure with no HTTP response.
pub fn classify_transport(failure: TransportFailure, raw: &str) -> Outcome {
    match failure {
        TransportFailure::Timeout => Outcome::failure(ErrorKind::Timeout, TIMEOUT_MESSAGE),
        TransportFailure::Dns => Outcome::failure(ErrorKind::DnsFailure, DNS_FAILURE_MESSAGE),
        TransportFailure::ConnectionRefused => {
            Outcome::failure(ErrorKind::ConnectionRefused, CONNECTION_REFUSED_MESSAGE)
        }
        TransportFailure::Other => Outcome::failure(ErrorKind::Transport, raw),
    }
}

/// Outcome for a non-2xx HTTP response.
pub fn classify_http(status: u16, status_text: &str, body: &str) -> Outcome {
    Outcome::http_failure(status, http_error_message(status, status_text, body))
}

/// Human message for a non-2xx response; never empty.
///
/// 401 and 403 always map to [`AUTH_FAILURE_MESSAGE`]. Otherwise the first
/// present of `error.message`, `message`, `error`, `detail`, `msg`, then the
/// body's first field, then `HTTP <status>: <statusText>`.
pub fn http_error_message(status: u16, status_text: &str, body: &str) -> String {
    if status == 401 || status == 403 {
        return AUTH_FAILURE_MESSAGE.to_string();
    }

    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| extract_error_message(&value))
        .unwrap_or_else(|| format!("HTTP {status}: {status_text}"))
}

/// Message from a JSON error body, by first-match priority.
pub fn extract_error_message(body: &Value) -> Option<String> {
    let object = body.as_object()?;

    let known = [
        body.pointer("/error/message"),
        object.get("message"),
        object.get("error"),
        object.get("detail"),
        object.get("msg"),
    ];

    known
        .into_iter()
        .flatten()
        .find_map(message_text)
        .or_else(|| object.values().next().and_then(message_text))
}

fn message_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        other => Some(other.to_string()),
    }
}

/// Failure class of a client error, walking its source chain.
pub fn transport_failure_of(err: &reqwest::Error) -> TransportFailure {
    if err.is_timeout() {
        return TransportFailure::Timeout;
    }

    let mut source: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            match io.kind() {
                std::io::ErrorKind::ConnectionRefused => return TransportFailure::ConnectionRefused,
                std::io::ErrorKind::TimedOut => return TransportFailure::Timeout,
                _ => {}
            }
        }
        let text = cause.to_string().to_ascii_lowercase();
        if text.contains("dns error") || text.contains("failed to lookup address") {
            return TransportFailure::Dns;
        }
        if text.contains("connection refused") {
            return TransportFailure::ConnectionRefused;
        }
        source = cause.source();
    }

    TransportFailure::Other
}

/// Client error text with the URL query removed and the root cause appended.
///
/// The Gemini API key rides in the query string.
pub fn describe_error(err: &reqwest::Error) -> String {
    let mut text = err.to_string();
    if let Some(url) = err.url() {
        let mut bare = url.clone();
        bare.set_query(None);
        bare.set_fragment(None);
        text = text.replace(url.as_str(), bare.as_str());
    }

    if let Some(root) = root_cause(err) {
        let root = root.to_string();
        if !root.is_empty() && !text.contains(&root) {
            text = format!("{text}: {root}");
        }
    }
    text
}

fn root_cause<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a (dyn StdError + 'static)> {
    let mut cause = err.source()?;
    while let Some(next) = cause.source() {
        cause = next;
    }
    Some(cause)
}

/// Outcome for a client error raised before any response arrived.
pub fn classify_transport_error(err: &reqwest::Error) -> Outcome {
    classify_transport(transport_failure_of(err), &describe_error(err))
}

/// Outcome for a client error raised while reading a streamed body.
///
/// Whatever text arrived so far is discarded.
pub fn classify_stream_error(err: &reqwest::Error) -> Outcome {
    match transport_failure_of(err) {
        TransportFailure::Timeout => classify_transport(TransportFailure::Timeout, ""),
        _ => Outcome::failure(
            ErrorKind::StreamError,
            format!("stream interrupted: {}", describe_error(err)),
        ),
    }
}
