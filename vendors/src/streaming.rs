//! Streaming response processing for the supported vendor APIs.
//!
//! All three vendors stream Server-Sent Events. They differ in where the
//! text sits inside each event and in how the stream ends: OpenAI sends a
//! `[DONE]` sentinel, Claude and Gemini just close the connection.

use std::collections::VecDeque;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use genai_stress_core::ProviderKind;
use reqwest::Client;
use serde_json::Value;

// ============================================================================
// Stream Content Extractor
// ============================================================================

/// Maximum buffer size (1MB) to prevent unbounded memory growth from malformed streams.
const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// Terminal sentinel used by OpenAI-style streams
const DONE_SENTINEL: &str = "[DONE]";

/// What one complete SSE line amounts to
#[derive(Debug, Clone, PartialEq, Eq)]
enum LineEvent {
    /// Blank, comment, keep-alive or an event without text
    Skip,
    /// `[DONE]` sentinel
    Done,
    /// Extracted text fragment
    Fragment(String),
}

/// Incremental SSE parser that yields vendor text fragments.
///
/// Bytes are buffered until a line break, so events and multi-byte
/// characters may be split across chunks at any point.
///
/// # Buffer Limits
///
/// A single unterminated line is limited to 1MB. If exceeded, the line is
/// dropped and a warning is logged.
///
/// # Example
///
/// ```rust,ignore
/// let mut extractor = StreamContentExtractor::new(ProviderKind::OpenAI);
/// let mut text = String::new();
/// for chunk in chunks {
///     text.extend(extractor.feed(&chunk));
/// }
/// text.extend(extractor.finish());
/// ```
#[derive(Debug)]
pub struct StreamContentExtractor {
    provider: ProviderKind,
    /// Bytes of the current incomplete line
    buffer: Vec<u8>,
    /// Set once `[DONE]` was seen or `finish` was called
    finished: bool,
    /// Whether the current line was dropped for exceeding the limit
    truncated: bool,
}

impl StreamContentExtractor {
    /// Create an extractor for one response of `provider`.
    pub fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            buffer: Vec::new(),
            finished: false,
            truncated: false,
        }
    }

    /// Vendor dialect being parsed
    pub fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Whether the stream has terminated. Further input is ignored.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed bytes and return the fragments of every completed line.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }

        self.buffer.extend_from_slice(bytes);

        let mut fragments = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.truncated {
                // Tail of an oversized line
                self.truncated = false;
                continue;
            }
            if self.handle_line(&line, &mut fragments) {
                self.buffer.clear();
                return fragments;
            }
        }

        if self.buffer.len() > MAX_BUFFER_SIZE {
            if !self.truncated {
                tracing::warn!(
                    provider = %self.provider,
                    "SSE line exceeded {} bytes, dropping it. This may indicate a malformed stream.",
                    MAX_BUFFER_SIZE
                );
            }
            self.truncated = true;
            self.buffer.clear();
        }

        fragments
    }

    /// Signal end of input; processes a trailing unterminated line once.
    pub fn finish(&mut self) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }

        let mut fragments = Vec::new();
        let line = std::mem::take(&mut self.buffer);
        if !self.truncated && !line.is_empty() {
            self.handle_line(&line, &mut fragments);
        }
        self.finished = true;
        fragments
    }

    /// Returns true when the line terminated the stream.
    fn handle_line(&mut self, raw: &[u8], fragments: &mut Vec<String>) -> bool {
        let line = String::from_utf8_lossy(raw);
        match parse_line(self.provider, &line) {
            LineEvent::Skip => false,
            LineEvent::Fragment(text) => {
                fragments.push(text);
                false
            }
            LineEvent::Done => {
                self.finished = true;
                true
            }
        }
    }
}

/// Interpret one complete SSE line.
fn parse_line(provider: ProviderKind, line: &str) -> LineEvent {
    let line = line.trim_end_matches(['\r', '\n']);
    if line.trim().is_empty() || line.starts_with(':') {
        return LineEvent::Skip;
    }

    let Some(payload) = line.strip_prefix("data:") else {
        // event:, id:, retry: carry nothing we extract
        return LineEvent::Skip;
    };
    let payload = payload.trim();

    if payload == DONE_SENTINEL {
        return LineEvent::Done;
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(value) => delta_text(provider, &value)
            .filter(|text| !text.is_empty())
            .map(|text| LineEvent::Fragment(text.to_string()))
            .unwrap_or(LineEvent::Skip),
        Err(_) => {
            tracing::trace!(provider = %provider, "Skipping non-JSON SSE payload");
            LineEvent::Skip
        }
    }
}

// ============================================================================
// JSON Response Parsing Helpers
// ============================================================================

/// Text carried by one streamed event.
///
/// - OpenAI: `choices[0].delta.content`
/// - Claude: `delta.text`
/// - Gemini: `candidates[0].content.parts[0].text`
pub fn delta_text(provider: ProviderKind, value: &Value) -> Option<&str> {
    let text = match provider {
        ProviderKind::OpenAI => value.pointer("/choices/0/delta/content"),
        ProviderKind::Claude => value.pointer("/delta/text"),
        ProviderKind::Gemini => value.pointer("/candidates/0/content/parts/0/text"),
    };
    text.and_then(Value::as_str)
}

/// Text of a complete (non-streamed) response body; empty when absent.
///
/// - OpenAI: `choices[0].message.content`
/// - Claude: `content[0].text`
/// - Gemini: `candidates[0].content.parts[0].text`
pub fn single_shot_text(provider: ProviderKind, value: &Value) -> String {
    let text = match provider {
        ProviderKind::OpenAI => value.pointer("/choices/0/message/content"),
        ProviderKind::Claude => value.pointer("/content/0/text"),
        ProviderKind::Gemini => value.pointer("/candidates/0/content/parts/0/text"),
    };
    text.and_then(Value::as_str).unwrap_or_default().to_string()
}

// ============================================================================
// Fragment Stream
// ============================================================================

struct FragmentState<E> {
    body: Pin<Box<dyn Stream<Item = Result<Bytes, E>> + Send>>,
    extractor: StreamContentExtractor,
    pending: VecDeque<String>,
    done: bool,
}

/// Lazily turn a response body into text fragments.
///
/// The stream ends at `[DONE]` (the rest of the body is not read) or at the
/// end of the body. A transport error is yielded once and ends the stream.
pub fn fragments<S, E>(provider: ProviderKind, body: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let state = FragmentState {
        body: Box::pin(body),
        extractor: StreamContentExtractor::new(provider),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.pending.pop_front() {
                return Some((Ok(fragment), state));
            }
            if state.done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(chunk)) => {
                    state.pending.extend(state.extractor.feed(&chunk));
                    state.done = state.extractor.is_finished();
                }
                Some(Err(e)) => {
                    state.done = true;
                    state.pending.clear();
                    return Some((Err(e), state));
                }
                None => {
                    state.pending.extend(state.extractor.finish());
                    state.done = true;
                }
            }
        }
    })
}

// ============================================================================
// HTTP Client Pool
// ============================================================================

/// Configuration for the HTTP client pool.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Idle connection timeout
    pub pool_idle_timeout: Duration,

    /// Maximum idle connections per host
    pub pool_max_idle_per_host: usize,

    /// Request timeout
    pub request_timeout: Duration,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// TCP keepalive interval
    pub tcp_keepalive: Option<Duration>,

    /// User agent string
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
            request_timeout: genai_stress_core::DEFAULT_REQUEST_TIMEOUT,
            connect_timeout: Duration::from_secs(30),
            tcp_keepalive: Some(Duration::from_secs(60)),
            user_agent: format!("genai-stress/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    /// Create config with custom request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Create config with custom connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Shared HTTP client with connection pooling.
///
/// Sessions against the same host reuse idle connections, which keeps
/// connection setup out of the measured latency at high rates.
#[derive(Debug, Clone)]
pub struct HttpClientPool {
    /// The underlying reqwest client
    client: Client,

    /// Configuration used to create this pool
    config: HttpConfig,
}

impl HttpClientPool {
    /// Create a new HTTP client pool with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &HttpConfig) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(&config.user_agent);

        if let Some(keepalive) = config.tcp_keepalive {
            builder = builder.tcp_keepalive(keepalive);
        }

        let client = builder.build()?;

        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    /// Get a reference to the underlying HTTP client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Get the configuration for this pool.
    pub fn config(&self) -> &HttpConfig {
        &self.config
    }
}

// ============================================================================
// Tests
// ============================================================================
