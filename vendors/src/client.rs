//! HTTP provider client for Gemini, OpenAI and Claude

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use genai_stress_core::{ErrorKind, Outcome, ProviderClient, ProviderKind, RequestMode, SessionConfig};
use reqwest::Response;

use crate::classify::{classify_http, classify_stream_error, classify_transport_error};
use crate::request::{build_request, Target};
use crate::streaming::{fragments, single_shot_text, HttpClientPool, HttpConfig};

/// [`ProviderClient`] over a pooled reqwest client
///
/// Every failure is folded into [`Outcome::Failure`]; `send` never errors.
#[derive(Debug, Clone)]
pub struct HttpProviderClient {
    pool: HttpClientPool,
    provider: ProviderKind,
    mode: RequestMode,
    endpoint: String,
    model: String,
    credential: String,
}

impl HttpProviderClient {
    /// Client for `config` sharing an existing pool
    pub fn new(pool: HttpClientPool, config: &SessionConfig) -> Self {
        Self {
            pool,
            provider: config.provider,
            mode: config.request_mode,
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            credential: config.credential.clone(),
        }
    }

    /// Client for `config` with its own pool and per-request deadline
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn from_config(
        config: &SessionConfig,
        request_timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let http = HttpConfig::default().with_request_timeout(request_timeout);
        Ok(Self::new(HttpClientPool::new(&http)?, config))
    }

    fn target(&self) -> Target<'_> {
        Target {
            provider: self.provider,
            mode: self.mode,
            endpoint: &self.endpoint,
            model: &self.model,
            credential: &self.credential,
        }
    }

    async fn attempt(&self, prompt: &str, started: Instant) -> Outcome {
        let request = match build_request(self.target(), prompt) {
            Ok(request) => request,
            Err(e) => return Outcome::failure(ErrorKind::Transport, format!("invalid endpoint: {e}")),
        };

        let mut builder = self.pool.client().post(request.url).json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(*name, value);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => return classify_transport_error(&e),
        };

        let status = response.status();
        if !status.is_success() {
            let reason = status.canonical_reason().unwrap_or("Unknown");
            let body = response.text().await.unwrap_or_default();
            return classify_http(status.as_u16(), reason, &body);
        }

        match self.mode {
            RequestMode::Streaming => self.read_stream(response, started).await,
            RequestMode::SingleShot => self.read_body(response, started).await,
        }
    }

    async fn read_body(&self, response: Response, started: Instant) -> Outcome {
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return classify_transport_error(&e),
        };
        let text = match serde_json::from_slice::<serde_json::Value>(&bytes) {
            Ok(value) => single_shot_text(self.provider, &value),
            Err(_) => {
                tracing::debug!(provider = %self.provider, "Non-JSON success body");
                String::new()
            }
        };
        Outcome::success(text, elapsed_ms(started))
    }

    async fn read_stream(&self, response: Response, started: Instant) -> Outcome {
        let stream = fragments(self.provider, response.bytes_stream());
        tokio::pin!(stream);

        let mut text = String::new();
        let mut ttfb_ms = None;
        while let Some(fragment) = stream.next().await {
            match fragment {
                Ok(fragment) => {
                    ttfb_ms.get_or_insert_with(|| elapsed_ms(started));
                    text.push_str(&fragment);
                }
                Err(e) => return classify_stream_error(&e),
            }
        }

        Outcome::streamed(text, elapsed_ms(started), ttfb_ms)
    }
}

#[async_trait]
impl ProviderClient for HttpProviderClient {
    fn provider(&self) -> ProviderKind {
        self.provider
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn request_mode(&self) -> RequestMode {
        self.mode
    }

    async fn send(&self, prompt: &str) -> Outcome {
        let started = Instant::now();
        let outcome = redact(self.attempt(prompt, started).await, &self.credential);

        if let Outcome::Failure { kind, message, http_status, .. } = &outcome {
            tracing::debug!(
                provider = %self.provider,
                model = %self.model,
                kind = %kind,
                status = ?http_status,
                error = %message,
                "Request attempt failed"
            );
        }
        outcome.with_latency(elapsed_ms(started))
    }
}

/// Mask the credential wherever a failure message echoes it.
fn redact(outcome: Outcome, credential: &str) -> Outcome {
    match outcome {
        Outcome::Failure {
            kind,
            message,
            http_status,
            latency_ms,
        } if !credential.is_empty() && message.contains(credential) => Outcome::Failure {
            kind,
            message: message.replace(credential, "<redacted>"),
            http_status,
            latency_ms,
        },
        other => other,
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
