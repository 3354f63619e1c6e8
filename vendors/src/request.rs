//! Vendor-specific request construction

use genai_stress_core::{ProviderKind, RequestMode};
use reqwest::Url;
use serde_json::{json, Value};

/// Claude requires an explicit output limit
pub const CLAUDE_MAX_TOKENS: u32 = 4096;

/// Value of the `anthropic-version` header
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// A fully built POST request, independent of the HTTP client
#[derive(Debug, Clone, PartialEq)]
pub struct VendorRequest {
    /// Target URL including any query parameters
    pub url: Url,
    /// Extra headers beyond `content-type`
    pub headers: Vec<(&'static str, String)>,
    /// JSON body
    pub body: Value,
}

/// Endpoint coordinates shared by every request of a session
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    /// Vendor dialect
    pub provider: ProviderKind,
    /// Streaming or single-shot
    pub mode: RequestMode,
    /// Base URL; a trailing `/` is ignored
    pub endpoint: &'a str,
    /// Model identifier
    pub model: &'a str,
    /// API credential
    pub credential: &'a str,
}

/// Build the request for one prompt.
///
/// # Errors
///
/// Returns an error if the endpoint does not form a valid URL.
pub fn build_request(target: Target<'_>, prompt: &str) -> Result<VendorRequest, url::ParseError> {
    let base = target.endpoint.trim_end_matches('/');
    let stream = target.mode.is_streaming();

    match target.provider {
        ProviderKind::Gemini => {
            let method = if stream {
                "streamGenerateContent"
            } else {
                "generateContent"
            };
            let address = format!("{base}/v1beta/models/{}:{method}", target.model);
            let mut params = vec![("key", target.credential)];
            if stream {
                params.push(("alt", "sse"));
            }
            Ok(VendorRequest {
                url: Url::parse_with_params(&address, &params)?,
                headers: Vec::new(),
                body: json!({
                    "contents": [{"role": "user", "parts": [{"text": prompt}]}]
                }),
            })
        }
        ProviderKind::OpenAI => Ok(VendorRequest {
            url: Url::parse(&format!("{base}/v1/chat/completions"))?,
            headers: vec![("authorization", format!("Bearer {}", target.credential))],
            body: json!({
                "model": target.model,
                "messages": [{"role": "user", "content": prompt}],
                "stream": stream,
            }),
        }),
        ProviderKind::Claude => Ok(VendorRequest {
            url: Url::parse(&format!("{base}/v1/messages"))?,
            headers: vec![
                ("x-api-key", target.credential.to_string()),
                ("anthropic-version", ANTHROPIC_VERSION.to_string()),
            ],
            body: json!({
                "model": target.model,
                "max_tokens": CLAUDE_MAX_TOKENS,
                "messages": [{"role": "user", "content": prompt}],
                "stream": stream,
            }),
        }),
    }
}
