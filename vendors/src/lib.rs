//! Vendor client implementations for the supported GenAI providers
//!
//! This crate provides the HTTP implementation of the `ProviderClient`
//! trait for:
//!
//! - Google Gemini
//! - OpenAI chat completions
//! - Anthropic Claude messages
//!
//! Request construction, SSE extraction and failure classification are
//! separate, network-free modules so they can be tested in isolation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod client;
pub mod request;
pub mod streaming;

pub use classify::{
    classify_http, classify_stream_error, classify_transport, classify_transport_error,
    describe_error, extract_error_message, http_error_message, TransportFailure,
    AUTH_FAILURE_MESSAGE,
};
pub use client::HttpProviderClient;
pub use request::{build_request, Target, VendorRequest};
pub use streaming::{
    delta_text, fragments, single_shot_text, HttpClientPool, HttpConfig, StreamContentExtractor,
};
