//! Collaborator traits for the execution engine
//!
//! These traits are defined here (in core) and implemented by the vendors,
//! samplers and storage crates, keeping every dependency pointed at core.

use std::sync::Arc;

use async_trait::async_trait;

use crate::broadcaster::BroadcastMessage;
use crate::config::SessionConfig;
use crate::error::StressResult;
use crate::metrics::{HistoryId, RunSummary};
use crate::request::{ProviderKind, RequestMode};
use crate::response::Outcome;

/// Sends one request attempt to an endpoint
///
/// `send` never fails: every problem is folded into [`Outcome::Failure`].
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Vendor dialect
    fn provider(&self) -> ProviderKind;

    /// Model identifier
    fn model(&self) -> &str;

    /// Streaming or single-shot
    fn request_mode(&self) -> RequestMode;

    /// Issue one attempt with the given prompt
    async fn send(&self, prompt: &str) -> Outcome;
}

/// Supplies the prompt for each dispatched request
pub trait PromptSource: Send + Sync {
    /// Next prompt text
    fn next_prompt(&self) -> String;
}

/// Persists the frozen summary of finished sessions
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Store a summary, returning its identifier
    async fn save(&self, summary: RunSummary) -> StressResult<HistoryId>;
}

/// Builds per-session collaborators from a config
///
/// Failures here become session startup failures.
pub trait ComponentFactory: Send + Sync {
    /// Client honouring `config` with the given per-request deadline
    fn provider_client(
        &self,
        config: &SessionConfig,
        request_timeout: std::time::Duration,
    ) -> StressResult<Arc<dyn ProviderClient>>;

    /// Prompt source for `config`'s prompt policy
    fn prompt_source(&self, config: &SessionConfig) -> StressResult<Arc<dyn PromptSource>>;
}

/// Why an observer rejected a message
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Receiving side is gone
    #[error("observer closed")]
    Closed,

    /// Observer-specific failure
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// External consumer of broadcast messages
pub trait Observer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Deliver one serialized message
    fn deliver(&self, payload: &str) -> Result<(), DeliveryError>;
}

/// Produces the live state serialized on each coalesced flush
pub trait StateSource: Send + Sync {
    /// Current state message
    fn current_state(&self) -> BroadcastMessage;
}

/// Prompt source that always returns the same text
#[derive(Debug, Clone)]
pub struct StaticPrompt(pub String);

impl PromptSource for StaticPrompt {
    fn next_prompt(&self) -> String {
        self.0.clone()
    }
}
