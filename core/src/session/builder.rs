//! Builder pattern for TestSession construction

use std::sync::Arc;

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::broadcaster::StateBroadcaster;
use crate::config::{EngineDefaults, SessionConfig};
use crate::error::{StressError, StressResult};
use crate::traits::{ComponentFactory, HistoryStore, PromptSource, ProviderClient};

use super::executor::{Components, TestSession};
use super::state::SessionId;

/// Builder for creating TestSession instances
///
/// A session needs a config plus either a ready client and prompt source or
/// a [`ComponentFactory`] that builds them at start.
///
/// # Example
/// ```ignore
/// let session = TestSessionBuilder::new(SessionId::new("smoke-1"))
///     .config(config)
///     .client(client)
///     .prompts(Arc::new(StaticPrompt("ping".into())))
///     .history(store)
///     .build()?;
///
/// session.start().await?;
/// session.wait().await;
/// ```
pub struct TestSessionBuilder {
    id: SessionId,
    batch_id: Option<Uuid>,
    config: Option<SessionConfig>,
    defaults: Option<Arc<EngineDefaults>>,
    client: Option<Arc<dyn ProviderClient>>,
    prompts: Option<Arc<dyn PromptSource>>,
    factory: Option<Arc<dyn ComponentFactory>>,
    history: Option<Arc<dyn HistoryStore>>,
    broadcaster: Option<StateBroadcaster>,
    terminal_tx: Option<mpsc::UnboundedSender<SessionId>>,
}

impl TestSessionBuilder {
    /// Create a new builder with the given session ID
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            batch_id: None,
            config: None,
            defaults: None,
            client: None,
            prompts: None,
            factory: None,
            history: None,
            broadcaster: None,
            terminal_tx: None,
        }
    }

    /// Set the session configuration
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the engine defaults (otherwise `EngineDefaults::default()`)
    pub fn defaults(mut self, defaults: Arc<EngineDefaults>) -> Self {
        self.defaults = Some(defaults);
        self
    }

    /// Set the batch this session belongs to
    pub fn batch_id(mut self, batch_id: Uuid) -> Self {
        self.batch_id = Some(batch_id);
        self
    }

    /// Set a ready provider client
    pub fn client(mut self, client: Arc<dyn ProviderClient>) -> Self {
        self.client = Some(client);
        self
    }

    /// Set a ready prompt source
    pub fn prompts(mut self, prompts: Arc<dyn PromptSource>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    /// Build missing collaborators with this factory at start
    pub fn factory(mut self, factory: Arc<dyn ComponentFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Persist the run summary here on termination
    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Publish events through this broadcaster
    pub fn broadcaster(mut self, broadcaster: StateBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Send the session id here after every terminal transition
    pub fn on_terminal(mut self, tx: mpsc::UnboundedSender<SessionId>) -> Self {
        self.terminal_tx = Some(tx);
        self
    }

    /// Build the TestSession
    ///
    /// # Errors
    /// Returns an error if the config is missing, or if neither a client
    /// (resp. prompt source) nor a factory was provided.
    pub fn build(self) -> StressResult<TestSession> {
        let config = self.config.ok_or(StressError::missing_config("config"))?;
        if self.factory.is_none() {
            if self.client.is_none() {
                return Err(StressError::missing_config("client"));
            }
            if self.prompts.is_none() {
                return Err(StressError::missing_config("prompts"));
            }
        }

        let components = Components {
            client: self.client,
            prompts: self.prompts,
            factory: self.factory,
        };

        Ok(TestSession::new(
            self.id,
            self.batch_id,
            config,
            self.defaults.unwrap_or_default(),
            components,
            self.history,
            self.broadcaster,
            self.terminal_tx,
        ))
    }
}
