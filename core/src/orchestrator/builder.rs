//! Builder pattern for SessionOrchestrator construction

use std::sync::Arc;

use crate::broadcaster::StateBroadcaster;
use crate::config::EngineDefaults;
use crate::error::{StressError, StressResult};
use crate::traits::{ComponentFactory, HistoryStore};

use super::executor::SessionOrchestrator;

/// Builder for creating a SessionOrchestrator with proper configuration
///
/// # Example
///
/// ```ignore
/// let orchestrator = OrchestratorBuilder::new()
///     .defaults(defaults)
///     .factory(Arc::new(DefaultComponentFactory::new()))
///     .history(Arc::new(InMemoryHistoryStore::new()))
///     .build()?;
///
/// orchestrator.start(configs).await?;
/// orchestrator.wait_idle().await;
/// ```
pub struct OrchestratorBuilder {
    defaults: EngineDefaults,
    factory: Option<Arc<dyn ComponentFactory>>,
    history: Option<Arc<dyn HistoryStore>>,
    broadcaster: Option<StateBroadcaster>,
}

impl OrchestratorBuilder {
    /// Create a new orchestrator builder with default configuration
    pub fn new() -> Self {
        Self {
            defaults: EngineDefaults::default(),
            factory: None,
            history: None,
            broadcaster: None,
        }
    }

    /// Set the engine defaults
    pub fn defaults(mut self, defaults: EngineDefaults) -> Self {
        self.defaults = defaults;
        self
    }

    /// Set the factory that builds each session's client and prompt source
    pub fn factory(mut self, factory: Arc<dyn ComponentFactory>) -> Self {
        self.factory = Some(factory);
        self
    }

    /// Set the history store
    pub fn history(mut self, history: Arc<dyn HistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    /// Use an existing broadcaster instead of spawning one
    pub fn broadcaster(mut self, broadcaster: StateBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    /// Build the orchestrator
    ///
    /// Spawns a broadcaster when none was given, so this must run inside a
    /// tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the factory is not set, or if the defaults fail
    /// validation.
    pub fn build(self) -> StressResult<SessionOrchestrator> {
        let factory = self
            .factory
            .ok_or_else(|| StressError::missing_config("factory"))?;

        self.defaults.validate()?;

        let broadcaster = self
            .broadcaster
            .unwrap_or_else(|| StateBroadcaster::spawn(self.defaults.broadcast_throttle));

        Ok(SessionOrchestrator::new(
            Arc::new(self.defaults),
            factory,
            self.history,
            broadcaster,
        ))
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
