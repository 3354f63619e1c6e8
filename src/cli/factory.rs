//! Wiring of real HTTP clients and prompt samplers into sessions

use std::sync::Arc;
use std::time::Duration;

use genai_stress_core::{
    ComponentFactory, PromptSource, ProviderClient, SessionConfig, StressError, StressResult,
};
use genai_stress_samplers::PolicySampler;
use genai_stress_vendors::{HttpClientPool, HttpConfig, HttpProviderClient};

/// Builds an [`HttpProviderClient`] and a [`PolicySampler`] per session
#[derive(Debug, Default, Clone)]
pub struct DefaultComponentFactory {
    seed: Option<u64>,
}

impl DefaultComponentFactory {
    /// Factory with entropy-seeded prompt sampling
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed prompt sampling for reproducible prompt sequences
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }
}

impl ComponentFactory for DefaultComponentFactory {
    fn provider_client(
        &self,
        config: &SessionConfig,
        request_timeout: Duration,
    ) -> StressResult<Arc<dyn ProviderClient>> {
        let http = HttpConfig::default().with_request_timeout(request_timeout);
        let pool = HttpClientPool::new(&http)
            .map_err(|e| StressError::startup(format!("failed to build HTTP client: {e}")))?;
        Ok(Arc::new(HttpProviderClient::new(pool, config)))
    }

    fn prompt_source(&self, config: &SessionConfig) -> StressResult<Arc<dyn PromptSource>> {
        let policy = config.prompt.clone();
        let sampler = match self.seed {
            Some(seed) => PolicySampler::from_seed(policy, seed),
            None => PolicySampler::from_entropy(policy),
        };
        Ok(Arc::new(sampler))
    }
}
