//! Scenario tests for the session module

use super::*;
use crate::broadcaster::{ChannelObserver, StateBroadcaster};
use crate::config::{AutoRamp, OverloadThresholds, RateMode, SessionConfig, Threshold};
use crate::error::{StressError, StressResult};
use crate::metrics::{HistoryId, RunSummary};
use crate::request::ProviderKind;
use crate::response::Outcome;
use crate::traits::{ComponentFactory, HistoryStore, PromptSource, ProviderClient, StaticPrompt};
use crate::RequestMode;

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// Mock ProviderClient
// ============================================================================

struct MockClient {
    delay: Duration,
    fail_every: Option<usize>,
    calls: AtomicUsize,
}

impl MockClient {
    fn new() -> Self {
        Self {
            delay: Duration::from_millis(10),
            fail_every: None,
            calls: AtomicUsize::new(0),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn with_fail_every(mut self, n: usize) -> Self {
        self.fail_every = Some(n);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for MockClient {
    fn provider(&self) -> ProviderKind {
        ProviderKind::OpenAI
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn request_mode(&self) -> RequestMode {
        RequestMode::Streaming
    }

    async fn send(&self, _prompt: &str) -> Outcome {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        let latency_ms = self.delay.as_secs_f64() * 1000.0;
        match self.fail_every {
            Some(k) if n % k == 0 => {
                Outcome::http_failure(503, "service unavailable").with_latency(latency_ms)
            }
            _ => Outcome::streamed("pong", latency_ms, Some(1.0)),
        }
    }
}

// ============================================================================
// Mock HistoryStore and ComponentFactory
// ============================================================================

#[derive(Default)]
struct MockHistory {
    saved: Mutex<Vec<RunSummary>>,
}

impl MockHistory {
    fn saved(&self) -> Vec<RunSummary> {
        self.saved.lock().clone()
    }
}

#[async_trait]
impl HistoryStore for MockHistory {
    async fn save(&self, summary: RunSummary) -> StressResult<HistoryId> {
        let mut saved = self.saved.lock();
        saved.push(summary);
        Ok(HistoryId(saved.len() as u64))
    }
}

struct BrokenFactory;

impl ComponentFactory for BrokenFactory {
    fn provider_client(
        &self,
        _config: &SessionConfig,
        _request_timeout: Duration,
    ) -> StressResult<Arc<dyn ProviderClient>> {
        Err(StressError::startup("TLS backend unavailable"))
    }

    fn prompt_source(&self, _config: &SessionConfig) -> StressResult<Arc<dyn PromptSource>> {
        Ok(Arc::new(StaticPrompt("ping".into())))
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn fixed_config(rpm: u32) -> SessionConfig {
    SessionConfig::new(
        "http://127.0.0.1:9",
        "mock-model",
        "test-key",
        ProviderKind::OpenAI,
        RateMode::Fixed { rpm },
    )
    .with_thresholds(OverloadThresholds::disabled())
}

fn auto_config(ramp: AutoRamp, thresholds: OverloadThresholds) -> SessionConfig {
    SessionConfig::new(
        "http://127.0.0.1:9",
        "mock-model",
        "test-key",
        ProviderKind::OpenAI,
        RateMode::Auto { ramp: Some(ramp) },
    )
    .with_thresholds(thresholds)
}

fn build_session(
    config: SessionConfig,
    client: Arc<MockClient>,
) -> (TestSession, Arc<MockHistory>) {
    let history = Arc::new(MockHistory::default());
    let session = TestSessionBuilder::new(SessionId::new("test-1"))
        .config(config)
        .client(client)
        .prompts(Arc::new(StaticPrompt("ping".into())))
        .history(history.clone())
        .build()
        .unwrap();
    (session, history)
}

// ============================================================================
// Dispatch cadence
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_fixed_rate_issues_nominal_requests() {
    let client = Arc::new(MockClient::new());
    let (session, _history) = build_session(fixed_config(60), client.clone());

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(5_050)).await;

    let status = session.status();
    assert_eq!(status.state, SessionState::Running);
    assert!(
        (4..=6).contains(&status.stats.total_requests),
        "total = {}",
        status.stats.total_requests
    );
    assert_eq!(status.stats.failure_count, 0);
    assert_eq!(
        status.stats.total_requests,
        status.stats.success_count + status.stats.failure_count
    );

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_slow_responses_overlap_without_backpressure() {
    let client = Arc::new(MockClient::new().with_delay(Duration::from_secs(3)));
    let (session, _history) = build_session(fixed_config(120), client.clone());

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_100)).await;

    // Ticks every 500ms while each attempt takes 3s.
    assert_eq!(client.calls(), 4);
    assert_eq!(session.status().stats.total_requests, 0);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_auto_ramp_stops_at_max() {
    let broadcaster = StateBroadcaster::spawn(Duration::from_millis(200));
    let (observer, mut rx) = ChannelObserver::new("ramp");
    broadcaster.subscribe(Arc::new(observer));

    let ramp = AutoRamp::new(10, 10, Duration::from_secs(1), 30);
    let history = Arc::new(MockHistory::default());
    let session = TestSessionBuilder::new(SessionId::new("ramp-1"))
        .config(auto_config(ramp, OverloadThresholds::disabled()))
        .client(Arc::new(MockClient::new()))
        .prompts(Arc::new(StaticPrompt("ping".into())))
        .history(history)
        .broadcaster(broadcaster)
        .build()
        .unwrap();

    session.start().await.unwrap();
    assert_eq!(session.current_rpm(), 10);

    tokio::time::sleep(Duration::from_millis(3_500)).await;
    assert_eq!(session.current_rpm(), 30);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let status = session.status();
    assert_eq!(status.current_rpm, 30);
    assert_eq!(status.peak_rpm, 30);

    let mut increases = Vec::new();
    while let Ok(payload) = rx.try_recv() {
        let value: serde_json::Value = serde_json::from_str(&payload).unwrap();
        if value["type"] == "rateIncreased" {
            increases.push(value["data"]["new_rpm"].as_u64().unwrap());
        }
    }
    assert_eq!(increases, vec![20, 30]);

    session.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_minute_aggregate_rolls_over() {
    let (session, _history) = build_session(fixed_config(60), Arc::new(MockClient::new()));

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(61_500)).await;

    let stats = session.status().stats;
    assert_eq!(stats.completed_minutes, 1);
    assert!(stats.current_minute.total() <= 2);

    session.stop().await.unwrap();
}

// ============================================================================
// Terminal transitions
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_overload_fails_session_and_saves_history() {
    let thresholds = OverloadThresholds {
        max_consecutive_failures: Threshold::Enabled(3),
        ..OverloadThresholds::disabled()
    };
    let ramp = AutoRamp::new(60, 10, Duration::from_secs(60), 120);
    let client = Arc::new(MockClient::new().with_fail_every(1));
    let history = Arc::new(MockHistory::default());
    let session = TestSessionBuilder::new(SessionId::new("overload-1"))
        .config(auto_config(ramp, thresholds))
        .client(client)
        .prompts(Arc::new(StaticPrompt("ping".into())))
        .history(history.clone())
        .build()
        .unwrap();

    session.start().await.unwrap();
    session.wait().await;

    match session.state() {
        SessionState::Failed(reason) => assert!(reason.contains("consecutive failures")),
        other => panic!("expected Failed, got {other:?}"),
    }

    let saved = history.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].failure_count, 3);
    assert_eq!(saved[0].max_rpm, Some(60));
    assert_eq!(saved[0].error_tally.get("service unavailable"), Some(&3));
    assert_eq!(session.history_id(), Some(HistoryId(1)));

    assert!(session.stop().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_duration_limit_completes_session() {
    let (session, history) = build_session(
        fixed_config(60).with_duration(Duration::from_secs(3)),
        Arc::new(MockClient::new()),
    );
    let started = Instant::now();

    session.start().await.unwrap();
    session.wait().await;

    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(
        session.state(),
        SessionState::Completed(DURATION_REACHED_REASON.to_string())
    );
    let saved = history.saved();
    assert_eq!(saved.len(), 1);
    assert!((2..=3).contains(&saved[0].total_requests));
    assert_eq!(saved[0].stop_reason, DURATION_REACHED_REASON);
}

#[tokio::test(start_paused = true)]
async fn test_stop_discards_in_flight_results() {
    let client = Arc::new(MockClient::new().with_delay(Duration::from_secs(5)));
    let (session, history) = build_session(fixed_config(60), client.clone());

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(2_500)).await;
    session.stop().await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(client.calls(), 2);
    assert_eq!(
        session.state(),
        SessionState::Stopped(MANUAL_STOP_REASON.to_string())
    );
    assert_eq!(session.status().stats.total_requests, 0);
    assert!(session.request_log().is_empty());

    let saved = history.saved();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].total_requests, 0);
}

#[tokio::test(start_paused = true)]
async fn test_no_requests_after_stop() {
    let client = Arc::new(MockClient::new());
    let (session, _history) = build_session(fixed_config(600), client.clone());

    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    session.stop().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let calls = client.calls();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(client.calls(), calls);
}

// ============================================================================
// Rejected operations and startup
// ============================================================================

#[tokio::test]
async fn test_lifecycle_rejections() {
    let (session, _history) = build_session(fixed_config(60), Arc::new(MockClient::new()));

    assert!(matches!(
        session.stop().await,
        Err(StressError::Concurrency(_))
    ));

    session.start().await.unwrap();
    assert!(matches!(
        session.start().await,
        Err(StressError::Concurrency(_))
    ));

    session.stop().await.unwrap();
    assert!(matches!(
        session.stop().await,
        Err(StressError::Concurrency(_))
    ));
    assert!(matches!(
        session.start().await,
        Err(StressError::Concurrency(_))
    ));
}

#[tokio::test]
async fn test_invalid_config_stays_idle() {
    let mut config = fixed_config(60);
    config.model.clear();
    let (session, history) = build_session(config, Arc::new(MockClient::new()));

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, StressError::Validation(_)));
    assert!(err.to_string().contains("model"));
    assert_eq!(session.state(), SessionState::Idle);
    assert!(history.saved().is_empty());
}

#[tokio::test]
async fn test_factory_failure_fails_session() {
    let history = Arc::new(MockHistory::default());
    let session = TestSessionBuilder::new(SessionId::new("broken-1"))
        .config(fixed_config(60))
        .factory(Arc::new(BrokenFactory))
        .history(history.clone())
        .build()
        .unwrap();

    let err = session.start().await.unwrap_err();
    assert!(matches!(err, StressError::Startup(_)));

    match session.state() {
        SessionState::Failed(reason) => assert!(reason.contains("TLS backend unavailable")),
        other => panic!("expected Failed, got {other:?}"),
    }
    assert_eq!(history.saved().len(), 1);
    session.wait().await;
}

#[test]
fn test_builder_requires_client_without_factory() {
    let result = TestSessionBuilder::new(SessionId::new("x"))
        .config(fixed_config(60))
        .prompts(Arc::new(StaticPrompt("ping".into())))
        .build();
    assert!(matches!(result, Err(StressError::MissingConfig("client"))));

    let result = TestSessionBuilder::new(SessionId::new("x")).build();
    assert!(matches!(result, Err(StressError::MissingConfig("config"))));
}

#[tokio::test]
async fn test_status_before_start() {
    let (session, _history) = build_session(fixed_config(42), Arc::new(MockClient::new()));
    let status = session.status();
    assert_eq!(status.id.as_str(), "test-1");
    assert_eq!(status.state, SessionState::Idle);
    assert_eq!(status.current_rpm, 42);
    assert_eq!(status.config.rate_mode, "fixed");
    assert!(status.started_at.is_none());
}
