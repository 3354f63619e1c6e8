//! genai-stress-core: Test execution engine for generative-AI endpoints
//!
//! This crate holds everything that decides how much load to send and when
//! to stop, independent of any vendor's wire format:
//!
//! - Session configuration, thresholds and engine defaults
//! - Bounded statistics (ring buffers, running averages, minute aggregates)
//! - The overload detector and the auto-ramp controller
//! - TestSession and SessionOrchestrator lifecycles
//! - Throttled state broadcasting to observers
//! - Collaborator traits (ProviderClient, PromptSource, HistoryStore)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broadcaster;
pub mod buffer;
pub mod channel;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod overload;
pub mod request;
pub mod response;
pub mod session;
pub mod stats;
pub mod traits;

pub use broadcaster::{BroadcastMessage, ChannelObserver, ObserverId, StateBroadcaster};
pub use buffer::{BoundedBuffer, RunningAverage};
pub use channel::ChannelConfig;
pub use config::*;
pub use error::*;
pub use metrics::*;
pub use orchestrator::{
    aggregate_sessions, BatchTotals, OrchestratorBuilder, OrchestratorStatus, SessionOrchestrator,
};
pub use overload::{OverloadDetector, Verdict};
pub use request::*;
pub use response::Outcome;
pub use session::{
    SessionId, SessionState, SessionStatus, TestSession, TestSessionBuilder,
    DURATION_REACHED_REASON, MANUAL_STOP_REASON,
};
pub use stats::*;
pub use traits::*;

#[cfg(test)]
mod integration_tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    // =========================================================================
    // Observer wire format
    // =========================================================================

    #[test]
    fn test_rate_increased_json_format() {
        let message = BroadcastMessage::RateIncreased {
            session_id: SessionId::new("b-1"),
            new_rpm: 40,
            time: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
        };
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "rateIncreased");
        assert_eq!(value["data"]["session_id"], "b-1");
        assert_eq!(value["data"]["new_rpm"], 40);
    }

    #[test]
    fn test_session_terminated_json_format() {
        let defaults = EngineDefaults::default();
        let stats = RuntimeStats::from_defaults(&defaults, Utc::now(), 60);
        let message = BroadcastMessage::SessionTerminated {
            session_id: SessionId::new("b-2"),
            state: SessionState::Failed("3 consecutive failures reached the limit of 3".into()),
            final_stats: stats.summary(),
            max_rpm: Some(80),
        };
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "sessionTerminated");
        assert_eq!(value["data"]["state"]["status"], "failed");
        assert_eq!(
            value["data"]["state"]["reason"],
            "3 consecutive failures reached the limit of 3"
        );
        assert_eq!(value["data"]["final_stats"]["total_requests"], 0);
        assert_eq!(value["data"]["max_rpm"], 80);
    }

    #[test]
    fn test_state_update_carries_sessions() {
        let message = BroadcastMessage::StateUpdate(OrchestratorStatus::default());
        let value = serde_json::to_value(&message).unwrap();

        assert_eq!(value["type"], "stateUpdate");
        assert_eq!(value["data"]["running"], false);
        assert!(value["data"]["sessions"].as_array().unwrap().is_empty());
    }

    // =========================================================================
    // Outcome and state formats
    // =========================================================================

    #[test]
    fn test_outcome_failure_json_format() {
        let outcome = Outcome::http_failure(429, "rate limited").with_latency(12.5);
        let value = serde_json::to_value(&outcome).unwrap();

        assert_eq!(value["outcome"], "failure");
        assert_eq!(value["kind"], "client_error");
        assert_eq!(value["http_status"], 429);
        assert_eq!(value["latency_ms"], 12.5);
    }

    #[test]
    fn test_idle_state_json_format() {
        let value = serde_json::to_value(SessionState::Idle).unwrap();
        assert_eq!(value["status"], "idle");
    }

    // =========================================================================
    // Config round-trip through a batch file
    // =========================================================================

    #[test]
    fn test_session_config_from_toml() {
        let toml_str = r#"
            endpoint = "https://api.openai.com"
            model = "gpt-4o-mini"
            credential = "sk-test"
            provider = "openai"
            request_mode = "single_shot"
            duration = "5m"

            [rate]
            mode = "fixed"
            rpm = 120
        "#;
        let config: SessionConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.provider, ProviderKind::OpenAI);
        assert_eq!(config.request_mode, RequestMode::SingleShot);
        assert_eq!(config.duration, Some(Duration::from_secs(300)));
        assert_eq!(config.duration_limit(), Some(Duration::from_secs(300)));
        assert!(config.validate().is_ok());
        assert!(!format!("{config:?}").contains("sk-test"));
    }
}
