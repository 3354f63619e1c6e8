//! Session identity, lifecycle state and status views

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigSummary;
use crate::stats::StatsSummary;

/// Session identifier, `{batch}-{index}` under an orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Wrap an identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session lifecycle
///
/// `Idle -> Running -> {Stopped, Completed, Failed}`; terminal states are
/// final and carry the reason the session ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// Dispatching requests
    Running,
    /// Stopped on request
    Stopped(String),
    /// Duration limit reached
    Completed(String),
    /// Overload detected or startup failed
    Failed(String),
}

impl SessionState {
    /// Whether the session is dispatching
    pub fn is_running(&self) -> bool {
        matches!(self, SessionState::Running)
    }

    /// Whether the state is final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Stopped(_) | SessionState::Completed(_) | SessionState::Failed(_)
        )
    }

    /// Reason carried by a terminal state
    pub fn reason(&self) -> Option<&str> {
        match self {
            SessionState::Stopped(r) | SessionState::Completed(r) | SessionState::Failed(r) => {
                Some(r)
            }
            SessionState::Idle | SessionState::Running => None,
        }
    }

    /// Short label for logs and errors
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopped(_) => "stopped",
            SessionState::Completed(_) => "completed",
            SessionState::Failed(_) => "failed",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.reason() {
            Some(reason) => write!(f, "{} ({reason})", self.label()),
            None => f.write_str(self.label()),
        }
    }
}

/// Point-in-time status of one session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session identifier
    pub id: SessionId,
    /// Config echo without the credential
    pub config: ConfigSummary,
    /// Lifecycle state
    pub state: SessionState,
    /// Rate in effect
    pub current_rpm: u32,
    /// Highest rate reached so far
    pub peak_rpm: u32,
    /// Statistics summary
    pub stats: StatsSummary,
    /// Start time, once started
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// Terminal transition time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_carry_reason() {
        let state = SessionState::Failed("3 consecutive failures".into());
        assert!(state.is_terminal());
        assert!(!state.is_running());
        assert_eq!(state.reason(), Some("3 consecutive failures"));
        assert_eq!(state.to_string(), "failed (3 consecutive failures)");

        assert!(!SessionState::Idle.is_terminal());
        assert_eq!(SessionState::Running.reason(), None);
    }

    #[test]
    fn test_state_serde_shape() {
        let json = serde_json::to_value(SessionState::Completed("test duration reached".into()))
            .unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["reason"], "test duration reached");

        let json = serde_json::to_value(SessionState::Idle).unwrap();
        assert_eq!(json["status"], "idle");
    }
}
