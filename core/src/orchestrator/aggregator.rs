//! Batch-wide totals from per-session status

use serde::{Deserialize, Serialize};

use crate::session::SessionStatus;

/// Aggregated statistics across every session of a batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchTotals {
    /// Number of sessions in the batch
    pub sessions: usize,

    /// Sessions still running
    pub running: usize,

    /// Completions recorded across all sessions
    pub total_requests: u64,

    /// Successful completions
    pub success_count: u64,

    /// Failed completions
    pub failure_count: u64,

    /// Sum of the rates currently in effect
    pub combined_rpm: u64,
}

impl BatchTotals {
    /// Success percentage (0 when nothing was recorded)
    pub fn success_rate(&self) -> f64 {
        match self.total_requests {
            0 => 0.0,
            total => self.success_count as f64 * 100.0 / total as f64,
        }
    }

    /// Whether every session reached a terminal state
    pub fn all_finished(&self) -> bool {
        self.running == 0
    }
}

/// Aggregate status from multiple sessions
pub fn aggregate_sessions(sessions: &[SessionStatus]) -> BatchTotals {
    sessions.iter().fold(
        BatchTotals {
            sessions: sessions.len(),
            ..BatchTotals::default()
        },
        |mut totals, status| {
            if status.state.is_running() {
                totals.running += 1;
                totals.combined_rpm += u64::from(status.current_rpm);
            }
            totals.total_requests += status.stats.total_requests;
            totals.success_count += status.stats.success_count;
            totals.failure_count += status.stats.failure_count;
            totals
        },
    )
}
