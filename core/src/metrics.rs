//! Latency metrics and the per-session run summary

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ConfigSummary;
use crate::session::{SessionId, SessionState};
use crate::stats::{MinuteAggregate, RuntimeStats};

/// Identifier assigned by a [`crate::HistoryStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HistoryId(pub u64);

impl std::fmt::Display for HistoryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Frozen record of one finished session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Session identifier
    pub session_id: SessionId,
    /// Batch the session belonged to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<Uuid>,
    /// Session start
    pub started_at: DateTime<Utc>,
    /// Terminal transition time
    pub ended_at: DateTime<Utc>,
    /// `ended_at - started_at`
    pub duration_ms: u64,
    /// Config echo without the credential
    pub config: ConfigSummary,
    /// Rate in effect at the end
    pub target_rpm: u32,
    /// Highest rate reached (auto mode)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rpm: Option<u32>,
    /// Completions recorded
    pub total_requests: u64,
    /// Successful completions
    pub success_count: u64,
    /// Failed completions
    pub failure_count: u64,
    /// Whole-run success percentage
    pub success_rate: f64,
    /// Mean over the running latency window
    pub avg_latency_ms: f64,
    /// Whole-run latency percentiles
    pub latency: LatencyPercentiles,
    /// Terminal state
    pub final_state: SessionState,
    /// Why the session ended
    pub stop_reason: String,
    /// Minute aggregates, including the partial last minute
    pub minute_aggregates: Vec<MinuteAggregate>,
    /// Failure counts by truncated message
    pub error_tally: BTreeMap<String, u64>,
}

impl RunSummary {
    /// Freeze `stats` into a summary
    #[allow(clippy::too_many_arguments)]
    pub fn from_stats(
        session_id: SessionId,
        batch_id: Option<Uuid>,
        config: ConfigSummary,
        stats: &RuntimeStats,
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
        target_rpm: u32,
        max_rpm: Option<u32>,
        final_state: SessionState,
    ) -> Self {
        let duration_ms = (ended_at - started_at).num_milliseconds().max(0) as u64;
        Self {
            session_id,
            batch_id,
            started_at,
            ended_at,
            duration_ms,
            config,
            target_rpm,
            max_rpm,
            total_requests: stats.total_requests(),
            success_count: stats.success_count(),
            failure_count: stats.failure_count(),
            success_rate: stats.success_rate(),
            avg_latency_ms: stats.average_latency_ms(),
            latency: stats.latency_percentiles(),
            stop_reason: final_state.reason().unwrap_or_default().to_string(),
            final_state,
            minute_aggregates: stats.minute_history(),
            error_tally: stats.error_tally(),
        }
    }
}

/// Latency percentiles (all values in milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LatencyPercentiles {
    /// Minimum value
    pub min: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Maximum value
    pub max: f64,
    /// Mean value
    pub mean: f64,
}

impl LatencyPercentiles {
    /// Calculate percentiles from a slice of values
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut sorted: Vec<f64> = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let len = sorted.len();
        Self {
            min: sorted[0],
            p50: percentile(&sorted, 0.50),
            p90: percentile(&sorted, 0.90),
            p95: percentile(&sorted, 0.95),
            p99: percentile(&sorted, 0.99),
            max: sorted[len - 1],
            mean: sorted.iter().sum::<f64>() / len as f64,
        }
    }
}

/// Percentile of sorted values using linear interpolation
fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let idx = p * (len - 1) as f64;
            let lower = idx.floor() as usize;
            let upper = idx.ceil() as usize;
            let frac = idx - lower as f64;

            if upper >= len {
                sorted[len - 1]
            } else {
                sorted[lower] * (1.0 - frac) + sorted[upper] * frac
            }
        }
    }
}

/// Whole-run latency distribution in constant memory
///
/// Microsecond resolution, values saturate at one hour.
pub struct LatencyHistogram {
    histogram: Option<hdrhistogram::Histogram<u64>>,
}

impl LatencyHistogram {
    /// Create an empty histogram
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, 3_600_000_000, 3).ok();
        if histogram.is_none() {
            tracing::warn!("Latency histogram unavailable, percentiles will be zero");
        }
        Self { histogram }
    }

    /// Record a value in milliseconds
    pub fn record_ms(&mut self, ms: f64) {
        if let Some(histogram) = self.histogram.as_mut() {
            let micros = (ms * 1000.0).max(1.0) as u64;
            histogram.saturating_record(micros);
        }
    }

    /// Number of recorded values
    pub fn len(&self) -> u64 {
        self.histogram.as_ref().map_or(0, |h| h.len())
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Percentiles over everything recorded
    pub fn percentiles(&self) -> LatencyPercentiles {
        let Some(histogram) = self.histogram.as_ref().filter(|h| !h.is_empty()) else {
            return LatencyPercentiles::default();
        };

        LatencyPercentiles {
            min: histogram.min() as f64 / 1000.0,
            p50: histogram.value_at_quantile(0.50) as f64 / 1000.0,
            p90: histogram.value_at_quantile(0.90) as f64 / 1000.0,
            p95: histogram.value_at_quantile(0.95) as f64 / 1000.0,
            p99: histogram.value_at_quantile(0.99) as f64 / 1000.0,
            max: histogram.max() as f64 / 1000.0,
            mean: histogram.mean() / 1000.0,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LatencyHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyHistogram")
            .field("len", &self.len())
            .finish()
    }
}
