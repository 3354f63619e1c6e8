//! Per-session runtime statistics with bounded memory

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::buffer::{BoundedBuffer, RunningAverage};
use crate::config::{BufferCapacities, EngineDefaults};
use crate::error::ErrorKind;
use crate::metrics::{LatencyHistogram, LatencyPercentiles};
use crate::request::ProviderKind;
use crate::response::Outcome;

/// Minimum samples before a minute or latency window is judged
pub const MIN_SAMPLES: u64 = 10;

/// Tally key for failures once the distinct-key cap is reached
pub const OTHER_ERRORS_KEY: &str = "(other errors)";

/// Rolled-up counts for one 60-second window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinuteAggregate {
    /// Window start
    pub started_at: DateTime<Utc>,
    /// Successful completions in the window
    pub success_count: u64,
    /// Failed completions in the window
    pub failure_count: u64,
    /// Rate active when the window closed
    pub rpm: u32,
}

impl MinuteAggregate {
    /// Open an empty window
    pub fn open(started_at: DateTime<Utc>, rpm: u32) -> Self {
        Self {
            started_at,
            success_count: 0,
            failure_count: 0,
            rpm,
        }
    }

    /// Completions in the window
    pub fn total(&self) -> u64 {
        self.success_count + self.failure_count
    }

    /// Success percentage; an empty window counts as 100
    pub fn success_rate(&self) -> f64 {
        match self.total() {
            0 => 100.0,
            total => self.success_count as f64 * 100.0 / total as f64,
        }
    }
}

/// One entry of the error log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// When the failure was recorded
    pub time: DateTime<Utc>,
    /// Failure class
    pub kind: ErrorKind,
    /// Full message
    pub message: String,
    /// HTTP status if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
}

/// Completion status in the request log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Attempt succeeded
    Success,
    /// Attempt failed
    Failure,
}

/// One entry of the request log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLogEntry {
    /// Completion time
    pub time: DateTime<Utc>,
    /// Success or failure
    pub status: RequestStatus,
    /// Attempt latency
    pub latency_ms: f64,
    /// Time to first fragment (streaming)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttfb_ms: Option<f64>,
    /// HTTP status of a failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    /// Failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Model under test
    pub model: String,
    /// Vendor dialect
    pub provider: ProviderKind,
    /// Rate the request was issued at
    pub rpm: u32,
}

/// Context attached to every recorded completion
#[derive(Debug, Clone, Copy)]
pub struct RecordContext<'a> {
    /// Model under test
    pub model: &'a str,
    /// Vendor dialect
    pub provider: ProviderKind,
    /// Rate the request was issued at
    pub rpm: u32,
}

/// Statistics owned by one session
///
/// Mutated only from the session driver, so no internal locking.
/// `total_requests == success_count + failure_count` holds after every call.
#[derive(Debug)]
pub struct RuntimeStats {
    total_requests: u64,
    success_count: u64,
    failure_count: u64,
    consecutive_failures: u32,
    error_tally: HashMap<String, u64>,
    error_tally_cap: usize,
    error_key_length: usize,
    latencies: RunningAverage,
    latency_histogram: LatencyHistogram,
    errors: BoundedBuffer<ErrorRecord>,
    requests: BoundedBuffer<RequestLogEntry>,
    minutes: BoundedBuffer<MinuteAggregate>,
    current_minute: MinuteAggregate,
}

impl RuntimeStats {
    /// Empty stats with the given capacities
    pub fn new(
        capacities: BufferCapacities,
        error_key_length: usize,
        now: DateTime<Utc>,
        rpm: u32,
    ) -> Self {
        Self {
            total_requests: 0,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            error_tally: HashMap::new(),
            error_tally_cap: capacities.error_tally.max(1),
            error_key_length: error_key_length.max(1),
            latencies: RunningAverage::new(capacities.latencies),
            latency_histogram: LatencyHistogram::new(),
            errors: BoundedBuffer::new(capacities.error_log),
            requests: BoundedBuffer::new(capacities.request_log),
            minutes: BoundedBuffer::new(capacities.minute_aggregates),
            current_minute: MinuteAggregate::open(now, rpm),
        }
    }

    /// Empty stats sized from engine defaults
    pub fn from_defaults(defaults: &EngineDefaults, now: DateTime<Utc>, rpm: u32) -> Self {
        Self::new(defaults.capacities, defaults.error_key_length, now, rpm)
    }

    /// Record one completion and return its request log entry
    pub fn apply(
        &mut self,
        outcome: &Outcome,
        ctx: RecordContext<'_>,
        now: DateTime<Utc>,
    ) -> RequestLogEntry {
        self.total_requests += 1;

        let entry = match outcome {
            Outcome::Success {
                latency_ms,
                ttfb_ms,
                ..
            } => {
                self.success_count += 1;
                self.consecutive_failures = 0;
                self.current_minute.success_count += 1;
                self.latencies.push(*latency_ms);
                self.latency_histogram.record_ms(*latency_ms);

                RequestLogEntry {
                    time: now,
                    status: RequestStatus::Success,
                    latency_ms: *latency_ms,
                    ttfb_ms: *ttfb_ms,
                    http_status: None,
                    error: None,
                    model: ctx.model.to_string(),
                    provider: ctx.provider,
                    rpm: ctx.rpm,
                }
            }
            Outcome::Failure {
                kind,
                message,
                http_status,
                latency_ms,
            } => {
                self.failure_count += 1;
                self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                self.current_minute.failure_count += 1;

                let mut key: String = message.chars().take(self.error_key_length).collect();
                if !self.error_tally.contains_key(&key)
                    && self.error_tally.len() >= self.error_tally_cap
                {
                    key = OTHER_ERRORS_KEY.to_string();
                }
                *self.error_tally.entry(key).or_insert(0) += 1;

                self.errors.push(ErrorRecord {
                    time: now,
                    kind: *kind,
                    message: message.clone(),
                    http_status: *http_status,
                });

                RequestLogEntry {
                    time: now,
                    status: RequestStatus::Failure,
                    latency_ms: *latency_ms,
                    ttfb_ms: None,
                    http_status: *http_status,
                    error: Some(message.clone()),
                    model: ctx.model.to_string(),
                    provider: ctx.provider,
                    rpm: ctx.rpm,
                }
            }
        };

        self.requests.push(entry.clone());
        entry
    }

    /// Close the current minute and open a fresh one
    ///
    /// Returns the closed aggregate.
    pub fn roll_minute(&mut self, now: DateTime<Utc>, rpm: u32) -> MinuteAggregate {
        let mut closed = std::mem::replace(&mut self.current_minute, MinuteAggregate::open(now, rpm));
        closed.rpm = rpm;
        self.minutes.push(closed.clone());
        closed
    }

    /// Completions recorded
    pub fn total_requests(&self) -> u64 {
        self.total_requests
    }

    /// Successful completions
    pub fn success_count(&self) -> u64 {
        self.success_count
    }

    /// Failed completions
    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// Failures since the last success
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whole-run success percentage, zero before any completion
    pub fn success_rate(&self) -> f64 {
        match self.total_requests {
            0 => 0.0,
            total => self.success_count as f64 * 100.0 / total as f64,
        }
    }

    /// Latency samples in the running window
    pub fn latency_samples(&self) -> u64 {
        self.latencies.count() as u64
    }

    /// Mean latency over the running window
    pub fn average_latency_ms(&self) -> f64 {
        self.latencies.average()
    }

    /// In-progress minute
    pub fn current_minute(&self) -> &MinuteAggregate {
        &self.current_minute
    }

    /// Closed minutes, oldest first
    pub fn minute_aggregates(&self) -> Vec<MinuteAggregate> {
        self.minutes.snapshot()
    }

    /// Closed minutes plus the current one when it saw any completion
    pub fn minute_history(&self) -> Vec<MinuteAggregate> {
        let mut minutes = self.minutes.snapshot();
        if self.current_minute.total() > 0 {
            minutes.push(self.current_minute.clone());
        }
        minutes
    }

    /// Request log, oldest first
    pub fn request_log(&self) -> Vec<RequestLogEntry> {
        self.requests.snapshot()
    }

    /// Error log, oldest first
    pub fn error_log(&self) -> Vec<ErrorRecord> {
        self.errors.snapshot()
    }

    /// Failure counts keyed by truncated message, sorted by key
    pub fn error_tally(&self) -> BTreeMap<String, u64> {
        self.error_tally
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }

    /// Percentiles over every successful latency in the run
    pub fn latency_percentiles(&self) -> LatencyPercentiles {
        self.latency_histogram.percentiles()
    }

    /// Compact view for status and broadcasts
    pub fn summary(&self) -> StatsSummary {
        StatsSummary {
            total_requests: self.total_requests,
            success_count: self.success_count,
            failure_count: self.failure_count,
            consecutive_failures: self.consecutive_failures,
            success_rate: self.success_rate(),
            avg_latency_ms: self.average_latency_ms(),
            recent_latency: LatencyPercentiles::from_values(&self.latencies.snapshot()),
            latency: self.latency_percentiles(),
            current_minute: self.current_minute.clone(),
            completed_minutes: self.minutes.count(),
        }
    }
}

/// Point-in-time view of [`RuntimeStats`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSummary {
    /// Completions recorded
    pub total_requests: u64,
    /// Successful completions
    pub success_count: u64,
    /// Failed completions
    pub failure_count: u64,
    /// Failures since the last success
    pub consecutive_failures: u32,
    /// Whole-run success percentage
    pub success_rate: f64,
    /// Mean over the running latency window
    pub avg_latency_ms: f64,
    /// Percentiles over the running latency window
    pub recent_latency: LatencyPercentiles,
    /// Percentiles over the whole run
    pub latency: LatencyPercentiles,
    /// In-progress minute
    pub current_minute: MinuteAggregate,
    /// Closed minutes retained
    pub completed_minutes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(rpm: u32) -> RecordContext<'static> {
        RecordContext {
            model: "gpt-4o-mini",
            provider: ProviderKind::OpenAI,
            rpm,
        }
    }

    fn stats() -> RuntimeStats {
        RuntimeStats::from_defaults(&EngineDefaults::default(), Utc::now(), 60)
    }

    #[test]
    fn test_totals_stay_consistent() {
        let mut stats = stats();
        let now = Utc::now();
        stats.apply(&Outcome::success("a", 10.0), ctx(60), now);
        stats.apply(&Outcome::http_failure(500, "boom"), ctx(60), now);
        stats.apply(&Outcome::success("b", 30.0), ctx(60), now);

        assert_eq!(stats.total_requests(), 3);
        assert_eq!(
            stats.total_requests(),
            stats.success_count() + stats.failure_count()
        );
        assert_eq!(stats.latency_samples(), 2);
        assert_eq!(stats.average_latency_ms(), 20.0);
    }

    #[test]
    fn test_success_resets_consecutive_failures() {
        let mut stats = stats();
        let now = Utc::now();
        for _ in 0..3 {
            stats.apply(&Outcome::failure(ErrorKind::Timeout, "request timed out"), ctx(60), now);
        }
        assert_eq!(stats.consecutive_failures(), 3);
        stats.apply(&Outcome::success("ok", 5.0), ctx(60), now);
        assert_eq!(stats.consecutive_failures(), 0);
    }

    #[test]
    fn test_error_tally_keys_truncated() {
        let mut stats = RuntimeStats::new(BufferCapacities::default(), 5, Utc::now(), 60);
        let now = Utc::now();
        stats.apply(&Outcome::http_failure(500, "héllo world"), ctx(60), now);
        stats.apply(&Outcome::http_failure(500, "héllo there"), ctx(60), now);

        let tally = stats.error_tally();
        assert_eq!(tally.len(), 1);
        assert_eq!(tally.get("héllo"), Some(&2));
        assert_eq!(stats.error_log()[0].message, "héllo world");
    }

    #[test]
    fn test_error_tally_folds_overflow_keys() {
        let capacities = BufferCapacities {
            error_tally: 3,
            ..BufferCapacities::default()
        };
        let mut stats = RuntimeStats::new(capacities, 100, Utc::now(), 60);
        let now = Utc::now();
        for i in 0..10 {
            let message = format!("upstream error, request id req-{i}");
            stats.apply(&Outcome::http_failure(502, message), ctx(60), now);
        }
        let repeat = Outcome::http_failure(502, "upstream error, request id req-0");
        stats.apply(&repeat, ctx(60), now);

        let tally = stats.error_tally();
        // three distinct keys plus the overflow bucket
        assert_eq!(tally.len(), 4);
        assert_eq!(tally.get("upstream error, request id req-0"), Some(&2));
        assert_eq!(tally.get(OTHER_ERRORS_KEY), Some(&7));
        assert_eq!(tally.values().sum::<u64>(), stats.failure_count());
    }

    #[test]
    fn test_logs_are_bounded() {
        let capacities = BufferCapacities {
            latencies: 4,
            error_log: 2,
            request_log: 3,
            minute_aggregates: 2,
            error_tally: 50,
        };
        let mut stats = RuntimeStats::new(capacities, 100, Utc::now(), 60);
        let now = Utc::now();
        for i in 0..10 {
            stats.apply(&Outcome::success("ok", i as f64), ctx(60), now);
            stats.apply(&Outcome::http_failure(429, format!("e{i}")), ctx(60), now);
        }
        for _ in 0..5 {
            stats.roll_minute(now, 60);
        }

        assert_eq!(stats.request_log().len(), 3);
        assert_eq!(stats.error_log().len(), 2);
        assert_eq!(stats.error_log()[1].message, "e9");
        assert_eq!(stats.latency_samples(), 4);
        assert_eq!(stats.minute_aggregates().len(), 2);
        assert_eq!(stats.total_requests(), 20);
    }

    #[test]
    fn test_roll_minute_opens_fresh_window() {
        let mut stats = stats();
        let now = Utc::now();
        stats.apply(&Outcome::success("ok", 1.0), ctx(60), now);
        stats.apply(&Outcome::http_failure(500, "x"), ctx(60), now);

        let closed = stats.roll_minute(now, 120);
        assert_eq!(closed.total(), 2);
        assert_eq!(closed.success_rate(), 50.0);
        assert_eq!(closed.rpm, 120);
        assert_eq!(stats.current_minute().total(), 0);
        assert_eq!(stats.current_minute().success_rate(), 100.0);
        assert_eq!(stats.minute_aggregates().len(), 1);
    }

    #[test]
    fn test_minute_history_includes_partial_minute() {
        let mut stats = stats();
        assert!(stats.minute_history().is_empty());
        stats.apply(&Outcome::success("ok", 1.0), ctx(60), Utc::now());
        assert_eq!(stats.minute_history().len(), 1);
    }

    #[test]
    fn test_request_log_entry_fields() {
        let mut stats = stats();
        let entry = stats.apply(
            &Outcome::http_failure(401, "invalid credential").with_latency(42.0),
            ctx(30),
            Utc::now(),
        );
        assert_eq!(entry.status, RequestStatus::Failure);
        assert_eq!(entry.http_status, Some(401));
        assert_eq!(entry.latency_ms, 42.0);
        assert_eq!(entry.rpm, 30);
        assert_eq!(entry.model, "gpt-4o-mini");
    }

    #[test]
    fn test_summary_percentiles() {
        let mut stats = stats();
        let now = Utc::now();
        for ms in [10.0, 20.0, 30.0, 40.0] {
            stats.apply(&Outcome::success("ok", ms), ctx(60), now);
        }
        let summary = stats.summary();
        assert_eq!(summary.success_rate, 100.0);
        assert_eq!(summary.avg_latency_ms, 25.0);
        assert_eq!(summary.recent_latency.max, 40.0);
        assert!((summary.latency.max - 40.0).abs() < 0.1);
    }
}
