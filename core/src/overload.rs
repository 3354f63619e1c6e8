//! Overload detection for auto-ramp sessions

use serde::{Deserialize, Serialize};

use crate::config::{OverloadThresholds, RateMode};
use crate::stats::{RuntimeStats, MIN_SAMPLES};

/// Detector decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "reason", rename_all = "snake_case")]
pub enum Verdict {
    /// Keep dispatching
    Continue,
    /// End the session with this reason
    Stop(String),
}

impl Verdict {
    /// Whether the session must stop
    pub fn is_stop(&self) -> bool {
        matches!(self, Verdict::Stop(_))
    }
}

/// Decides whether an endpoint keeps up with the current rate
///
/// Pure: the verdict depends only on the arguments. Fixed-rate sessions are
/// never judged; their end is decided by the duration timer or a manual stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverloadDetector;

impl OverloadDetector {
    /// Evaluate the checks in order; the first match wins
    pub fn evaluate(stats: &RuntimeStats, thresholds: &OverloadThresholds, mode: &RateMode) -> Verdict {
        if !mode.is_auto() {
            return Verdict::Continue;
        }

        let minute = stats.current_minute();
        if let Some(floor) = thresholds.success_rate_floor.value() {
            let rate = minute.success_rate();
            if minute.total() >= MIN_SAMPLES && rate < floor {
                return Verdict::Stop(format!(
                    "minute success rate {rate:.1}% fell below {floor}%"
                ));
            }
        }

        if let Some(limit) = thresholds.max_consecutive_failures.value() {
            let failures = stats.consecutive_failures();
            if failures >= limit {
                return Verdict::Stop(format!(
                    "{failures} consecutive failures reached the limit of {limit}"
                ));
            }
        }

        if let Some(ceiling) = thresholds.response_time_ceiling_ms.value() {
            let average = stats.average_latency_ms();
            if stats.latency_samples() >= MIN_SAMPLES && average > ceiling as f64 {
                return Verdict::Stop(format!(
                    "average response time {average:.0}ms exceeded {ceiling}ms"
                ));
            }
        }

        Verdict::Continue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EngineDefaults, Threshold};
    use crate::error::ErrorKind;
    use crate::request::ProviderKind;
    use crate::response::Outcome;
    use crate::stats::RecordContext;
    use chrono::Utc;

    const AUTO: RateMode = RateMode::Auto { ramp: None };

    fn ctx() -> RecordContext<'static> {
        RecordContext {
            model: "m",
            provider: ProviderKind::Gemini,
            rpm: 10,
        }
    }

    fn stats_with(successes: usize, failures: usize, latency_ms: f64) -> RuntimeStats {
        let mut stats = RuntimeStats::from_defaults(&EngineDefaults::default(), Utc::now(), 10);
        let now = Utc::now();
        for _ in 0..successes {
            stats.apply(&Outcome::success("ok", latency_ms), ctx(), now);
        }
        for _ in 0..failures {
            stats.apply(&Outcome::failure(ErrorKind::Timeout, "request timed out"), ctx(), now);
        }
        stats
    }

    fn only_consecutive(limit: u32) -> OverloadThresholds {
        OverloadThresholds {
            max_consecutive_failures: Threshold::Enabled(limit),
            ..OverloadThresholds::disabled()
        }
    }

    #[test]
    fn test_fixed_mode_never_stops() {
        let stats = stats_with(0, 50, 0.0);
        let verdict = OverloadDetector::evaluate(
            &stats,
            &OverloadThresholds::default(),
            &RateMode::Fixed { rpm: 60 },
        );
        assert_eq!(verdict, Verdict::Continue);
    }

    #[test]
    fn test_disabled_thresholds_never_stop() {
        let stats = stats_with(10, 500, 1_000_000.0);
        let verdict = OverloadDetector::evaluate(&stats, &OverloadThresholds::disabled(), &AUTO);
        assert_eq!(verdict, Verdict::Continue);
    }

    #[test]
    fn test_consecutive_failures_boundary() {
        for limit in 1..8u32 {
            for failures in 0..10usize {
                let stats = stats_with(1, failures, 5.0);
                let verdict = OverloadDetector::evaluate(&stats, &only_consecutive(limit), &AUTO);
                if failures as u32 >= limit {
                    match verdict {
                        Verdict::Stop(reason) => assert!(reason.contains("consecutive failures")),
                        Verdict::Continue => panic!("expected stop at {failures}/{limit}"),
                    }
                } else {
                    assert_eq!(verdict, Verdict::Continue);
                }
            }
        }
    }

    #[test]
    fn test_zero_limit_is_a_value_not_disabled() {
        let stats = stats_with(1, 0, 5.0);
        let verdict = OverloadDetector::evaluate(&stats, &only_consecutive(0), &AUTO);
        assert!(verdict.is_stop());
    }

    #[test]
    fn test_minute_success_rate_needs_ten_samples() {
        let thresholds = OverloadThresholds {
            success_rate_floor: Threshold::Enabled(80.0),
            ..OverloadThresholds::disabled()
        };

        let stats = stats_with(4, 5, 5.0);
        assert_eq!(
            OverloadDetector::evaluate(&stats, &thresholds, &AUTO),
            Verdict::Continue
        );

        let stats = stats_with(5, 5, 5.0);
        match OverloadDetector::evaluate(&stats, &thresholds, &AUTO) {
            Verdict::Stop(reason) => assert!(reason.contains("minute success rate")),
            Verdict::Continue => panic!("expected stop"),
        }
    }

    #[test]
    fn test_success_rate_checked_before_consecutive() {
        let stats = stats_with(0, 20, 5.0);
        match OverloadDetector::evaluate(&stats, &OverloadThresholds::default(), &AUTO) {
            Verdict::Stop(reason) => assert!(reason.contains("minute success rate")),
            Verdict::Continue => panic!("expected stop"),
        }
    }

    #[test]
    fn test_average_latency_ceiling() {
        let thresholds = OverloadThresholds {
            response_time_ceiling_ms: Threshold::Enabled(1000),
            ..OverloadThresholds::disabled()
        };

        let stats = stats_with(9, 0, 5000.0);
        assert_eq!(
            OverloadDetector::evaluate(&stats, &thresholds, &AUTO),
            Verdict::Continue
        );

        let stats = stats_with(10, 0, 5000.0);
        match OverloadDetector::evaluate(&stats, &thresholds, &AUTO) {
            Verdict::Stop(reason) => assert!(reason.contains("average response time")),
            Verdict::Continue => panic!("expected stop"),
        }

        let stats = stats_with(10, 0, 1000.0);
        assert_eq!(
            OverloadDetector::evaluate(&stats, &thresholds, &AUTO),
            Verdict::Continue
        );
    }
}
