//! Request cadence and auto-ramp stepping

use std::time::Duration;

use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};

use crate::config::AutoRamp;

/// How often the ramp controller is consulted
pub const RAMP_CHECK_PERIOD: Duration = Duration::from_secs(1);

/// Length of a minute aggregate window
pub const MINUTE: Duration = Duration::from_secs(60);

/// Tick period for a rate: `60s / rpm`
pub fn period_for(rpm: u32) -> Duration {
    Duration::from_micros(60_000_000 / u64::from(rpm.max(1)))
}

/// Periodic dispatch ticker whose rate can change at runtime
///
/// The first tick fires one full period after creation. Changing the rate
/// rebuilds the ticker, so phase restarts at the moment of the change.
pub struct RateScheduler {
    rpm: u32,
    interval: Interval,
}

impl RateScheduler {
    /// Ticker at `rpm` requests per minute
    pub fn new(rpm: u32) -> Self {
        Self {
            rpm,
            interval: Self::build(rpm),
        }
    }

    fn build(rpm: u32) -> Interval {
        let period = period_for(rpm);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Burst);
        interval
    }

    /// Rate in effect
    pub fn rpm(&self) -> u32 {
        self.rpm
    }

    /// Current tick period
    pub fn period(&self) -> Duration {
        self.interval.period()
    }

    /// Wait for the next dispatch slot
    pub async fn tick(&mut self) -> Instant {
        self.interval.tick().await
    }

    /// Switch to a new rate; the next tick is one new period away
    pub fn update_rate(&mut self, rpm: u32) {
        if rpm == self.rpm {
            return;
        }
        self.rpm = rpm;
        self.interval = Self::build(rpm);
    }
}

impl std::fmt::Debug for RateScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateScheduler")
            .field("rpm", &self.rpm)
            .field("period", &self.period())
            .finish()
    }
}

/// Auto-mode rate stepping
///
/// Keeps `initial_rpm <= current <= max_rpm`.
#[derive(Debug, Clone)]
pub struct RampController {
    ramp: AutoRamp,
    current: u32,
    last_step: Instant,
}

impl RampController {
    /// Start at the ramp's initial rate
    pub fn new(ramp: AutoRamp, started: Instant) -> Self {
        Self {
            current: ramp.initial_rpm.min(ramp.max_rpm),
            ramp,
            last_step: started,
        }
    }

    /// Rate in effect
    pub fn current_rpm(&self) -> u32 {
        self.current
    }

    /// Whether the ceiling is reached
    pub fn at_max(&self) -> bool {
        self.current >= self.ramp.max_rpm
    }

    /// Step if the interval elapsed; returns the new rate when it changed
    pub fn on_check(&mut self, now: Instant) -> Option<u32> {
        if now.saturating_duration_since(self.last_step) < self.ramp.step_interval {
            return None;
        }
        let next = self
            .current
            .saturating_add(self.ramp.step_rpm)
            .min(self.ramp.max_rpm);
        if next == self.current {
            return None;
        }
        self.current = next;
        self.last_step = now;
        Some(next)
    }
}
