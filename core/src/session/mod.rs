//! Test sessions: the unit of "one running test"
//!
//! A [`TestSession`] owns one endpoint's run from start to a terminal state:
//!
//! 1. A [`RateScheduler`] ticks every `60s / rpm` and fires one request per
//!    tick without waiting for the previous one
//! 2. Completions flow back over a channel to a single driver task, which
//!    applies them to [`crate::RuntimeStats`] and consults the
//!    [`crate::OverloadDetector`]
//! 3. In auto mode a [`RampController`] raises the rate every step interval
//! 4. Every minute the in-progress aggregate is closed
//! 5. On a terminal transition the stats are frozen into a
//!    [`crate::RunSummary`] and handed to the history store
//!
//! # Example
//!
//! ```ignore
//! use genai_stress_core::session::{SessionId, TestSessionBuilder};
//!
//! let session = TestSessionBuilder::new(SessionId::new("session-1"))
//!     .config(config)
//!     .factory(factory)
//!     .history(store)
//!     .build()?;
//!
//! session.start().await?;
//! session.wait().await;
//! println!("{}", session.state());
//! ```

mod builder;
mod executor;
mod scheduler;
mod state;

pub use builder::TestSessionBuilder;
pub use executor::{TestSession, DURATION_REACHED_REASON, MANUAL_STOP_REASON};
pub use scheduler::{period_for, RampController, RateScheduler, MINUTE, RAMP_CHECK_PERIOD};
pub use state::{SessionId, SessionState, SessionStatus};

#[cfg(test)]
mod tests;
