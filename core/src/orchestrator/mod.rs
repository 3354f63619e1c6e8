//! Orchestrator for multi-session batches
//!
//! The SessionOrchestrator coordinates one batch of test sessions:
//! - Validating every config before anything starts
//! - Creating one independent TestSession per config
//! - Clearing its running flag once every session is terminal
//! - Publishing batch-level events through the StateBroadcaster
//!
//! # Example
//!
//! ```ignore
//! use genai_stress_core::OrchestratorBuilder;
//!
//! let orchestrator = OrchestratorBuilder::new()
//!     .factory(factory)
//!     .history(store)
//!     .build()?;
//!
//! orchestrator.start(configs).await?;
//! orchestrator.wait_idle().await;
//! ```

mod aggregator;
mod builder;
mod executor;

pub use aggregator::{aggregate_sessions, BatchTotals};
pub use builder::OrchestratorBuilder;
pub use executor::{OrchestratorStatus, SessionOrchestrator};
