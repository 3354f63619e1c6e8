//! Throttled fan-out of engine state to external observers
//!
//! Discrete events ([`StateBroadcaster::emit`]) are delivered in order.
//! State publication ([`StateBroadcaster::publish_state`]) is coalesced: at
//! most one flush per throttle window, and each flush serializes the live
//! state at flush time. Delivery runs on its own task so a slow observer
//! never stalls dispatch.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::orchestrator::OrchestratorStatus;
use crate::session::{SessionId, SessionState};
use crate::stats::{MinuteAggregate, RequestLogEntry, StatsSummary};
use crate::traits::{DeliveryError, Observer, StateSource};

/// Message delivered to observers as `{"type": .., "data": ..}`
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum BroadcastMessage {
    /// Coalesced live state
    StateUpdate(OrchestratorStatus),

    /// A completion was recorded
    RequestLogUpdate {
        /// Session that recorded it
        session_id: SessionId,
        /// The log entry
        entry: RequestLogEntry,
    },

    /// A minute window closed
    MinuteStatsUpdate {
        /// Session that closed it
        session_id: SessionId,
        /// The closed window
        aggregate: MinuteAggregate,
    },

    /// Auto ramp raised the rate
    RateIncreased {
        /// Session that ramped
        session_id: SessionId,
        /// Rate now in effect
        new_rpm: u32,
        /// When the step happened
        time: DateTime<Utc>,
    },

    /// A session reached a terminal state
    SessionTerminated {
        /// Session that ended
        session_id: SessionId,
        /// Terminal state with reason
        state: SessionState,
        /// Frozen statistics
        final_stats: StatsSummary,
        /// Highest rate reached (auto mode)
        max_rpm: Option<u32>,
    },

    /// A batch was accepted and started
    BatchStarted(OrchestratorStatus),

    /// A batch was stopped on request
    BatchStopped(OrchestratorStatus),

    /// Every session of a batch reached a terminal state
    BatchCompleted(OrchestratorStatus),
}

/// Handle returned by [`StateBroadcaster::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// What to do with a state publication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    /// Window elapsed; flush now
    FlushNow,
    /// Schedule one flush at this instant
    Defer(Instant),
    /// A flush is already scheduled
    Coalesced,
}

/// Coalescing state for one broadcaster
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_flush: Option<Instant>,
    pending: bool,
}

impl Throttle {
    /// Allow one flush per `window`
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_flush: None,
            pending: false,
        }
    }

    /// Register a publication at `now`
    pub fn on_publish(&mut self, now: Instant) -> ThrottleDecision {
        if self.pending {
            return ThrottleDecision::Coalesced;
        }
        match self.last_flush {
            Some(last) if now.saturating_duration_since(last) < self.window => {
                self.pending = true;
                ThrottleDecision::Defer(last + self.window)
            }
            _ => ThrottleDecision::FlushNow,
        }
    }

    /// Record a flush at `now`
    pub fn flushed(&mut self, now: Instant) {
        self.last_flush = Some(now);
        self.pending = false;
    }

    /// Whether a deferred flush is outstanding
    pub fn is_pending(&self) -> bool {
        self.pending
    }
}

enum Command {
    PublishState,
    Emit(Box<BroadcastMessage>),
}

#[derive(Default)]
struct Shared {
    observers: RwLock<Vec<(ObserverId, Arc<dyn Observer>)>>,
    source: RwLock<Option<Weak<dyn StateSource>>>,
    next_id: AtomicU64,
}

impl Shared {
    fn deliver(&self, message: &BroadcastMessage) {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize broadcast message");
                return;
            }
        };

        let observers = self.observers.read().clone();
        for (_, observer) in observers {
            match std::panic::catch_unwind(AssertUnwindSafe(|| observer.deliver(&payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(observer = observer.name(), error = %e, "Observer delivery failed");
                }
                Err(_) => {
                    tracing::warn!(observer = observer.name(), "Observer panicked during delivery");
                }
            }
        }
    }

    fn flush_state(&self) {
        let source = self.source.read().as_ref().and_then(Weak::upgrade);
        if let Some(source) = source {
            self.deliver(&source.current_state());
        }
    }
}

/// Cloneable handle to the broadcast task
#[derive(Clone)]
pub struct StateBroadcaster {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl StateBroadcaster {
    /// Start the delivery task with the given throttle window
    ///
    /// Must be called inside a tokio runtime. The task ends once every
    /// handle is dropped, flushing any deferred state first.
    pub fn spawn(window: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::default());
        tokio::spawn(run(rx, Arc::clone(&shared), Throttle::new(window)));
        Self { tx, shared }
    }

    /// Register an observer
    pub fn subscribe(&self, observer: Arc<dyn Observer>) -> ObserverId {
        let id = ObserverId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::debug!(observer = observer.name(), "Observer subscribed");
        self.shared.observers.write().push((id, observer));
        id
    }

    /// Remove an observer; returns whether it was registered
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut observers = self.shared.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Number of registered observers
    pub fn observer_count(&self) -> usize {
        self.shared.observers.read().len()
    }

    /// Set where flushed state comes from
    pub fn set_source(&self, source: Weak<dyn StateSource>) {
        *self.shared.source.write() = Some(source);
    }

    /// Request a (coalesced) state flush
    pub fn publish_state(&self) {
        let _ = self.tx.send(Command::PublishState);
    }

    /// Deliver a discrete event
    pub fn emit(&self, message: BroadcastMessage) {
        let _ = self.tx.send(Command::Emit(Box::new(message)));
    }
}

impl std::fmt::Debug for StateBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateBroadcaster")
            .field("observers", &self.observer_count())
            .finish()
    }
}

async fn run(mut rx: mpsc::UnboundedReceiver<Command>, shared: Arc<Shared>, mut throttle: Throttle) {
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            command = rx.recv() => match command {
                None => break,
                Some(Command::Emit(message)) => shared.deliver(&message),
                Some(Command::PublishState) => match throttle.on_publish(Instant::now()) {
                    ThrottleDecision::FlushNow => {
                        shared.flush_state();
                        throttle.flushed(Instant::now());
                    }
                    ThrottleDecision::Defer(at) => deadline = Some(at),
                    ThrottleDecision::Coalesced => {}
                },
            },
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                deadline = None;
                shared.flush_state();
                throttle.flushed(Instant::now());
            }
        }
    }

    if throttle.is_pending() {
        shared.flush_state();
    }
}

/// Observer that forwards payloads into a tokio channel
#[derive(Debug)]
pub struct ChannelObserver {
    name: String,
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelObserver {
    /// Create the observer and the receiving end
    pub fn new(name: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                name: name.into(),
                tx,
            },
            rx,
        )
    }
}

impl Observer for ChannelObserver {
    fn name(&self) -> &str {
        &self.name
    }

    fn deliver(&self, payload: &str) -> Result<(), DeliveryError> {
        self.tx
            .send(payload.to_string())
            .map_err(|_| DeliveryError::Closed)
    }
}
