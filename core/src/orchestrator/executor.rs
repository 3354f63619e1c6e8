//! Orchestrator execution logic

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::broadcaster::{BroadcastMessage, StateBroadcaster};
use crate::config::{EngineDefaults, SessionConfig};
use crate::error::{StressError, StressResult};
use crate::session::{SessionId, SessionStatus, TestSession, TestSessionBuilder};
use crate::traits::{ComponentFactory, HistoryStore, StateSource};

use super::aggregator::{aggregate_sessions, BatchTotals};

/// Snapshot of the orchestrator and every session in the current batch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    /// Current (or last) batch
    pub batch_id: Option<Uuid>,

    /// Whether any session of the batch may still be running
    pub running: bool,

    /// Batch acceptance time
    pub started_at: Option<DateTime<Utc>>,

    /// Time the last session reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,

    /// One entry per session, in config order
    pub sessions: Vec<SessionStatus>,
}

impl OrchestratorStatus {
    /// Totals across sessions
    pub fn totals(&self) -> BatchTotals {
        aggregate_sessions(&self.sessions)
    }

    /// Look up one session's status
    pub fn session(&self, id: &SessionId) -> Option<&SessionStatus> {
        self.sessions.iter().find(|status| &status.id == id)
    }
}

struct Batch {
    id: Uuid,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    stopping: bool,
    sessions: Vec<TestSession>,
}

pub(crate) struct OrchestratorInner {
    defaults: Arc<EngineDefaults>,
    factory: Arc<dyn ComponentFactory>,
    history: Option<Arc<dyn HistoryStore>>,
    broadcaster: StateBroadcaster,
    batch: Mutex<Option<Batch>>,
    running_tx: watch::Sender<bool>,
}

/// Runs batches of up to `max_sessions` independent test sessions
///
/// Sessions share nothing mutable except the engine defaults, the component
/// factory and the history store. Cheap to clone.
#[derive(Clone)]
pub struct SessionOrchestrator {
    inner: Arc<OrchestratorInner>,
}

impl SessionOrchestrator {
    /// Create a new orchestrator
    ///
    /// Use `OrchestratorBuilder` for a more ergonomic construction.
    pub fn new(
        defaults: Arc<EngineDefaults>,
        factory: Arc<dyn ComponentFactory>,
        history: Option<Arc<dyn HistoryStore>>,
        broadcaster: StateBroadcaster,
    ) -> Self {
        let (running_tx, _) = watch::channel(false);
        let inner = Arc::new(OrchestratorInner {
            defaults,
            factory,
            history,
            broadcaster,
            batch: Mutex::new(None),
            running_tx,
        });

        let source: Weak<OrchestratorInner> = Arc::downgrade(&inner);
        inner.broadcaster.set_source(source);

        Self { inner }
    }

    /// Engine defaults shared by every session
    pub fn defaults(&self) -> &EngineDefaults {
        &self.inner.defaults
    }

    /// Broadcaster observers subscribe to
    pub fn broadcaster(&self) -> &StateBroadcaster {
        &self.inner.broadcaster
    }

    /// Whether a batch is in progress
    pub fn is_running(&self) -> bool {
        self.inner.is_running()
    }

    /// Validate and start a batch
    ///
    /// Every config is validated before any session is created. Sessions
    /// that fail at startup end `Failed` without failing the batch.
    ///
    /// # Errors
    /// - `Concurrency` if a batch is running, or the batch is empty or too large
    /// - `Validation` if any config is invalid; nothing is started
    pub async fn start(&self, configs: Vec<SessionConfig>) -> StressResult<OrchestratorStatus> {
        let inner = &self.inner;
        let max = inner.defaults.max_sessions;

        if configs.is_empty() {
            return Err(StressError::concurrency("a batch needs at least one session"));
        }
        if configs.len() > max {
            return Err(StressError::concurrency(format!(
                "a batch holds at most {max} sessions, got {}",
                configs.len()
            )));
        }
        for (index, config) in configs.iter().enumerate() {
            config
                .validate()
                .map_err(|e| StressError::validation(format!("session {}: {e}", index + 1)))?;
        }

        let (batch_id, sessions, terminal_rx) = {
            let mut batch = inner.batch.lock();
            if inner.is_running() {
                return Err(StressError::concurrency("a batch is already running"));
            }

            let batch_id = Uuid::new_v4();
            let (terminal_tx, terminal_rx) = mpsc::unbounded_channel();
            let sessions = configs
                .into_iter()
                .enumerate()
                .map(|(index, config)| inner.build_session(batch_id, index, config, &terminal_tx))
                .collect::<StressResult<Vec<_>>>()?;

            *batch = Some(Batch {
                id: batch_id,
                started_at: Utc::now(),
                ended_at: None,
                stopping: false,
                sessions: sessions.clone(),
            });
            inner.running_tx.send_replace(true);
            (batch_id, sessions, terminal_rx)
        };

        tracing::info!(batch_id = %batch_id, sessions = sessions.len(), "Batch started");
        tokio::spawn(watch_terminals(Arc::clone(inner), batch_id, terminal_rx));
        inner.broadcaster.emit(BroadcastMessage::BatchStarted(inner.status()));

        for session in &sessions {
            if let Err(e) = session.start().await {
                tracing::error!(session_id = %session.id(), error = %e, "Session failed to start");
            }
        }

        Ok(inner.status())
    }

    /// Stop every running session of the current batch
    ///
    /// # Errors
    /// `Concurrency` if no batch is running.
    pub async fn stop_all(&self) -> StressResult<OrchestratorStatus> {
        let inner = &self.inner;
        let (batch_id, sessions) = {
            let mut batch = inner.batch.lock();
            match batch.as_mut() {
                Some(batch) if inner.is_running() => {
                    batch.stopping = true;
                    (batch.id, batch.sessions.clone())
                }
                _ => return Err(StressError::concurrency("no batch is running")),
            }
        };

        tracing::info!(batch_id = %batch_id, "Stopping batch");
        for session in &sessions {
            if session.state().is_running() {
                if let Err(e) = session.stop().await {
                    tracing::debug!(session_id = %session.id(), error = %e, "Session already stopped");
                }
            }
        }
        inner.settle(batch_id);

        Ok(inner.status())
    }

    /// Current status with one entry per session
    pub fn status(&self) -> OrchestratorStatus {
        self.inner.status()
    }

    /// Session handle by id
    pub fn session(&self, id: &SessionId) -> Option<TestSession> {
        self.inner
            .batch
            .lock()
            .as_ref()
            .and_then(|batch| batch.sessions.iter().find(|s| s.id() == id).cloned())
    }

    /// Session handles of the current batch
    pub fn sessions(&self) -> Vec<TestSession> {
        self.inner
            .batch
            .lock()
            .as_ref()
            .map(|batch| batch.sessions.clone())
            .unwrap_or_default()
    }

    /// Wait until no batch is running
    pub async fn wait_idle(&self) {
        let mut running = self.inner.running_tx.subscribe();
        let _ = running.wait_for(|running| !*running).await;
    }
}

impl std::fmt::Debug for SessionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionOrchestrator")
            .field("running", &self.is_running())
            .field("max_sessions", &self.inner.defaults.max_sessions)
            .finish()
    }
}

impl OrchestratorInner {
    fn is_running(&self) -> bool {
        *self.running_tx.borrow()
    }

    fn build_session(
        &self,
        batch_id: Uuid,
        index: usize,
        config: SessionConfig,
        terminal_tx: &mpsc::UnboundedSender<SessionId>,
    ) -> StressResult<TestSession> {
        let mut builder = TestSessionBuilder::new(SessionId::new(format!("{batch_id}-{}", index + 1)))
            .config(config)
            .defaults(Arc::clone(&self.defaults))
            .batch_id(batch_id)
            .factory(Arc::clone(&self.factory))
            .broadcaster(self.broadcaster.clone())
            .on_terminal(terminal_tx.clone());
        if let Some(history) = &self.history {
            builder = builder.history(Arc::clone(history));
        }
        builder.build()
    }

    fn status(&self) -> OrchestratorStatus {
        let batch = self.batch.lock();
        match batch.as_ref() {
            Some(batch) => OrchestratorStatus {
                batch_id: Some(batch.id),
                running: self.is_running(),
                started_at: Some(batch.started_at),
                ended_at: batch.ended_at,
                sessions: batch.sessions.iter().map(TestSession::status).collect(),
            },
            None => OrchestratorStatus::default(),
        }
    }

    /// Clear the running flag once every session is terminal
    ///
    /// Returns true when the batch is (or already was) settled.
    fn settle(&self, batch_id: Uuid) -> bool {
        let stopped = {
            let mut guard = self.batch.lock();
            let Some(batch) = guard.as_mut().filter(|batch| batch.id == batch_id) else {
                return true;
            };
            if batch.ended_at.is_some() {
                return true;
            }
            if !batch.sessions.iter().all(|s| s.state().is_terminal()) {
                return false;
            }
            batch.ended_at = Some(Utc::now());
            self.running_tx.send_replace(false);
            batch.stopping
        };

        let status = self.status();
        let totals = status.totals();
        tracing::info!(
            batch_id = %batch_id,
            total_requests = totals.total_requests,
            success_rate = totals.success_rate(),
            stopped,
            "Batch finished"
        );

        let message = if stopped {
            BroadcastMessage::BatchStopped(status)
        } else {
            BroadcastMessage::BatchCompleted(status)
        };
        self.broadcaster.emit(message);
        self.broadcaster.publish_state();
        true
    }
}

impl StateSource for OrchestratorInner {
    fn current_state(&self) -> BroadcastMessage {
        BroadcastMessage::StateUpdate(self.status())
    }
}

/// Run the all-terminal check after every terminal transition of the batch
async fn watch_terminals(
    inner: Arc<OrchestratorInner>,
    batch_id: Uuid,
    mut terminal_rx: mpsc::UnboundedReceiver<SessionId>,
) {
    while let Some(session_id) = terminal_rx.recv().await {
        tracing::debug!(batch_id = %batch_id, session_id = %session_id, "Session reached terminal state");
        if inner.settle(batch_id) {
            break;
        }
    }
}
