//! Test session lifecycle and dispatch loop

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval_at, sleep_until, Instant};
use uuid::Uuid;

use crate::broadcaster::{BroadcastMessage, StateBroadcaster};
use crate::config::{EngineDefaults, OverloadThresholds, SessionConfig};
use crate::error::{StressError, StressResult};
use crate::metrics::{HistoryId, RunSummary};
use crate::orchestrator::OrchestratorStatus;
use crate::overload::{OverloadDetector, Verdict};
use crate::response::Outcome;
use crate::stats::{ErrorRecord, RecordContext, RequestLogEntry, RuntimeStats};
use crate::traits::{ComponentFactory, HistoryStore, PromptSource, ProviderClient, StateSource};

use super::scheduler::{RampController, RateScheduler, MINUTE, RAMP_CHECK_PERIOD};
use super::state::{SessionId, SessionState, SessionStatus};

/// Reason recorded by [`TestSession::stop`]
pub const MANUAL_STOP_REASON: &str = "manual stop";

/// Reason recorded when the duration limit fires
pub const DURATION_REACHED_REASON: &str = "test duration reached";

/// Collaborators not yet resolved into a client and prompt source
pub(crate) struct Components {
    pub(crate) client: Option<Arc<dyn ProviderClient>>,
    pub(crate) prompts: Option<Arc<dyn PromptSource>>,
    pub(crate) factory: Option<Arc<dyn ComponentFactory>>,
}

impl Components {
    fn resolve(
        self,
        config: &SessionConfig,
        request_timeout: Duration,
    ) -> StressResult<(Arc<dyn ProviderClient>, Arc<dyn PromptSource>)> {
        let client = match (self.client, &self.factory) {
            (Some(client), _) => client,
            (None, Some(factory)) => factory.provider_client(config, request_timeout)?,
            (None, None) => return Err(StressError::missing_config("client")),
        };
        let prompts = match (self.prompts, &self.factory) {
            (Some(prompts), _) => prompts,
            (None, Some(factory)) => factory.prompt_source(config)?,
            (None, None) => return Err(StressError::missing_config("prompts")),
        };
        Ok((client, prompts))
    }
}

/// Mutable session state, guarded by one lock
struct Live {
    state: SessionState,
    stats: RuntimeStats,
    current_rpm: u32,
    peak_rpm: u32,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    history_id: Option<HistoryId>,
    components: Option<Components>,
}

/// Completion of one in-flight attempt
struct Completion {
    outcome: Outcome,
    rpm: u32,
}

pub(crate) struct SessionCore {
    id: SessionId,
    batch_id: Option<Uuid>,
    config: SessionConfig,
    defaults: Arc<EngineDefaults>,
    thresholds: OverloadThresholds,
    history: Option<Arc<dyn HistoryStore>>,
    broadcaster: Option<StateBroadcaster>,
    terminal_tx: Option<mpsc::UnboundedSender<SessionId>>,
    shutdown_tx: broadcast::Sender<()>,
    done_tx: watch::Sender<bool>,
    live: Mutex<Live>,
}

/// One running test against one endpoint
///
/// Composes the rate scheduler, provider client, statistics and overload
/// detector. Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct TestSession {
    core: Arc<SessionCore>,
}

impl TestSession {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: SessionId,
        batch_id: Option<Uuid>,
        config: SessionConfig,
        defaults: Arc<EngineDefaults>,
        components: Components,
        history: Option<Arc<dyn HistoryStore>>,
        broadcaster: Option<StateBroadcaster>,
        terminal_tx: Option<mpsc::UnboundedSender<SessionId>>,
    ) -> Self {
        let thresholds = config.thresholds(&defaults);
        let rpm = config.initial_rpm(&defaults);
        let (shutdown_tx, _) = broadcast::channel(1);
        let (done_tx, _) = watch::channel(false);

        let live = Live {
            state: SessionState::Idle,
            stats: RuntimeStats::from_defaults(&defaults, Utc::now(), rpm),
            current_rpm: rpm,
            peak_rpm: rpm,
            started_at: None,
            ended_at: None,
            history_id: None,
            components: Some(components),
        };

        Self {
            core: Arc::new(SessionCore {
                id,
                batch_id,
                config,
                defaults,
                thresholds,
                history,
                broadcaster,
                terminal_tx,
                shutdown_tx,
                done_tx,
                live: Mutex::new(live),
            }),
        }
    }

    /// Session identifier
    pub fn id(&self) -> &SessionId {
        &self.core.id
    }

    /// Configuration the session was created with
    pub fn config(&self) -> &SessionConfig {
        &self.core.config
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.core.live.lock().state.clone()
    }

    /// Rate in effect
    pub fn current_rpm(&self) -> u32 {
        self.core.live.lock().current_rpm
    }

    /// Identifier assigned by the history store, once saved
    pub fn history_id(&self) -> Option<HistoryId> {
        self.core.live.lock().history_id
    }

    /// Status snapshot
    pub fn status(&self) -> SessionStatus {
        self.core.status()
    }

    /// Request log, oldest first
    pub fn request_log(&self) -> Vec<RequestLogEntry> {
        self.core.live.lock().stats.request_log()
    }

    /// Error log, oldest first
    pub fn error_log(&self) -> Vec<ErrorRecord> {
        self.core.live.lock().stats.error_log()
    }

    /// This session as a broadcast state source
    pub fn state_source(&self) -> Weak<dyn StateSource> {
        let weak: Weak<SessionCore> = Arc::downgrade(&self.core);
        weak
    }

    /// Validate the config, acquire collaborators and begin dispatching
    ///
    /// # Errors
    /// - `Validation` if the config is invalid; the session stays `Idle`
    /// - `Concurrency` if the session is not `Idle`
    /// - `Startup` if collaborators could not be built; the session ends `Failed`
    pub async fn start(&self) -> StressResult<()> {
        let core = &self.core;
        core.config.validate()?;

        let resolved = {
            let mut live = core.live.lock();
            if live.state != SessionState::Idle {
                return Err(StressError::concurrency(format!(
                    "session {} cannot start while {}",
                    core.id,
                    live.state.label()
                )));
            }
            let components = live
                .components
                .take()
                .ok_or(StressError::missing_config("components"))?;

            match components.resolve(&core.config, core.defaults.request_timeout()) {
                Ok(resolved) => {
                    let now = Utc::now();
                    let rpm = live.current_rpm;
                    live.state = SessionState::Running;
                    live.started_at = Some(now);
                    live.stats = RuntimeStats::from_defaults(&core.defaults, now, rpm);
                    Ok(resolved)
                }
                Err(e) => {
                    live.state = SessionState::Failed(format!("startup failed: {e}"));
                    live.started_at = Some(Utc::now());
                    live.ended_at = live.started_at;
                    Err(e)
                }
            }
        };

        let (client, prompts) = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(session_id = %core.id, error = %e, "Session failed at startup");
                core.after_terminal().await;
                return Err(StressError::startup(e.to_string()));
            }
        };

        tracing::info!(
            session_id = %core.id,
            provider = %core.config.provider,
            model = %core.config.model,
            rate_mode = core.config.rate.label(),
            rpm = self.current_rpm(),
            "Session started"
        );

        let shutdown = core.shutdown_tx.subscribe();
        tokio::spawn(drive(Arc::clone(core), client, prompts, shutdown));
        core.publish_state();
        Ok(())
    }

    /// Stop a running session
    ///
    /// In-flight attempts may still finish but are not recorded.
    ///
    /// # Errors
    /// `Concurrency` if the session is not `Running`.
    pub async fn stop(&self) -> StressResult<()> {
        let core = &self.core;
        if core.finish(SessionState::Stopped(MANUAL_STOP_REASON.to_string())) {
            core.after_terminal().await;
            Ok(())
        } else {
            Err(StressError::concurrency(format!(
                "session {} is not running ({})",
                core.id,
                self.state().label()
            )))
        }
    }

    /// Wait until the session reaches a terminal state and its summary is stored
    pub async fn wait(&self) {
        let mut done = self.core.done_tx.subscribe();
        let _ = done.wait_for(|finished| *finished).await;
    }
}

impl std::fmt::Debug for TestSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestSession")
            .field("id", &self.core.id)
            .field("state", &self.state())
            .finish()
    }
}

impl SessionCore {
    fn status(&self) -> SessionStatus {
        let live = self.live.lock();
        SessionStatus {
            id: self.id.clone(),
            config: self.config.summary(&self.defaults),
            state: live.state.clone(),
            current_rpm: live.current_rpm,
            peak_rpm: live.peak_rpm,
            stats: live.stats.summary(),
            started_at: live.started_at,
            ended_at: live.ended_at,
        }
    }

    fn is_running(&self) -> bool {
        self.live.lock().state.is_running()
    }

    fn publish_state(&self) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.publish_state();
        }
    }

    fn emit(&self, message: BroadcastMessage) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.emit(message);
        }
    }

    /// Move `Running -> terminal`; false if the session was not running
    fn finish(&self, terminal: SessionState) -> bool {
        {
            let mut live = self.live.lock();
            if !live.state.is_running() {
                return false;
            }
            tracing::info!(
                session_id = %self.id,
                state = %terminal,
                total_requests = live.stats.total_requests(),
                "Session finished"
            );
            live.state = terminal;
            live.ended_at = Some(Utc::now());
        }
        let _ = self.shutdown_tx.send(());
        true
    }

    /// Freeze, persist and announce a terminal transition
    ///
    /// Runs exactly once per session, by whoever won the transition.
    async fn after_terminal(&self) {
        let (summary, message) = {
            let live = self.live.lock();
            let ended_at = live.ended_at.unwrap_or_else(Utc::now);
            let max_rpm = self.config.rate.is_auto().then_some(live.peak_rpm);
            let summary = RunSummary::from_stats(
                self.id.clone(),
                self.batch_id,
                self.config.summary(&self.defaults),
                &live.stats,
                live.started_at.unwrap_or(ended_at),
                ended_at,
                live.current_rpm,
                max_rpm,
                live.state.clone(),
            );
            let message = BroadcastMessage::SessionTerminated {
                session_id: self.id.clone(),
                state: live.state.clone(),
                final_stats: live.stats.summary(),
                max_rpm,
            };
            (summary, message)
        };

        self.emit(message);

        if let Some(history) = &self.history {
            match history.save(summary).await {
                Ok(id) => {
                    tracing::debug!(session_id = %self.id, history_id = %id, "Run summary saved");
                    self.live.lock().history_id = Some(id);
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.id, error = %e, "Failed to save run summary");
                }
            }
        }

        self.done_tx.send_replace(true);
        if let Some(tx) = &self.terminal_tx {
            let _ = tx.send(self.id.clone());
        }
        self.publish_state();
    }

    /// Apply a completion and judge overload
    fn record(&self, completion: Completion) -> Verdict {
        let (entry, verdict) = {
            let mut live = self.live.lock();
            if !live.state.is_running() {
                return Verdict::Continue;
            }
            let ctx = RecordContext {
                model: &self.config.model,
                provider: self.config.provider,
                rpm: completion.rpm,
            };
            let entry = live.stats.apply(&completion.outcome, ctx, Utc::now());
            let verdict = OverloadDetector::evaluate(&live.stats, &self.thresholds, &self.config.rate);
            (entry, verdict)
        };

        if let Outcome::Failure { kind, message, .. } = &completion.outcome {
            tracing::debug!(session_id = %self.id, kind = %kind, error = %message, "Request failed");
        }

        self.emit(BroadcastMessage::RequestLogUpdate {
            session_id: self.id.clone(),
            entry,
        });
        self.publish_state();
        verdict
    }

    fn rate_increased(&self, rpm: u32) {
        {
            let mut live = self.live.lock();
            if !live.state.is_running() {
                return;
            }
            live.current_rpm = rpm;
            live.peak_rpm = live.peak_rpm.max(rpm);
        }
        tracing::info!(session_id = %self.id, rpm, "Rate increased");
        self.emit(BroadcastMessage::RateIncreased {
            session_id: self.id.clone(),
            new_rpm: rpm,
            time: Utc::now(),
        });
        self.publish_state();
    }

    fn roll_minute(&self) {
        let closed = {
            let mut live = self.live.lock();
            if !live.state.is_running() {
                return;
            }
            let rpm = live.current_rpm;
            live.stats.roll_minute(Utc::now(), rpm)
        };
        tracing::debug!(
            session_id = %self.id,
            successes = closed.success_count,
            failures = closed.failure_count,
            "Minute closed"
        );
        self.emit(BroadcastMessage::MinuteStatsUpdate {
            session_id: self.id.clone(),
            aggregate: closed,
        });
    }
}

impl StateSource for SessionCore {
    fn current_state(&self) -> BroadcastMessage {
        let status = self.status();
        BroadcastMessage::StateUpdate(OrchestratorStatus {
            batch_id: self.batch_id,
            running: status.state.is_running(),
            started_at: status.started_at,
            ended_at: status.ended_at,
            sessions: vec![status],
        })
    }
}

/// Fire one attempt without waiting for it
fn dispatch(
    client: &Arc<dyn ProviderClient>,
    prompts: &Arc<dyn PromptSource>,
    rpm: u32,
    tx: mpsc::Sender<Completion>,
) {
    let client = Arc::clone(client);
    let prompt = prompts.next_prompt();
    tokio::spawn(async move {
        let outcome = client.send(&prompt).await;
        // The driver is gone once the session left Running; drop the result.
        let _ = tx.send(Completion { outcome, rpm }).await;
    });
}

/// Session driver: the only task that mutates stats while running
async fn drive(
    core: Arc<SessionCore>,
    client: Arc<dyn ProviderClient>,
    prompts: Arc<dyn PromptSource>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let (tx, mut rx) = mpsc::channel::<Completion>(core.defaults.channels.completion_buffer);
    let start = Instant::now();

    let mut scheduler = RateScheduler::new(core.live.lock().current_rpm);
    let mut ramp = core
        .config
        .ramp(&core.defaults)
        .map(|ramp| RampController::new(ramp, start));
    let mut ramp_check = interval_at(start + RAMP_CHECK_PERIOD, RAMP_CHECK_PERIOD);
    let mut minute = interval_at(start + MINUTE, MINUTE);

    let deadline = core.config.duration_limit().map(|limit| start + limit);
    let duration_timer = sleep_until(deadline.unwrap_or(start));
    tokio::pin!(duration_timer);

    loop {
        tokio::select! {
            biased;

            _ = shutdown.recv() => break,

            Some(completion) = rx.recv() => {
                if let Verdict::Stop(reason) = core.record(completion) {
                    tracing::warn!(session_id = %core.id, reason = %reason, "Overload detected");
                    if core.finish(SessionState::Failed(reason)) {
                        core.after_terminal().await;
                    }
                    break;
                }
            }

            _ = &mut duration_timer, if deadline.is_some() => {
                if core.finish(SessionState::Completed(DURATION_REACHED_REASON.to_string())) {
                    core.after_terminal().await;
                }
                break;
            }

            _ = scheduler.tick() => {
                if !core.is_running() {
                    break;
                }
                dispatch(&client, &prompts, scheduler.rpm(), tx.clone());
            }

            _ = ramp_check.tick(), if ramp.is_some() => {
                if let Some(rpm) = ramp.as_mut().and_then(|r| r.on_check(Instant::now())) {
                    scheduler.update_rate(rpm);
                    core.rate_increased(rpm);
                }
            }

            _ = minute.tick() => core.roll_minute(),
        }
    }

    tracing::debug!(session_id = %core.id, "Session driver stopped");
}
