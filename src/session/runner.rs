// src/session/runner.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at};

use crate::error::EngineError;
use crate::models::attempt::{SessionView, SubmitAttemptRequest, SubmitCause};
use crate::models::score::ScoreBreakdown;
use crate::session::machine::{ExamEngine, TickOutcome};
use crate::session::monitor::{ViolationKind, ViolationMonitor, ViolationOutcome};
use crate::session::persist::{self, SnapshotStore};
use crate::session::timer::{DriftDetector, DriftVerdict};
use crate::sync::{SyncError, SyncTransport, UpsertOutcome};

pub type IntegrityEvent = ViolationKind;

/// User interactions forwarded from the shell.
#[derive(Debug, Clone)]
pub enum Command {
    SelectAnswer(usize),
    ClearResponse,
    ToggleMarkForReview,
    NavigateTo { section: String, ordinal: usize },
    SaveAndNext,
    Submit,
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Final submission kept failing. This is the one fatal path: the UI
    /// must surface a retry prompt and tell the candidate not to reload.
    #[error("final submission failed after retries: {0}")]
    FinalSubmission(#[from] SyncError),
}

/// Shell-side endpoints of a running session.
pub struct SessionHandle {
    pub commands: mpsc::Sender<Command>,
    pub events: mpsc::Sender<IntegrityEvent>,
    pub views: watch::Receiver<Option<SessionView>>,
}

/// Single-task cooperative driver for one exam session.
///
/// Owns the engine and multiplexes, on one task, the command channel, the
/// integrity-event channel, the 1s countdown, the 30s drift check and the
/// 10s autosave. Incremental upserts are spawned without being awaited so
/// navigation never blocks on the network; the final submission is the only
/// call that gates anything.
pub struct SessionRunner {
    engine: ExamEngine,
    transport: Arc<dyn SyncTransport>,
    store: Arc<dyn SnapshotStore>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::Receiver<IntegrityEvent>,
    views: watch::Sender<Option<SessionView>>,
    expiry_tx: mpsc::Sender<()>,
    expiry_rx: mpsc::Receiver<()>,
}

impl SessionRunner {
    pub fn new(
        engine: ExamEngine,
        transport: Arc<dyn SyncTransport>,
        store: Arc<dyn SnapshotStore>,
    ) -> (Self, SessionHandle) {
        let (command_tx, command_rx) = mpsc::channel(64);
        let (event_tx, event_rx) = mpsc::channel(16);
        let (view_tx, view_rx) = watch::channel(engine.view());
        let (expiry_tx, expiry_rx) = mpsc::channel(1);

        let runner = Self {
            engine,
            transport,
            store,
            commands: command_rx,
            events: event_rx,
            views: view_tx,
            expiry_tx,
            expiry_rx,
        };
        let handle = SessionHandle {
            commands: command_tx,
            events: event_tx,
            views: view_rx,
        };
        (runner, handle)
    }

    /// Drives the session to its terminal state and returns the server's
    /// authoritative breakdown.
    pub async fn run(mut self) -> Result<ScoreBreakdown, RunnerError> {
        let config = self.engine.config().clone();
        let monitor = ViolationMonitor::new(&config);
        let mut drift = DriftDetector::new(&config, Instant::now());

        let second = Duration::from_secs(1);
        let autosave_period = Duration::from_secs(config.autosave_interval_secs);
        let resync_period = Duration::from_secs(config.resync_interval_secs);

        let mut countdown = interval_at(Instant::now() + second, second);
        let mut autosave = interval_at(Instant::now() + autosave_period, autosave_period);
        let mut resync = interval_at(Instant::now() + resync_period, resync_period);

        let cause = loop {
            tokio::select! {
                _ = countdown.tick() => {
                    match self.engine.tick() {
                        TickOutcome::Expired => break SubmitCause::Timeout,
                        TickOutcome::Running(_) => self.publish(),
                        TickOutcome::Ignored => {}
                    }
                }

                _ = resync.tick() => {
                    if let DriftVerdict::Tampered { .. } = drift.check(Instant::now()) {
                        break SubmitCause::DriftTamper;
                    }
                }

                _ = autosave.tick() => {
                    if let Some(snapshot) = self.engine.snapshot() {
                        persist::autosave(self.store.as_ref(), &snapshot).await;
                    }
                }

                Some(kind) = self.events.recv() => {
                    if let Some(cause) = self.handle_violation(&monitor, kind) {
                        break cause;
                    }
                }

                Some(command) = self.commands.recv() => {
                    if let Some(cause) = self.handle_command(command).await {
                        break cause;
                    }
                }

                Some(()) = self.expiry_rx.recv() => {
                    // Server finalized the attempt on an upsert; the local
                    // clock was behind or compromised.
                    break SubmitCause::Timeout;
                }
            }
        };

        // Terminal teardown order matters: leaving the loop stops all three
        // tickers, then the listeners are detached, and only then do scoring
        // and submission run, so no late tick can re-enter submit().
        self.commands.close();
        self.events.close();

        self.engine.submit(cause)?;
        self.publish();
        persist::clear(self.store.as_ref()).await;

        let local = self.engine.score_local();
        tracing::debug!(total = local.total, "local score preview computed");

        let attempt_id = self
            .engine
            .session()
            .map(|s| s.attempt_id.clone())
            .unwrap_or_default();
        let request = SubmitAttemptRequest {
            cause,
            sections: self.engine.answer_sheet(),
        };

        let breakdown = self.submit_with_retry(&attempt_id, &request).await?;
        if breakdown != local {
            // Expected to agree; the server is the system of record either way.
            tracing::warn!(
                server_total = breakdown.total,
                local_total = local.total,
                "server breakdown differs from local preview"
            );
        }
        Ok(breakdown)
    }

    fn handle_violation(
        &mut self,
        monitor: &ViolationMonitor,
        kind: ViolationKind,
    ) -> Option<SubmitCause> {
        let count = self.engine.violations() + 1;
        match monitor.assess(count, kind) {
            ViolationOutcome::Warn { warning, .. } => {
                if self.engine.record_violation(warning).is_ok() {
                    self.publish();
                }
                None
            }
            ViolationOutcome::Escalate { count } => {
                let warning = format!("Multiple violations detected ({count}). Auto-submitting.");
                let _ = self.engine.record_violation(warning);
                self.publish();
                Some(SubmitCause::ViolationLimit)
            }
        }
    }

    async fn handle_command(&mut self, command: Command) -> Option<SubmitCause> {
        match command {
            Command::SelectAnswer(index) => match self.engine.select_answer(index) {
                Ok(view) => {
                    self.dispatch_upsert(view.selected.map(|v| v as i64));
                    self.save_now().await;
                    self.publish();
                }
                // Input errors are silent no-ops for the UI.
                Err(e) => tracing::debug!("select_answer rejected: {}", e),
            },
            Command::ClearResponse => match self.engine.clear_response() {
                Ok(_) => {
                    self.dispatch_upsert(None);
                    self.save_now().await;
                    self.publish();
                }
                Err(e) => tracing::debug!("clear_response rejected: {}", e),
            },
            Command::ToggleMarkForReview => match self.engine.toggle_mark_for_review() {
                Ok(_) => {
                    self.save_now().await;
                    self.publish();
                }
                Err(e) => tracing::debug!("toggle_mark rejected: {}", e),
            },
            Command::NavigateTo { section, ordinal } => {
                match self.engine.navigate_to(&section, ordinal) {
                    Ok(_) => self.publish(),
                    Err(e) => tracing::debug!("navigate_to rejected: {}", e),
                }
            }
            Command::SaveAndNext => match self.engine.save_and_next() {
                Ok(_) => self.publish(),
                Err(e) => tracing::debug!("save_and_next rejected: {}", e),
            },
            Command::Submit => return Some(SubmitCause::User),
        }
        None
    }

    /// Fires one incremental upsert without awaiting it. The payload is the
    /// current stored value at dispatch time (a full overwrite), so a
    /// late-arriving request for a superseded value is tolerable; the final
    /// submission is the safety net regardless.
    fn dispatch_upsert(&self, selected: Option<i64>) {
        let Some(key) = self.engine.current_key() else {
            return;
        };
        let Some(session) = self.engine.session() else {
            return;
        };
        let attempt_id = session.attempt_id.clone();
        let transport = Arc::clone(&self.transport);
        let expiry_tx = self.expiry_tx.clone();

        tokio::spawn(async move {
            match transport.upsert_answer(&attempt_id, &key, selected).await {
                Ok(UpsertOutcome::Accepted) => {}
                Ok(UpsertOutcome::Expired) => {
                    let _ = expiry_tx.send(()).await;
                }
                // Fire-and-forget: an incremental loss is recoverable.
                Err(e) => tracing::warn!(question = %key, "answer sync failed: {}", e),
            }
        });
    }

    async fn save_now(&self) {
        if let Some(snapshot) = self.engine.snapshot() {
            persist::autosave(self.store.as_ref(), &snapshot).await;
        }
    }

    async fn submit_with_retry(
        &self,
        attempt_id: &str,
        request: &SubmitAttemptRequest,
    ) -> Result<ScoreBreakdown, SyncError> {
        let mut backoff = Duration::from_secs(1);
        let mut last_err = None;

        for attempt in 1..=3u32 {
            match self.transport.submit(attempt_id, request).await {
                Ok(breakdown) => return Ok(breakdown),
                Err(e) => {
                    tracing::error!(attempt, "final submission failed: {}", e);
                    last_err = Some(e);
                    if attempt < 3 {
                        tokio::time::sleep(backoff).await;
                        backoff *= 2;
                    }
                }
            }
        }

        tracing::error!(
            "final submission exhausted retries; do not reload, the attempt is unrecorded"
        );
        Err(last_err.expect("retry loop always records an error"))
    }

    fn publish(&self) {
        self.views.send_replace(self.engine.view());
    }
}
