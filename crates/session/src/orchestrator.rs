//! Generation session orchestrator.
//!
//! [`Orchestrator`] owns one [`Session`] inside a dedicated actor task.
//! Caller commands, poll reports and deadline firings travel through one
//! input queue; pushed engine messages arrive on the connection's
//! broadcast channel. The actor drains both in a single `select!` loop, so
//! every transition is applied by [`reduce`] one at a time and published
//! as a snapshot on a `watch` channel.
//!
//! Each accepted job gets a child [`CancellationToken`] that bounds its
//! poller and deadline timer. The token is cancelled as soon as the
//! session turns terminal, is recycled, or the orchestrator shuts down.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use studio_core::generation::GenerateRequest;
use studio_core::types::PromptId;
use studio_engine::api::EngineApi;
use studio_engine::connection::ConnectionManager;
use studio_engine::events::ConnectionEvent;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::dispatcher::{route, Route};
use crate::error::SessionError;
use crate::poller::{run_poller, PollOutcome, PollReport};
use crate::state::{reduce, Session, SessionEvent};

/// Default interval between history polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Default bound on submit-to-terminal time.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(300);

/// How long [`Orchestrator::shutdown`] waits for the actor to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Timing parameters for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    pub poll_interval: Duration,
    /// Overall deadline from accepted submission to a terminal state.
    pub deadline: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_DEADLINE,
        }
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Drives generation sessions against one engine.
///
/// Cheap to query; all mutation happens in the background actor. Must be
/// created inside a Tokio runtime.
pub struct Orchestrator {
    inputs: mpsc::UnboundedSender<Input>,
    snapshots: watch::Receiver<Session>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Observes one accepted job.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    prompt_id: PromptId,
    updates: watch::Receiver<Session>,
    /// Set once with this job's terminal snapshot; closed without a value
    /// when the job is recycled or the orchestrator stops.
    outcome: watch::Receiver<Option<Session>>,
}

impl SessionHandle {
    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Snapshot updates for the orchestrator's current session.
    pub fn updates(&self) -> watch::Receiver<Session> {
        self.updates.clone()
    }

    /// Wait until this job reaches a terminal state.
    ///
    /// The terminal snapshot stays available after a newer submission
    /// recycles the session. Fails with [`SessionError::Superseded`] only
    /// if the job was replaced before it finished.
    pub async fn wait_terminal(&mut self) -> Result<Session, SessionError> {
        if let Ok(outcome) = self.outcome.wait_for(Option::is_some).await {
            if let Some(session) = &*outcome {
                return Ok(session.clone());
            }
        }

        if self.updates.borrow().id != self.session_id {
            Err(SessionError::Superseded)
        } else {
            Err(SessionError::Shutdown)
        }
    }
}

impl Orchestrator {
    /// An orchestrator that relies on polling alone.
    pub fn new(api: Arc<dyn EngineApi>, config: OrchestratorConfig) -> Self {
        Self::spawn(api, config, None, None)
    }

    /// An orchestrator fed by a shared event channel connection. Every
    /// submission makes sure the connection is up.
    pub fn with_connection(
        api: Arc<dyn EngineApi>,
        connection: Arc<ConnectionManager>,
        config: OrchestratorConfig,
    ) -> Self {
        let events = connection.subscribe();
        Self::spawn(api, config, Some(events), Some(connection))
    }

    /// An orchestrator fed by an arbitrary connection event stream.
    pub fn with_event_source(
        api: Arc<dyn EngineApi>,
        events: broadcast::Receiver<ConnectionEvent>,
        config: OrchestratorConfig,
    ) -> Self {
        Self::spawn(api, config, Some(events), None)
    }

    fn spawn(
        api: Arc<dyn EngineApi>,
        config: OrchestratorConfig,
        events: Option<broadcast::Receiver<ConnectionEvent>>,
        connection: Option<Arc<ConnectionManager>>,
    ) -> Self {
        let (inputs_tx, inputs_rx) = mpsc::unbounded_channel();
        let session = Session::idle();
        let (snapshot_tx, snapshots) = watch::channel(session.clone());
        let cancel = CancellationToken::new();

        let actor = Actor {
            api,
            config,
            connection,
            session,
            snapshot_tx,
            inputs_tx: inputs_tx.clone(),
            cancel: cancel.clone(),
            job: None,
            outcome_tx: None,
        };
        let task = tokio::spawn(actor.run(inputs_rx, events));

        Self {
            inputs: inputs_tx,
            snapshots,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Validate and submit a job, replacing the current session.
    ///
    /// Validation failures never reach the network. A submission failure
    /// leaves the session Idle.
    pub async fn submit(&self, request: GenerateRequest) -> Result<SessionHandle, SessionError> {
        request.validate()?;

        let (reply, response) = oneshot::channel();
        self.inputs
            .send(Input::Submit { request, reply })
            .map_err(|_| SessionError::Shutdown)?;
        response.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Cancel the active job.
    ///
    /// The session turns Cancelled immediately; the engine is then asked
    /// to interrupt in the background.
    pub async fn cancel(&self) -> Result<(), SessionError> {
        let (reply, response) = oneshot::channel();
        self.inputs
            .send(Input::Cancel { reply })
            .map_err(|_| SessionError::Shutdown)?;
        response.await.map_err(|_| SessionError::Shutdown)?
    }

    /// Receive a snapshot after every transition.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.snapshots.clone()
    }

    /// The current session.
    pub fn snapshot(&self) -> Session {
        self.snapshots.borrow().clone()
    }

    /// Stop the actor and every job timer.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down generation orchestrator");
        self.cancel.cancel();

        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            let _ = tokio::time::timeout(SHUTDOWN_GRACE, task).await;
        }
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

/// Everything the actor task consumes besides pushed messages.
enum Input {
    Submit {
        request: GenerateRequest,
        reply: oneshot::Sender<Result<SessionHandle, SessionError>>,
    },
    Cancel {
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Poll(PollReport),
    Deadline {
        prompt_id: PromptId,
    },
}

impl From<PollReport> for Input {
    fn from(report: PollReport) -> Self {
        Self::Poll(report)
    }
}

struct Actor {
    api: Arc<dyn EngineApi>,
    config: OrchestratorConfig,
    connection: Option<Arc<ConnectionManager>>,
    session: Session,
    snapshot_tx: watch::Sender<Session>,
    /// Handed to pollers and deadline timers.
    inputs_tx: mpsc::UnboundedSender<Input>,
    cancel: CancellationToken,
    /// Token bounding the current job's poller and deadline.
    job: Option<CancellationToken>,
    /// Terminal snapshot slot of the current job's handles.
    outcome_tx: Option<watch::Sender<Option<Session>>>,
}

impl Actor {
    async fn run(
        mut self,
        mut inputs: mpsc::UnboundedReceiver<Input>,
        mut events: Option<broadcast::Receiver<ConnectionEvent>>,
    ) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                input = inputs.recv() => match input {
                    Some(input) => self.handle_input(input).await,
                    None => break,
                },
                event = next_event(&mut events) => match event {
                    Ok(event) => self.handle_connection_event(event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Orchestrator lagged behind the event channel");
                    }
                    Err(RecvError::Closed) => {
                        tracing::info!("Event channel source closed, continuing with polling only");
                        events = None;
                    }
                },
            }
        }

        self.stop_job();
        tracing::debug!("Orchestrator actor exited");
    }

    async fn handle_input(&mut self, input: Input) {
        match input {
            Input::Submit { request, reply } => {
                let result = self.submit(request).await;
                let _ = reply.send(result);
            }
            Input::Cancel { reply } => {
                let _ = reply.send(self.cancel_job());
            }
            Input::Poll(report) => {
                if !self.session.is_for(&report.prompt_id) {
                    return;
                }
                match report.outcome {
                    PollOutcome::Results(images) => {
                        self.apply(SessionEvent::ResultsFound { images });
                    }
                    PollOutcome::Failed(message) => {
                        self.apply(SessionEvent::Failed { message });
                    }
                    PollOutcome::Pending => {}
                }
            }
            Input::Deadline { prompt_id } => {
                if self.session.is_for(&prompt_id) {
                    tracing::warn!(prompt_id = %prompt_id, "Generation deadline expired");
                    self.apply(SessionEvent::TimedOut);
                }
            }
        }
    }

    fn handle_connection_event(&mut self, event: ConnectionEvent) {
        let msg = match event {
            ConnectionEvent::Message(msg) => msg,
            other => {
                tracing::debug!(event = ?other, "Connection lifecycle event");
                return;
            }
        };

        match route(&msg, self.session.prompt_id.as_deref()) {
            Route::Session(event) => self.apply(event),
            Route::Global => {
                tracing::debug!(kind = msg.kind(), message = ?msg, "Engine-wide event");
            }
            Route::Connection => {}
            Route::Foreign => {
                tracing::trace!(kind = msg.kind(), prompt_id = ?msg.prompt_id(), "Ignoring event for another job");
            }
        }
    }

    async fn submit(&mut self, request: GenerateRequest) -> Result<SessionHandle, SessionError> {
        self.stop_job();
        self.session = Session::idle();
        self.publish();
        // Handles of an unfinished previous job now observe the new id.
        self.outcome_tx = None;

        let response = match self.api.generate(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(session_id = %self.session.id, error = %e, "Generation submission failed");
                return Err(SessionError::Submission(e));
            }
        };

        self.apply(SessionEvent::Submitted {
            prompt_id: response.prompt_id.clone(),
            queue_position: response.number,
        });
        tracing::info!(
            session_id = %self.session.id,
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Generation queued",
        );

        self.start_job(response.prompt_id.clone());
        if let Some(connection) = &self.connection {
            connection.connect();
        }

        let (outcome_tx, outcome) = watch::channel(None);
        self.outcome_tx = Some(outcome_tx);

        Ok(SessionHandle {
            session_id: self.session.id,
            prompt_id: response.prompt_id,
            updates: self.snapshot_tx.subscribe(),
            outcome,
        })
    }

    fn cancel_job(&mut self) -> Result<(), SessionError> {
        if !self.session.state.is_active() {
            return Err(SessionError::NotActive);
        }
        self.apply(SessionEvent::Cancelled);

        let api = Arc::clone(&self.api);
        let prompt_id = self.session.prompt_id.clone().unwrap_or_default();
        tokio::spawn(async move {
            if let Err(e) = api.interrupt().await {
                tracing::warn!(prompt_id = %prompt_id, error = %e, "Interrupt request failed");
            }
        });
        Ok(())
    }

    /// Run the reducer and publish the result if anything changed.
    fn apply(&mut self, event: SessionEvent) {
        let Some(next) = reduce(&self.session, &event) else {
            tracing::trace!(?event, state = self.session.state.as_str(), "Event ignored");
            return;
        };

        let previous = self.session.state;
        self.session = next;
        if previous != self.session.state {
            tracing::debug!(
                session_id = %self.session.id,
                from = previous.as_str(),
                to = self.session.state.as_str(),
                "Session transition",
            );
        }

        if self.session.state.is_terminal() {
            self.stop_job();
            tracing::info!(
                session_id = %self.session.id,
                prompt_id = ?self.session.prompt_id,
                state = self.session.state.as_str(),
                images = self.session.results.len(),
                error = ?self.session.error,
                "Generation finished",
            );
            if let Some(outcome_tx) = &self.outcome_tx {
                outcome_tx.send_replace(Some(self.session.clone()));
            }
        }
        self.publish();
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.session.clone());
    }

    /// Spawn the poller and deadline timer for `prompt_id`.
    fn start_job(&mut self, prompt_id: PromptId) {
        let job = self.cancel.child_token();

        tokio::spawn(run_poller(
            Arc::clone(&self.api),
            prompt_id.clone(),
            self.config.poll_interval,
            job.clone(),
            self.inputs_tx.clone(),
        ));

        let deadline = self.config.deadline;
        let inputs = self.inputs_tx.clone();
        let token = job.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    let _ = inputs.send(Input::Deadline { prompt_id });
                }
            }
        });

        self.job = Some(job);
    }

    fn stop_job(&mut self) {
        if let Some(job) = self.job.take() {
            job.cancel();
        }
    }
}

async fn next_event(
    events: &mut Option<broadcast::Receiver<ConnectionEvent>>,
) -> Result<ConnectionEvent, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}
