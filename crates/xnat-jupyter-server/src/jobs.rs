//! Background start and stop jobs.
//!
//! Once a request has been accepted, the Hub call and the poll loop that
//! follows run as a [`ServerJob`] on a bounded queue served by a fixed
//! [`WorkerPool`]. Outcomes are reported only through the [`EventSink`].
//!
//! ```text
//!   orchestrator ──try_send──▶ [ bounded queue ] ──▶ worker 1..N ──▶ JobExecutor
//!                                                                      │
//!                                      HubClient ◀── submit / poll ────┤
//!                                      EventSink ◀── progress, result ─┘
//! ```
//!
//! Tests swap the queue for [`ImmediateDispatcher`], which runs each job to
//! completion inside `dispatch`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::HubPreferences;
use crate::error::{Result, ServerError};
use crate::events::{EventContext, EventSink};
use crate::hub::{server_label, HubClient};
use crate::lifecycle::{InFlight, ServerKey, ServerState};
use crate::types::{Server, XnatUserOptions};

const START_FAILED: &str = "Failed to launch Jupyter notebook server.";
const STOP_FAILED: &str = "Failed to stop Jupyter Server.";

/// Submit a start to the Hub and wait for the server to become ready.
#[derive(Debug)]
pub struct StartJob {
    /// Claim on the server, released with the outcome.
    pub claim: InFlight,
    /// Event identity.
    pub context: EventContext,
    /// Options passed to the spawner.
    pub options: XnatUserOptions,
}

/// Ask the Hub to stop a server and wait for it to disappear.
#[derive(Debug)]
pub struct StopJob {
    /// Claim on the server, released with the outcome.
    pub claim: InFlight,
    /// Event identity.
    pub context: EventContext,
}

/// Work handed to the pool.
#[derive(Debug)]
pub enum ServerJob {
    /// Start a server.
    Start(StartJob),
    /// Stop a server.
    Stop(StopJob),
}

impl ServerJob {
    /// The server the job acts on.
    #[must_use]
    pub const fn key(&self) -> &ServerKey {
        match self {
            Self::Start(job) => job.claim.key(),
            Self::Stop(job) => job.claim.key(),
        }
    }

    /// Event identity of the job.
    #[must_use]
    pub const fn context(&self) -> &EventContext {
        match self {
            Self::Start(job) => &job.context,
            Self::Stop(job) => &job.context,
        }
    }
}

/// Accepts jobs for execution.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Hand a job off.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::QueueFull` if the job cannot be accepted now. The
    /// job is dropped, which releases its claim as `Failed`.
    async fn dispatch(&self, job: ServerJob) -> Result<()>;
}

/// Drives jobs against the Hub.
pub struct JobExecutor {
    hub: Arc<dyn HubClient>,
    events: Arc<dyn EventSink>,
    preferences: Arc<HubPreferences>,
}

impl JobExecutor {
    /// Create an executor.
    #[must_use]
    pub fn new(
        hub: Arc<dyn HubClient>,
        events: Arc<dyn EventSink>,
        preferences: Arc<HubPreferences>,
    ) -> Self {
        Self {
            hub,
            events,
            preferences,
        }
    }

    /// Run a job to completion.
    pub async fn run(&self, job: ServerJob) {
        match job {
            ServerJob::Start(job) => self.start(job).await,
            ServerJob::Stop(job) => self.stop(job).await,
        }
    }

    async fn start(&self, job: StartJob) {
        let StartJob {
            claim,
            context,
            options,
        } = job;
        let ServerKey {
            username,
            servername,
        } = claim.key().clone();
        let label = server_label(&username, &servername);

        tracing::info!(server = %label, tracking_id = %context.tracking_id, "Submitting start to JupyterHub");

        if let Err(e) = self.hub.start_server(&username, &servername, &options).await {
            let message = match &e {
                ServerError::UserNotFound(_) => format!("{START_FAILED} User not found."),
                ServerError::AlreadyExists(_) => {
                    format!("{START_FAILED} A server with the same name is already running.")
                }
                other => format!("{START_FAILED} {other}"),
            };
            tracing::error!(server = %label, error = %e, "JupyterHub refused start");
            self.events.publish(context.failed(message));
            settle(claim, ServerState::Failed);
            return;
        }

        self.events.publish(
            context.progress(40, "JupyterHub is spawning notebook server container."),
        );

        match self.await_ready(&context, &username, &servername).await {
            Ok(server) => {
                tracing::info!(server = %label, url = %server.url, "Server is ready");
                self.events.publish(context.completed(format!(
                    "Jupyter notebook server is available at: {}",
                    server.url
                )));
                settle(claim, ServerState::Running);
            }
            Err(e) => {
                tracing::error!(server = %label, error = %e, "Server did not become ready");
                self.events.publish(context.failed(format!(
                    "{START_FAILED} Timeout exceeded while waiting for JupyterHub to spawn \
                     server. Check the XNAT and JupyterHub system logs for error messages."
                )));
                settle(claim, ServerState::Failed);
            }
        }
    }

    /// Poll until the server reports ready or the start timeout passes.
    ///
    /// Poll errors are logged and retried; the Hub may be mid-spawn.
    async fn await_ready(
        &self,
        context: &EventContext,
        username: &str,
        servername: &str,
    ) -> Result<Server> {
        let deadline = Instant::now() + self.preferences.start_timeout();
        let interval = self.preferences.start_polling_interval();

        loop {
            tokio::time::sleep(interval).await;

            match self.hub.get_server(username, servername).await {
                Ok(Some(server)) if server.ready => return Ok(server),
                Ok(Some(server)) => {
                    tracing::debug!(
                        server = %server_label(username, servername),
                        pending = ?server.pending,
                        "Server not ready yet"
                    );
                }
                Ok(None) => {
                    self.events
                        .publish(context.progress(45, "Waiting for JupyterHub to spawn server."));
                }
                Err(e) => {
                    tracing::warn!(server = %server_label(username, servername), error = %e, "Poll failed");
                }
            }

            if Instant::now() >= deadline {
                return Err(ServerError::Timeout(format!(
                    "{} not ready after {:?}",
                    server_label(username, servername),
                    self.preferences.start_timeout()
                )));
            }
        }
    }

    async fn stop(&self, job: StopJob) {
        let StopJob { claim, context } = job;
        let ServerKey {
            username,
            servername,
        } = claim.key().clone();
        let label = server_label(&username, &servername);

        self.events
            .publish(context.progress(50, "Sending stop request to JupyterHub."));

        if let Err(e) = self.hub.stop_server(&username, &servername).await {
            tracing::error!(server = %label, error = %e, "JupyterHub refused stop");
            self.events.publish(context.failed(STOP_FAILED));
            settle(claim, ServerState::Failed);
            return;
        }

        match self.await_absent(&username, &servername).await {
            Ok(()) => {
                tracing::info!(server = %label, "Server stopped");
                self.events.publish(context.completed("Jupyter Server Stopped."));
                settle(claim, ServerState::Idle);
            }
            Err(e) => {
                tracing::error!(server = %label, error = %e, "Server did not stop");
                self.events.publish(context.failed(STOP_FAILED));
                settle(claim, ServerState::Failed);
            }
        }
    }

    /// Poll until the Hub no longer lists the server or the stop timeout passes.
    async fn await_absent(&self, username: &str, servername: &str) -> Result<()> {
        let deadline = Instant::now() + self.preferences.stop_timeout();
        let interval = self.preferences.stop_polling_interval();

        loop {
            match self.hub.get_server(username, servername).await {
                Ok(None) => return Ok(()),
                Ok(Some(_)) => {}
                Err(e) => {
                    tracing::warn!(server = %server_label(username, servername), error = %e, "Poll failed");
                }
            }

            if Instant::now() >= deadline {
                return Err(ServerError::Timeout(format!(
                    "{} still present after {:?}",
                    server_label(username, servername),
                    self.preferences.stop_timeout()
                )));
            }
            tokio::time::sleep(interval).await;
        }
    }
}

fn settle(claim: InFlight, outcome: ServerState) {
    let key = claim.key().clone();
    if let Err(e) = claim.finish(outcome) {
        tracing::error!(server = %key, error = %e, "Failed to record server state");
    }
}

/// Runs every job inline, for tests and single-shot tools.
pub struct ImmediateDispatcher {
    executor: Arc<JobExecutor>,
}

impl ImmediateDispatcher {
    /// Create a dispatcher around `executor`.
    #[must_use]
    pub const fn new(executor: Arc<JobExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl JobDispatcher for ImmediateDispatcher {
    async fn dispatch(&self, job: ServerJob) -> Result<()> {
        self.executor.run(job).await;
        Ok(())
    }
}

/// Sending half of the worker queue.
#[derive(Clone)]
pub struct QueueDispatcher {
    sender: mpsc::Sender<ServerJob>,
}

#[async_trait]
impl JobDispatcher for QueueDispatcher {
    async fn dispatch(&self, job: ServerJob) -> Result<()> {
        let key = job.key().clone();
        self.sender.try_send(job).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                tracing::warn!(server = %key, "Worker queue is full");
                ServerError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => {
                ServerError::Internal("worker pool has shut down".into())
            }
        })
    }
}

/// Fixed set of workers draining the job queue.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` workers over a queue holding at most `capacity` jobs.
    ///
    /// Both counts are raised to at least one. The pool drains and exits once
    /// every [`QueueDispatcher`] clone is dropped.
    #[must_use]
    pub fn spawn(
        executor: Arc<JobExecutor>,
        workers: usize,
        capacity: usize,
    ) -> (QueueDispatcher, Self) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..workers.max(1))
            .map(|worker| {
                let receiver = Arc::clone(&receiver);
                let executor = Arc::clone(&executor);
                tokio::spawn(async move {
                    loop {
                        let job = receiver.lock().await.recv().await;
                        let Some(job) = job else { break };
                        tracing::debug!(
                            worker,
                            server = %job.key(),
                            tracking_id = %job.context().tracking_id,
                            "Picked up job"
                        );
                        executor.run(job).await;
                    }
                    tracing::debug!(worker, "Worker exiting");
                })
            })
            .collect();

        (QueueDispatcher { sender }, Self { workers })
    }

    /// Number of workers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether the pool has no workers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Worker panicked");
            }
        }
    }
}
