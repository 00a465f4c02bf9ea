//! Engine connection supervision.
//!
//! A one-time dial is not enough for a daemon that outlives engine
//! restarts: if the initial connection attempt is all there is, a
//! transient engine outage leaves the workflow creator `None` forever and
//! every execution create fails until the control plane itself is
//! restarted. The supervisor owns the connection lifecycle:
//!
//! ```text
//! Connecting ──ok──> Connected ──probe fail──> Degraded
//!     │                  ^                        │
//!     │                  └──reconnect ok──────────┘
//!     └──fatal config error──> Disconnected (permanent)
//! ```
//!
//! In `Connected`, a probe task describes the namespace every 30 s. In
//! `Degraded`, reconnection attempts pace themselves with bounded
//! exponential backoff. Reinstalling the creator takes the write lock;
//! `workflow_creator()` readers only ever take the read lock.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{RwLock, watch};
use tracing::{debug, error, info, warn};

use lodestar_core::BackoffSchedule;

use crate::client::EngineClient;
use crate::dsl::{ValidationReport, WorkflowDoc};
use crate::error::{EngineError, EngineResult};
use crate::queues::{
    NAMESPACE, TASK_QUEUE_VALIDATION, VALIDATION_TIMEOUT_SECS, WORKFLOW_TYPE_VALIDATION,
    execution_workflow_id, validation_workflow_id,
};

/// Interval between health probes while connected.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Permanently down due to a fatal configuration error.
    Disconnected,
    /// Initial dial in progress.
    Connecting,
    /// Believed healthy; probes running.
    Connected,
    /// Probe failed; reconnection attempts in progress.
    Degraded,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Starts durable workflows. Only obtainable while the connection is
/// believed healthy.
pub struct WorkflowCreator {
    client: EngineClient,
}

impl WorkflowCreator {
    /// Wrap a healthy client.
    #[must_use]
    pub fn new(client: EngineClient) -> Self {
        Self { client }
    }

    /// The underlying engine client.
    #[must_use]
    pub fn client(&self) -> &EngineClient {
        &self.client
    }

    /// Start the durable workflow backing an execution resource. The
    /// workflow id derives from the execution id, so retries re-attach
    /// instead of double-starting.
    ///
    /// # Errors
    ///
    /// Returns the engine error on failure.
    pub async fn start_execution(
        &self,
        workflow_type: &str,
        task_queue: &str,
        execution_id: &str,
        input_json: String,
    ) -> EngineResult<String> {
        let workflow_id = execution_workflow_id(execution_id);
        self.client
            .start_workflow(lodestar_proto::engine::v1::StartWorkflowRequest {
                namespace: NAMESPACE.to_owned(),
                workflow_id: workflow_id.clone(),
                workflow_type: workflow_type.to_owned(),
                task_queue: task_queue.to_owned(),
                input: input_json,
                request_id: workflow_id,
                timeout_seconds: 0,
            })
            .await
    }

    /// Run the workflow validation workflow for a DSL document and wait
    /// for its verdict.
    ///
    /// # Errors
    ///
    /// - [`EngineError::WorkflowInvalid`] when the user document fails
    ///   structural validation;
    /// - [`EngineError::ValidationSystem`] when the validation workflow
    ///   could not run at all (worker not polling, engine timeout) — a
    ///   control-plane health problem, not a user error.
    pub async fn validate_document(&self, doc: &WorkflowDoc) -> EngineResult<()> {
        let input = serde_json::to_string(doc)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        let workflow_id = validation_workflow_id(&uuid::Uuid::new_v4().to_string());

        let run_id = self
            .client
            .start_workflow(lodestar_proto::engine::v1::StartWorkflowRequest {
                namespace: NAMESPACE.to_owned(),
                workflow_id: workflow_id.clone(),
                workflow_type: WORKFLOW_TYPE_VALIDATION.to_owned(),
                task_queue: TASK_QUEUE_VALIDATION.to_owned(),
                input,
                request_id: workflow_id.clone(),
                timeout_seconds: VALIDATION_TIMEOUT_SECS,
            })
            .await
            .map_err(|e| EngineError::ValidationSystem(e.to_string()))?;

        let result = self
            .client
            .get_workflow_result(&workflow_id, &run_id, VALIDATION_TIMEOUT_SECS)
            .await
            .map_err(|e| EngineError::ValidationSystem(e.to_string()))?;

        if !result.completed {
            return Err(EngineError::ValidationSystem(format!(
                "validation workflow did not complete within {VALIDATION_TIMEOUT_SECS}s — \
                 is the task worker polling?"
            )));
        }
        if result.failed {
            return Err(EngineError::ValidationSystem(result.error));
        }

        let report: ValidationReport = serde_json::from_str(&result.output)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;
        match report.error {
            Some(error) if !report.valid => Err(EngineError::WorkflowInvalid(error)),
            _ if !report.valid => Err(EngineError::ValidationSystem(
                "validation reported failure without detail".to_owned(),
            )),
            _ => Ok(()),
        }
    }
}

/// Supervises the engine connection and gates creator access on health.
pub struct ConnectionSupervisor {
    endpoint: String,
    state: RwLock<ConnectionState>,
    creator: RwLock<Option<Arc<WorkflowCreator>>>,
    backoff: BackoffSchedule,
    probe_interval: Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl ConnectionSupervisor {
    /// Create a supervisor for the given engine endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Arc<Self> {
        Self::with_timing(endpoint, PROBE_INTERVAL, BackoffSchedule::reconnect())
    }

    /// Create a supervisor with explicit probe/backoff timing (tests).
    #[must_use]
    pub fn with_timing(
        endpoint: impl Into<String>,
        probe_interval: Duration,
        backoff: BackoffSchedule,
    ) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            endpoint: endpoint.into(),
            state: RwLock::new(ConnectionState::Connecting),
            creator: RwLock::new(None),
            backoff,
            probe_interval,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// The workflow creator, iff the connection is believed healthy.
    pub async fn workflow_creator(&self) -> Option<Arc<WorkflowCreator>> {
        self.creator.read().await.clone()
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Dial and probe once; install a fresh creator on success.
    async fn try_connect(&self) -> bool {
        match EngineClient::connect(&self.endpoint).await {
            Ok(client) => {
                if let Err(e) = client.describe_namespace().await {
                    debug!(error = %e, "engine dialed but probe failed");
                    return false;
                }
                // Atomically reinitialize the creator under the write lock.
                *self.creator.write().await = Some(Arc::new(WorkflowCreator::new(client)));
                self.set_state(ConnectionState::Connected).await;
                info!(endpoint = %self.endpoint, "engine connection established");
                true
            }
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "engine dial failed");
                false
            }
        }
    }

    async fn drop_creator(&self) {
        *self.creator.write().await = None;
    }

    /// Run the supervision loop until [`ConnectionSupervisor::shutdown`].
    ///
    /// Spawn this as a named background task. The endpoint being
    /// syntactically invalid is fatal and parks the supervisor in
    /// `Disconnected`.
    pub async fn run(self: Arc<Self>) {
        if tonic::transport::Endpoint::from_shared(self.endpoint.clone()).is_err() {
            error!(endpoint = %self.endpoint, "invalid engine endpoint — engine integration disabled");
            self.set_state(ConnectionState::Disconnected).await;
            return;
        }

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut attempt: u32 = 0;

        loop {
            if *shutdown_rx.borrow() {
                return;
            }

            let state = self.state().await;
            match state {
                ConnectionState::Connecting | ConnectionState::Degraded => {
                    if self.try_connect().await {
                        attempt = 0;
                        continue;
                    }
                    if state == ConnectionState::Connecting {
                        // Initial dial failed; fall into degraded pacing.
                        self.set_state(ConnectionState::Degraded).await;
                    }
                    let delay = self.backoff.delay_for_attempt(attempt);
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        _ = shutdown_rx.changed() => return,
                    }
                }
                ConnectionState::Connected => {
                    tokio::select! {
                        () = tokio::time::sleep(self.probe_interval) => {}
                        _ = shutdown_rx.changed() => return,
                    }
                    let healthy = match self.workflow_creator().await {
                        Some(creator) => creator.client().describe_namespace().await.is_ok(),
                        None => false,
                    };
                    if !healthy {
                        warn!("engine health probe failed — entering degraded state");
                        self.drop_creator().await;
                        self.set_state(ConnectionState::Degraded).await;
                        attempt = 0;
                    }
                }
                ConnectionState::Disconnected => return,
            }
        }
    }

    /// Stop the supervision loop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Force an immediate probe; used by tests and `server status`.
    pub async fn probe_now(&self) -> bool {
        match self.workflow_creator().await {
            Some(creator) => creator.client().describe_namespace().await.is_ok(),
            None => false,
        }
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}
