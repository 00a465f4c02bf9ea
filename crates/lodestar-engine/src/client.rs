//! Thin client over the engine's gRPC surface.

use std::time::Duration;

use tonic::transport::{Channel, Endpoint};
use tracing::debug;

use lodestar_proto::engine::v1::workflow_engine_client::WorkflowEngineClient;
use lodestar_proto::engine::v1::{
    CompleteActivityTaskRequest, DescribeNamespaceRequest, DescribeNamespaceResponse,
    FailActivityTaskRequest, GetWorkflowResultRequest, GetWorkflowResultResponse,
    PollActivityTaskRequest, PollActivityTaskResponse, StartWorkflowRequest,
};

use crate::error::{EngineError, EngineResult};
use crate::queues::NAMESPACE;

/// Dial timeout for the engine endpoint.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-call timeout for the health probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Engine gRPC client bound to the Lodestar namespace.
///
/// Cheap to clone; the underlying channel is shared.
#[derive(Clone)]
pub struct EngineClient {
    inner: WorkflowEngineClient<Channel>,
}

impl std::fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineClient").finish_non_exhaustive()
    }
}

impl EngineClient {
    /// Dial the engine. Blocks until the channel is usable or the connect
    /// timeout expires.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Transport`] on dial failure.
    pub async fn connect(endpoint: &str) -> EngineResult<Self> {
        let endpoint = Endpoint::from_shared(endpoint.to_owned())
            .map_err(|e| EngineError::Transport(e.to_string()))?
            .connect_timeout(CONNECT_TIMEOUT);
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| EngineError::Transport(e.to_string()))?;
        Ok(Self {
            inner: WorkflowEngineClient::new(channel),
        })
    }

    /// Wrap an already-established channel (tests).
    #[must_use]
    pub fn from_channel(channel: Channel) -> Self {
        Self {
            inner: WorkflowEngineClient::new(channel),
        }
    }

    /// Health probe: describe the Lodestar namespace with a short per-call
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns the engine error; callers treat any failure as unhealthy.
    pub async fn describe_namespace(&self) -> EngineResult<DescribeNamespaceResponse> {
        let mut request = tonic::Request::new(DescribeNamespaceRequest {
            namespace: NAMESPACE.to_owned(),
        });
        request.set_timeout(PROBE_TIMEOUT);
        let response = self.inner.clone().describe_namespace(request).await?;
        Ok(response.into_inner())
    }

    /// Start (or idempotently re-attach to) a workflow.
    ///
    /// # Errors
    ///
    /// Returns the engine error on failure.
    pub async fn start_workflow(&self, request: StartWorkflowRequest) -> EngineResult<String> {
        debug!(
            workflow_id = %request.workflow_id,
            workflow_type = %request.workflow_type,
            task_queue = %request.task_queue,
            "starting engine workflow"
        );
        let response = self.inner.clone().start_workflow(request).await?;
        Ok(response.into_inner().run_id)
    }

    /// Long-poll a workflow's result.
    ///
    /// # Errors
    ///
    /// Returns the engine error on failure.
    pub async fn get_workflow_result(
        &self,
        workflow_id: &str,
        run_id: &str,
        wait_seconds: u32,
    ) -> EngineResult<GetWorkflowResultResponse> {
        let response = self
            .inner
            .clone()
            .get_workflow_result(GetWorkflowResultRequest {
                namespace: NAMESPACE.to_owned(),
                workflow_id: workflow_id.to_owned(),
                run_id: run_id.to_owned(),
                wait_seconds,
            })
            .await?;
        Ok(response.into_inner())
    }

    /// Long-poll for an activity task on a queue. An empty task token in
    /// the response means the poll timed out with no work.
    ///
    /// # Errors
    ///
    /// Returns the engine error on failure.
    pub async fn poll_activity_task(
        &self,
        task_queue: &str,
        identity: &str,
    ) -> EngineResult<PollActivityTaskResponse> {
        let response = self
            .inner
            .clone()
            .poll_activity_task(PollActivityTaskRequest {
                namespace: NAMESPACE.to_owned(),
                task_queue: task_queue.to_owned(),
                identity: identity.to_owned(),
            })
            .await?;
        Ok(response.into_inner())
    }

    /// Report an activity as completed.
    ///
    /// # Errors
    ///
    /// Returns the engine error on failure.
    pub async fn complete_activity_task(
        &self,
        task_token: Vec<u8>,
        result: String,
    ) -> EngineResult<()> {
        self.inner
            .clone()
            .complete_activity_task(CompleteActivityTaskRequest { task_token, result })
            .await?;
        Ok(())
    }

    /// Report an activity as failed.
    ///
    /// # Errors
    ///
    /// Returns the engine error on failure.
    pub async fn fail_activity_task(
        &self,
        task_token: Vec<u8>,
        error: String,
        non_retryable: bool,
    ) -> EngineResult<()> {
        self.inner
            .clone()
            .fail_activity_task(FailActivityTaskRequest {
                task_token,
                error,
                non_retryable,
            })
            .await?;
        Ok(())
    }
}
