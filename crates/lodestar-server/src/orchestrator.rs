//! Execution orchestration: bridges resource-level Execute requests to
//! durable engine workflows.

use std::sync::Arc;

use tonic::Status;
use tracing::{info, warn};

use lodestar_engine::dsl::{self, WorkflowDoc};
use lodestar_engine::queues::{
    TASK_QUEUE_EXECUTION, TASK_QUEUE_WORKFLOW_RUN, WORKFLOW_TYPE_AGENT_EXECUTION,
    WORKFLOW_TYPE_WORKFLOW_EXECUTION,
};
use lodestar_engine::worker::{AgentRunInput, WorkflowRunInput};
use lodestar_engine::{ConnectionSupervisor, EngineError, WorkflowCreator};
use lodestar_proto::v1::WorkflowSpec;

/// Starts engine workflows for execution resources and runs the workflow
/// validation workflow for `Workflow.Apply`.
pub struct ExecutionOrchestrator {
    connection: Arc<ConnectionSupervisor>,
}

impl ExecutionOrchestrator {
    /// Build the orchestrator over the supervised engine connection.
    #[must_use]
    pub fn new(connection: Arc<ConnectionSupervisor>) -> Self {
        Self { connection }
    }

    /// The connection supervisor, for status reporting.
    #[must_use]
    pub fn connection(&self) -> &Arc<ConnectionSupervisor> {
        &self.connection
    }

    /// The workflow creator, or `Unavailable` when the engine connection
    /// is down. Execution creation must fail fast here — a resource left
    /// in PENDING with no backing workflow would be stuck forever.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` while the engine connection is not healthy.
    pub async fn require_creator(&self) -> Result<Arc<WorkflowCreator>, Status> {
        self.connection
            .workflow_creator()
            .await
            .ok_or_else(|| Status::unavailable("workflow engine unavailable — retry shortly"))
    }

    /// Start the durable workflow backing an agent execution.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the engine is down or the start fails.
    pub async fn start_agent_execution(&self, execution_id: &str) -> Result<String, Status> {
        let creator = self.require_creator().await?;
        let input = serde_json::to_string(&AgentRunInput {
            execution_id: execution_id.to_owned(),
        })
        .map_err(|e| Status::internal(e.to_string()))?;

        let run_id = creator
            .start_execution(
                WORKFLOW_TYPE_AGENT_EXECUTION,
                TASK_QUEUE_EXECUTION,
                execution_id,
                input,
            )
            .await
            .map_err(engine_unavailable)?;
        info!(execution_id, run_id = %run_id, "agent execution workflow started");
        Ok(run_id)
    }

    /// Start the durable workflow backing a workflow execution.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` when the engine is down or the start fails.
    pub async fn start_workflow_execution(
        &self,
        execution_id: &str,
        doc: WorkflowDoc,
    ) -> Result<String, Status> {
        let creator = self.require_creator().await?;
        let input = serde_json::to_string(&WorkflowRunInput {
            execution_id: execution_id.to_owned(),
            doc,
        })
        .map_err(|e| Status::internal(e.to_string()))?;

        let run_id = creator
            .start_execution(
                WORKFLOW_TYPE_WORKFLOW_EXECUTION,
                TASK_QUEUE_WORKFLOW_RUN,
                execution_id,
                input,
            )
            .await
            .map_err(engine_unavailable)?;
        info!(execution_id, run_id = %run_id, "workflow execution workflow started");
        Ok(run_id)
    }

    /// Validate a user workflow through the engine-hosted validation
    /// workflow before the resource is accepted.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` with the offending path for user errors;
    /// - `Unavailable` when no engine connection exists;
    /// - `Internal` ("validation system error") when the validation
    ///   workflow could not run — a daemon health problem, not a user one.
    pub async fn validate_workflow(&self, slug: &str, spec: &WorkflowSpec) -> Result<(), Status> {
        let creator = self.require_creator().await?;
        let doc = dsl::from_spec(slug, spec)
            .map_err(|e| Status::invalid_argument(format!("{}: {}", e.path, e.message)))?;

        match creator.validate_document(&doc).await {
            Ok(()) => Ok(()),
            Err(EngineError::WorkflowInvalid(error)) => Err(Status::invalid_argument(format!(
                "{}: {}",
                error.path, error.message
            ))),
            Err(EngineError::ValidationSystem(cause)) => {
                warn!(cause = %cause, "workflow validation system error");
                Err(Status::internal(format!("validation system error: {cause}")))
            }
            Err(other) => Err(Status::internal(format!("validation system error: {other}"))),
        }
    }

    /// Build the DSL document for a workflow spec without engine round
    /// trips. Used when starting workflow executions.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for documents that fail conversion.
    pub fn document_for(&self, slug: &str, spec: &WorkflowSpec) -> Result<WorkflowDoc, Status> {
        dsl::from_spec(slug, spec)
            .map_err(|e| Status::invalid_argument(format!("{}: {}", e.path, e.message)))
    }
}

fn engine_unavailable(e: EngineError) -> Status {
    warn!(error = %e, "engine workflow start failed");
    Status::unavailable(format!("workflow engine unavailable — {e}"))
}

impl std::fmt::Debug for ExecutionOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionOrchestrator").finish_non_exhaustive()
    }
}
