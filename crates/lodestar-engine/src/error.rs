//! Engine integration error types.

use thiserror::Error;

use crate::dsl::DslError;

/// Errors from engine calls, workflow orchestration, and the task worker.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine endpoint could not be reached.
    #[error("engine transport error: {0}")]
    Transport(String),

    /// The engine rejected a call.
    #[error("engine call failed: {0}")]
    Rpc(#[from] tonic::Status),

    /// No healthy engine connection is available right now.
    #[error("workflow engine unavailable — retry shortly")]
    Unavailable,

    /// A payload could not be encoded or decoded.
    #[error("payload serialization failed: {0}")]
    Serialization(String),

    /// The user workflow failed structural validation.
    #[error("workflow validation failed at {}: {}", .0.path, .0.message)]
    WorkflowInvalid(DslError),

    /// The validation workflow itself could not run (worker not polling,
    /// engine timeout). Distinct from a user validation failure: the fix
    /// is restarting the daemon, not editing the workflow.
    #[error("workflow validation system error: {0}")]
    ValidationSystem(String),

    /// A started workflow reported failure.
    #[error("workflow '{workflow_id}' failed: {reason}")]
    WorkflowFailed {
        /// Engine workflow id.
        workflow_id: String,
        /// Failure reason from the engine.
        reason: String,
    },
}

/// Result alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
