//! Reserved engine namespace, task queues, and type names.
//!
//! Both the orchestrator (starting workflows) and the task worker (polling
//! for activities) use these constants; they are the whole of the naming
//! contract between the two processes.

/// Engine namespace all Lodestar workflows run in.
pub const NAMESPACE: &str = "lodestar";

/// Queue for agent/workflow execution orchestration activities.
pub const TASK_QUEUE_EXECUTION: &str = "lodestar-execution";

/// Queue reserved for the workflow validation activity.
pub const TASK_QUEUE_VALIDATION: &str = "lodestar-validation";

/// Queue for user workflow runs themselves.
pub const TASK_QUEUE_WORKFLOW_RUN: &str = "lodestar-workflow-run";

/// Workflow type that validates a user workflow document.
pub const WORKFLOW_TYPE_VALIDATION: &str = "workflow_validation";

/// Workflow type orchestrating one agent execution.
pub const WORKFLOW_TYPE_AGENT_EXECUTION: &str = "agent_execution";

/// Workflow type orchestrating one user workflow execution.
pub const WORKFLOW_TYPE_WORKFLOW_EXECUTION: &str = "workflow_execution";

/// Activity: structurally validate a workflow document.
pub const ACTIVITY_VALIDATE_WORKFLOW: &str = "validate_workflow";

/// Activity: drive one agent execution through the executor container.
pub const ACTIVITY_EXECUTE_AGENT: &str = "execute_agent";

/// Activity: run one user workflow's task chain.
pub const ACTIVITY_EXECUTE_WORKFLOW: &str = "execute_workflow";

/// Start-to-close timeout for the validation workflow, in seconds.
pub const VALIDATION_TIMEOUT_SECS: u32 = 30;

/// Engine workflow id for an execution resource. Deterministic so that a
/// retried create cannot start a second workflow for the same execution.
#[must_use]
pub fn execution_workflow_id(execution_id: &str) -> String {
    format!("exec::{execution_id}")
}

/// Engine workflow id for one validation request.
#[must_use]
pub fn validation_workflow_id(request_id: &str) -> String {
    format!("validate::{request_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_workflow_id_is_deterministic() {
        assert_eq!(
            execution_workflow_id("aex-123"),
            execution_workflow_id("aex-123")
        );
        assert_ne!(
            execution_workflow_id("aex-123"),
            execution_workflow_id("aex-124")
        );
    }
}
