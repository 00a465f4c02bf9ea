//! Explicit spec constraint checks, one function per resource kind.
//!
//! These run as the first pipeline step of every command. Constraint
//! violations name the offending field path; missing required references
//! are a distinct variant so the RPC boundary can map them to
//! `FAILED_PRECONDITION` instead of `INVALID_ARGUMENT`.

use url::Url;

use crate::resource::ValidationError;
use crate::v1::{
    Agent, AgentExecution, AgentInstance, Environment, ExecutionContext, OwnerScope, Session,
    Skill, Workflow, WorkflowExecution, WorkflowInstance, workflow_task,
};

/// Longest HTTP task timeout we accept, in seconds.
const MAX_HTTP_TIMEOUT_SECS: u32 = 300;

fn owner_scope(metadata: Option<&crate::v1::Metadata>) -> OwnerScope {
    metadata.map_or(OwnerScope::Unspecified, |m| m.owner_scope())
}

/// Validate an [`Agent`] spec.
pub fn agent(resource: &Agent) -> Result<(), ValidationError> {
    let spec = resource
        .spec
        .as_ref()
        .ok_or_else(|| ValidationError::constraint("spec", "is required"))?;
    if spec.instructions.trim().is_empty() {
        return Err(ValidationError::constraint(
            "spec.instructions",
            "must not be empty",
        ));
    }
    for (i, server) in spec.mcp_servers.iter().enumerate() {
        if server.name.is_empty() {
            return Err(ValidationError::constraint(
                format!("spec.mcp_servers[{i}].name"),
                "must not be empty",
            ));
        }
    }
    Ok(())
}

/// Validate an [`AgentInstance`] spec.
pub fn agent_instance(resource: &AgentInstance) -> Result<(), ValidationError> {
    let spec = resource
        .spec
        .as_ref()
        .ok_or_else(|| ValidationError::constraint("spec", "is required"))?;
    if spec.agent_id.is_empty() {
        return Err(ValidationError::constraint(
            "spec.agent_id",
            "must not be empty",
        ));
    }
    Ok(())
}

/// Validate a [`Session`] spec and owner scope.
pub fn session(resource: &Session) -> Result<(), ValidationError> {
    if owner_scope(resource.metadata.as_ref()) == OwnerScope::Platform {
        return Err(ValidationError::constraint(
            "metadata.owner_scope",
            "sessions cannot be platform-scoped",
        ));
    }
    let spec = resource
        .spec
        .as_ref()
        .ok_or_else(|| ValidationError::constraint("spec", "is required"))?;
    if spec.agent_instance_id.is_empty() {
        return Err(ValidationError::constraint(
            "spec.agent_instance_id",
            "must not be empty",
        ));
    }
    Ok(())
}

/// Validate a [`Workflow`] spec: document fields and every task.
pub fn workflow(resource: &Workflow) -> Result<(), ValidationError> {
    let spec = resource
        .spec
        .as_ref()
        .ok_or_else(|| ValidationError::constraint("spec", "is required"))?;

    if spec.namespace.is_empty() {
        return Err(ValidationError::constraint(
            "spec.namespace",
            "must not be empty",
        ));
    }
    if spec.version.is_empty() {
        return Err(ValidationError::constraint(
            "spec.version",
            "must not be empty",
        ));
    }
    if spec.tasks.is_empty() {
        return Err(ValidationError::constraint(
            "spec.tasks",
            "workflow must declare at least one task",
        ));
    }

    let mut seen = std::collections::HashSet::new();
    for (i, task) in spec.tasks.iter().enumerate() {
        let path = format!("spec.tasks[{i}]");
        if task.name.is_empty() {
            return Err(ValidationError::constraint(
                format!("{path}.name"),
                "must not be empty",
            ));
        }
        if !seen.insert(task.name.as_str()) {
            return Err(ValidationError::constraint(
                format!("{path}.name"),
                format!("duplicate task name '{}'", task.name),
            ));
        }
        match &task.kind {
            Some(workflow_task::Kind::Http(http)) => {
                if Url::parse(&http.url).is_err() {
                    return Err(ValidationError::constraint(
                        format!("{path}.http.url"),
                        format!("'{}' is not a valid URL", http.url),
                    ));
                }
                if http.timeout_seconds > MAX_HTTP_TIMEOUT_SECS {
                    return Err(ValidationError::constraint(
                        format!("{path}.http.timeout_seconds"),
                        format!("must be at most {MAX_HTTP_TIMEOUT_SECS}"),
                    ));
                }
            }
            Some(workflow_task::Kind::Set(set)) => {
                if set.values.is_empty() {
                    return Err(ValidationError::constraint(
                        format!("{path}.set.values"),
                        "must set at least one value",
                    ));
                }
            }
            None => {
                return Err(ValidationError::constraint(
                    path,
                    "task must declare a kind (http or set)",
                ));
            }
        }
    }
    Ok(())
}

/// Validate a [`WorkflowInstance`] spec.
pub fn workflow_instance(resource: &WorkflowInstance) -> Result<(), ValidationError> {
    let spec = resource
        .spec
        .as_ref()
        .ok_or_else(|| ValidationError::constraint("spec", "is required"))?;
    if spec.workflow_id.is_empty() {
        return Err(ValidationError::constraint(
            "spec.workflow_id",
            "must not be empty",
        ));
    }
    Ok(())
}

/// Validate a [`WorkflowExecution`] spec, owner scope, and target reference.
pub fn workflow_execution(resource: &WorkflowExecution) -> Result<(), ValidationError> {
    if owner_scope(resource.metadata.as_ref()) == OwnerScope::Platform {
        return Err(ValidationError::constraint(
            "metadata.owner_scope",
            "workflow executions cannot be platform-scoped",
        ));
    }
    let spec = resource
        .spec
        .as_ref()
        .ok_or_else(|| ValidationError::constraint("spec", "is required"))?;
    if spec.workflow_id.is_empty() && spec.workflow_instance_id.is_empty() {
        return Err(ValidationError::MissingReference(
            "either spec.workflow_id or spec.workflow_instance_id is required".to_owned(),
        ));
    }
    Ok(())
}

/// Validate an [`AgentExecution`] spec and target reference.
pub fn agent_execution(resource: &AgentExecution) -> Result<(), ValidationError> {
    let spec = resource
        .spec
        .as_ref()
        .ok_or_else(|| ValidationError::constraint("spec", "is required"))?;
    if spec.agent_id.is_empty() && spec.agent_instance_id.is_empty() {
        return Err(ValidationError::MissingReference(
            "either spec.agent_id or spec.agent_instance_id is required".to_owned(),
        ));
    }
    if spec.initial_message.trim().is_empty() {
        return Err(ValidationError::constraint(
            "spec.initial_message",
            "must not be empty",
        ));
    }
    Ok(())
}

/// Validate an [`ExecutionContext`] spec and owner scope.
pub fn execution_context(resource: &ExecutionContext) -> Result<(), ValidationError> {
    if owner_scope(resource.metadata.as_ref()) != OwnerScope::Unspecified {
        return Err(ValidationError::constraint(
            "metadata.owner_scope",
            "execution contexts must leave owner scope unspecified",
        ));
    }
    let spec = resource
        .spec
        .as_ref()
        .ok_or_else(|| ValidationError::constraint("spec", "is required"))?;
    if spec.execution_id.is_empty() {
        return Err(ValidationError::constraint(
            "spec.execution_id",
            "must not be empty",
        ));
    }
    Ok(())
}

/// Validate an [`Environment`] spec.
pub fn environment(resource: &Environment) -> Result<(), ValidationError> {
    let spec = resource
        .spec
        .as_ref()
        .ok_or_else(|| ValidationError::constraint("spec", "is required"))?;
    for key in spec.variables.keys() {
        if key.is_empty() {
            return Err(ValidationError::constraint(
                "spec.variables",
                "variable names must not be empty",
            ));
        }
    }
    Ok(())
}

/// Validate a [`Skill`] spec.
pub fn skill(resource: &Skill) -> Result<(), ValidationError> {
    let spec = resource
        .spec
        .as_ref()
        .ok_or_else(|| ValidationError::constraint("spec", "is required"))?;
    if spec.markdown_content.trim().is_empty() {
        return Err(ValidationError::constraint(
            "spec.markdown_content",
            "must not be empty",
        ));
    }
    Ok(())
}
