//! Stable names and id prefixes per resource kind.
//!
//! The store keys resources by these names and the id generator uses the
//! prefixes. Both derive from the same [`ResourceKind`] enum the kind
//! registry reads from service options, so the two can never drift apart.

use crate::v1::ResourceKind;

impl ResourceKind {
    /// Stable storage namespace name for this kind.
    #[must_use]
    pub fn kind_key(self) -> &'static str {
        match self {
            Self::Unspecified => "unspecified",
            Self::Agent => "agent",
            Self::AgentInstance => "agent-instance",
            Self::Session => "session",
            Self::Workflow => "workflow",
            Self::WorkflowInstance => "workflow-instance",
            Self::WorkflowExecution => "workflow-execution",
            Self::AgentExecution => "agent-execution",
            Self::ExecutionContext => "execution-context",
            Self::Environment => "environment",
            Self::Skill => "skill",
        }
    }

    /// Resource id prefix for this kind.
    #[must_use]
    pub fn id_prefix(self) -> &'static str {
        match self {
            Self::Unspecified => "unk",
            Self::Agent => "agt",
            Self::AgentInstance => "ain",
            Self::Session => "ses",
            Self::Workflow => "wfl",
            Self::WorkflowInstance => "wfi",
            Self::WorkflowExecution => "wfe",
            Self::AgentExecution => "aex",
            Self::ExecutionContext => "exc",
            Self::Environment => "env",
            Self::Skill => "skl",
        }
    }

    /// Human-readable kind name for error messages.
    #[must_use]
    pub fn display_name(self) -> &'static str {
        match self {
            Self::Unspecified => "Resource",
            Self::Agent => "Agent",
            Self::AgentInstance => "AgentInstance",
            Self::Session => "Session",
            Self::Workflow => "Workflow",
            Self::WorkflowInstance => "WorkflowInstance",
            Self::WorkflowExecution => "WorkflowExecution",
            Self::AgentExecution => "AgentExecution",
            Self::ExecutionContext => "ExecutionContext",
            Self::Environment => "Environment",
            Self::Skill => "Skill",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_keys_are_unique() {
        let kinds = [
            ResourceKind::Agent,
            ResourceKind::AgentInstance,
            ResourceKind::Session,
            ResourceKind::Workflow,
            ResourceKind::WorkflowInstance,
            ResourceKind::WorkflowExecution,
            ResourceKind::AgentExecution,
            ResourceKind::ExecutionContext,
            ResourceKind::Environment,
            ResourceKind::Skill,
        ];
        let mut keys: Vec<_> = kinds.iter().map(|k| k.kind_key()).collect();
        keys.sort_unstable();
        keys.dedup();
        assert_eq!(keys.len(), kinds.len());

        let mut prefixes: Vec<_> = kinds.iter().map(|k| k.id_prefix()).collect();
        prefixes.sort_unstable();
        prefixes.dedup();
        assert_eq!(prefixes.len(), kinds.len());
    }
}
