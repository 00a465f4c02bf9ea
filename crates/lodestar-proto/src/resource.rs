//! The [`ApiResource`] trait: typed access to the resource envelope.
//!
//! Where the control plane needs to treat resources generically — slug
//! resolution, duplicate checks, status preservation, audit rewriting — it
//! goes through this trait instead of reflection. Each operation is narrow
//! and named; handlers stay strongly typed end to end.

use thiserror::Error;

use crate::v1::{
    Agent, AgentExecution, AgentExecutionStatus, AgentInstance, AgentInstanceStatus, AgentStatus,
    AuditInfo, Environment, EnvironmentStatus, ExecutionContext, ExecutionContextStatus,
    ExecutionPhase, InstancePhase, Metadata, ResourceAudit, ResourceKind, Session, SessionStatus,
    Skill, SkillStatus, Workflow, WorkflowExecution, WorkflowExecutionStatus, WorkflowInstance,
    WorkflowInstanceStatus, WorkflowStatus,
};
use crate::validate;

/// A resource spec constraint violation.
#[derive(Debug, Clone, Error)]
pub enum ValidationError {
    /// A field failed its constraint. Maps to `INVALID_ARGUMENT`.
    #[error("{field}: {message}")]
    Constraint {
        /// Path of the offending field, e.g. `spec.tasks[1].http.url`.
        field: String,
        /// What went wrong.
        message: String,
    },

    /// A required reference is absent. Maps to `FAILED_PRECONDITION`.
    #[error("{0}")]
    MissingReference(String),
}

impl ValidationError {
    /// Build a constraint violation for the given field path.
    #[must_use]
    pub fn constraint(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Constraint {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Typed envelope operations shared by every resource kind.
pub trait ApiResource: prost::Message + Clone + Default + 'static {
    /// The kind of this resource type.
    const KIND: ResourceKind;

    /// The metadata block, if present.
    fn metadata(&self) -> Option<&Metadata>;

    /// Mutable metadata, inserted as default when absent.
    fn metadata_mut(&mut self) -> &mut Metadata;

    /// Drop any client-supplied status. Status is system state.
    fn clear_status(&mut self);

    /// Replace this resource's entire status with the existing resource's
    /// status, verbatim. The single load-bearing move of `BuildUpdateState`.
    fn copy_status_from(&mut self, existing: &Self);

    /// Mutable spec audit, materializing the status/audit path as needed.
    fn spec_audit_mut(&mut self) -> &mut AuditInfo;

    /// Mutable status audit, materializing the status/audit path as needed.
    fn status_audit_mut(&mut self) -> &mut AuditInfo;

    /// Set the kind's initial lifecycle phase, where the kind has one.
    fn set_initial_phase(&mut self) {}

    /// Check spec constraints. Runs first in every command pipeline.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first violated
    /// constraint.
    fn validate(&self) -> Result<(), ValidationError>;
}

macro_rules! impl_api_resource {
    ($resource:ty, $status:ty, $kind:expr, $validate:path) => {
        impl ApiResource for $resource {
            const KIND: ResourceKind = $kind;

            fn metadata(&self) -> Option<&Metadata> {
                self.metadata.as_ref()
            }

            fn metadata_mut(&mut self) -> &mut Metadata {
                self.metadata.get_or_insert_with(Metadata::default)
            }

            fn clear_status(&mut self) {
                self.status = None;
            }

            fn copy_status_from(&mut self, existing: &Self) {
                self.status = existing.status.clone();
            }

            fn spec_audit_mut(&mut self) -> &mut AuditInfo {
                let status = self.status.get_or_insert_with(<$status>::default);
                let audit = status.audit.get_or_insert_with(ResourceAudit::default);
                audit.spec_audit.get_or_insert_with(AuditInfo::default)
            }

            fn status_audit_mut(&mut self) -> &mut AuditInfo {
                let status = self.status.get_or_insert_with(<$status>::default);
                let audit = status.audit.get_or_insert_with(ResourceAudit::default);
                audit.status_audit.get_or_insert_with(AuditInfo::default)
            }

            fn validate(&self) -> Result<(), ValidationError> {
                $validate(self)
            }
        }
    };
    ($resource:ty, $status:ty, $kind:expr, $validate:path, initial_phase: $setter:expr) => {
        impl ApiResource for $resource {
            const KIND: ResourceKind = $kind;

            fn metadata(&self) -> Option<&Metadata> {
                self.metadata.as_ref()
            }

            fn metadata_mut(&mut self) -> &mut Metadata {
                self.metadata.get_or_insert_with(Metadata::default)
            }

            fn clear_status(&mut self) {
                self.status = None;
            }

            fn copy_status_from(&mut self, existing: &Self) {
                self.status = existing.status.clone();
            }

            fn spec_audit_mut(&mut self) -> &mut AuditInfo {
                let status = self.status.get_or_insert_with(<$status>::default);
                let audit = status.audit.get_or_insert_with(ResourceAudit::default);
                audit.spec_audit.get_or_insert_with(AuditInfo::default)
            }

            fn status_audit_mut(&mut self) -> &mut AuditInfo {
                let status = self.status.get_or_insert_with(<$status>::default);
                let audit = status.audit.get_or_insert_with(ResourceAudit::default);
                audit.status_audit.get_or_insert_with(AuditInfo::default)
            }

            fn set_initial_phase(&mut self) {
                let status = self.status.get_or_insert_with(<$status>::default);
                let setter: fn(&mut $status) = $setter;
                setter(status);
            }

            fn validate(&self) -> Result<(), ValidationError> {
                $validate(self)
            }
        }
    };
}

impl_api_resource!(Agent, AgentStatus, ResourceKind::Agent, validate::agent);

impl_api_resource!(
    AgentInstance,
    AgentInstanceStatus,
    ResourceKind::AgentInstance,
    validate::agent_instance,
    initial_phase: |s| s.set_phase(InstancePhase::Ready)
);

impl_api_resource!(Session, SessionStatus, ResourceKind::Session, validate::session);

impl_api_resource!(Workflow, WorkflowStatus, ResourceKind::Workflow, validate::workflow);

impl_api_resource!(
    WorkflowInstance,
    WorkflowInstanceStatus,
    ResourceKind::WorkflowInstance,
    validate::workflow_instance,
    initial_phase: |s| s.set_phase(InstancePhase::Ready)
);

impl_api_resource!(
    WorkflowExecution,
    WorkflowExecutionStatus,
    ResourceKind::WorkflowExecution,
    validate::workflow_execution,
    initial_phase: |s| s.set_phase(ExecutionPhase::Pending)
);

impl_api_resource!(
    AgentExecution,
    AgentExecutionStatus,
    ResourceKind::AgentExecution,
    validate::agent_execution,
    initial_phase: |s| s.set_phase(ExecutionPhase::Pending)
);

impl_api_resource!(
    ExecutionContext,
    ExecutionContextStatus,
    ResourceKind::ExecutionContext,
    validate::execution_context
);

impl_api_resource!(
    Environment,
    EnvironmentStatus,
    ResourceKind::Environment,
    validate::environment
);

impl_api_resource!(Skill, SkillStatus, ResourceKind::Skill, validate::skill);

impl ExecutionPhase {
    /// Whether this phase ends the execution.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}
