//! Resource controllers.
//!
//! One [`Api`] value implements every generated Command/Query service
//! trait. Standard kinds go through the macro-generated impls in
//! [`generic`]; Agent, Workflow, and the execution kinds add their
//! kind-specific steps (default instances, workflow validation,
//! orchestration) in their own modules.

pub mod agent;
pub mod base;
pub mod executions;
pub mod generic;
pub mod workflow;

use std::sync::Arc;

use lodestar_core::Actor;
use lodestar_proto::v1::ResourceKind;
use lodestar_store::ResourceStore;

use crate::events::ExecutionEventHub;
use crate::orchestrator::ExecutionOrchestrator;

/// Shared controller state.
#[derive(Clone)]
pub struct Ctx {
    /// The resource store.
    pub store: ResourceStore,
    /// Actor stamped into audit fields.
    pub actor: Actor,
    /// Bridges execution resources to engine workflows.
    pub orchestrator: Arc<ExecutionOrchestrator>,
    /// Execution event fan-out.
    pub hub: Arc<ExecutionEventHub>,
}

/// Implements every generated service trait.
#[derive(Clone)]
pub struct Api {
    /// Shared state.
    pub ctx: Ctx,
}

impl Api {
    /// Build the API surface over shared state.
    #[must_use]
    pub fn new(ctx: Ctx) -> Self {
        Self { ctx }
    }
}

/// Read the kind the middleware injected for this call.
///
/// # Errors
///
/// Returns `Internal` when the kind middleware is not installed: every
/// controller depends on it.
pub(crate) fn kind_from<T>(request: &tonic::Request<T>) -> Result<ResourceKind, tonic::Status> {
    request.extensions().get::<ResourceKind>().copied().ok_or_else(|| {
        tonic::Status::internal(
            "resource kind missing from request context — kind middleware not installed",
        )
    })
}

/// Unwrap the `resource` field every command request carries.
pub(crate) fn required_resource<R>(resource: Option<R>) -> Result<R, tonic::Status> {
    resource.ok_or_else(|| tonic::Status::invalid_argument("resource is required"))
}
