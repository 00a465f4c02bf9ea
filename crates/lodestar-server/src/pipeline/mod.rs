//! The request pipeline: a named, ordered sequence of steps executed once
//! per RPC over a typed context.
//!
//! Step order is load-bearing and deterministic:
//! - validate first (reject malformed input before touching the store);
//! - slug before duplicate (the uniqueness key must exist to be checked);
//! - load-existing before build-update-state (the loaded resource is the
//!   source for status preservation);
//! - persist last (never persist partial state).

pub mod steps;

use lodestar_core::Actor;
use lodestar_proto::v1::ResourceKind;
use lodestar_proto::{ApiResource, ValidationError};
use lodestar_store::ResourceStore;

/// Error kind produced by a step, before step-name annotation.
#[derive(Debug, thiserror::Error)]
pub enum StepError {
    /// Input failed spec constraints.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Slug conflict within `(kind, org)`.
    #[error("{0}")]
    Conflict(String),

    /// The referenced resource does not exist.
    #[error("{0}")]
    NotFound(String),

    /// A precondition on the request shape failed.
    #[error("{0}")]
    Precondition(String),

    /// A dependency of the control plane is down.
    #[error("{0}")]
    Unavailable(String),

    /// Store failure, context misuse, or another internal fault.
    #[error("{0}")]
    Internal(String),
}

impl From<lodestar_store::StoreError> for StepError {
    fn from(e: lodestar_store::StoreError) -> Self {
        match e {
            lodestar_store::StoreError::NotFound { kind, id } => {
                Self::NotFound(format!("{kind} '{id}' not found"))
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

/// A step error annotated with the step that produced it.
#[derive(Debug, thiserror::Error)]
#[error("step '{step}' failed: {source}")]
pub struct PipelineError {
    /// Name of the failing step.
    pub step: &'static str,
    /// The underlying error.
    #[source]
    pub source: StepError,
}

impl PipelineError {
    /// Translate to a gRPC status. Called exactly once, at the RPC
    /// boundary.
    #[must_use]
    pub fn into_status(self) -> tonic::Status {
        match self.source {
            StepError::Validation(ValidationError::Constraint { field, message }) => {
                tonic::Status::invalid_argument(format!("{field}: {message}"))
            }
            StepError::Validation(ValidationError::MissingReference(message))
            | StepError::Precondition(message) => tonic::Status::failed_precondition(message),
            StepError::Conflict(message) => tonic::Status::already_exists(message),
            StepError::NotFound(message) => tonic::Status::not_found(message),
            StepError::Unavailable(message) => tonic::Status::unavailable(message),
            StepError::Internal(message) => {
                tracing::error!(step = self.step, error = %message, "internal pipeline failure");
                tonic::Status::internal(message)
            }
        }
    }
}

/// Typed per-request context carried through every step.
pub struct RequestContext<R: ApiResource> {
    /// Resource kind, extracted by the kind middleware.
    pub kind: ResourceKind,
    /// Actor recorded in audit fields.
    pub actor: Actor,
    /// The store handle.
    pub store: ResourceStore,
    /// Client-supplied message. Read-only for semantic fields; slug
    /// normalization may mutate it.
    pub input: R,
    /// The resource being built or updated. Seeded by
    /// [`RequestContext::set_new_state`].
    pub new_state: Option<R>,
    /// Loaded existing resource (update/delete/apply paths).
    pub existing: Option<R>,
    /// Apply-path signal: create (`true`) or update (`false`).
    pub should_create: Option<bool>,
}

impl<R: ApiResource> RequestContext<R> {
    /// Build a context for one request.
    #[must_use]
    pub fn new(kind: ResourceKind, actor: Actor, store: ResourceStore, input: R) -> Self {
        Self {
            kind,
            actor,
            store,
            input,
            new_state: None,
            existing: None,
            should_create: None,
        }
    }

    /// Seed `new_state` from the input. Create/Update/Apply handlers must
    /// call this immediately after constructing the context; steps that
    /// write into `new_state` fail otherwise.
    pub fn set_new_state(&mut self) {
        self.new_state = Some(self.input.clone());
    }

    /// Mutable access to the seeded `new_state`.
    ///
    /// # Errors
    ///
    /// Fails when the handler forgot to call
    /// [`RequestContext::set_new_state`].
    pub fn new_state_mut(&mut self) -> Result<&mut R, StepError> {
        self.new_state.as_mut().ok_or_else(|| {
            StepError::Internal("new_state is not seeded; handler must call set_new_state".into())
        })
    }

    /// The seeded `new_state`, by reference.
    ///
    /// # Errors
    ///
    /// Fails when the handler forgot to call
    /// [`RequestContext::set_new_state`].
    pub fn new_state_ref(&self) -> Result<&R, StepError> {
        self.new_state.as_ref().ok_or_else(|| {
            StepError::Internal("new_state is not seeded; handler must call set_new_state".into())
        })
    }

    /// The loaded existing resource.
    ///
    /// # Errors
    ///
    /// Fails when no load step has run.
    pub fn existing_ref(&self) -> Result<&R, StepError> {
        self.existing.as_ref().ok_or_else(|| {
            StepError::Internal("existing is not loaded; a load step must run first".into())
        })
    }
}

/// One pipeline step.
#[async_trait::async_trait]
pub trait PipelineStep<R: ApiResource>: Send + Sync {
    /// Step name used in error annotation.
    fn name(&self) -> &'static str;

    /// Run the step against the context.
    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError>;
}

/// A named ordered sequence of steps.
pub struct Pipeline<R: ApiResource> {
    name: &'static str,
    steps: Vec<Box<dyn PipelineStep<R>>>,
}

impl<R: ApiResource> Pipeline<R> {
    /// Start an empty pipeline.
    #[must_use]
    pub fn named(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    /// Append a step.
    #[must_use]
    pub fn step(mut self, step: impl PipelineStep<R> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Run all steps in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// Returns the failing step's error annotated with its name.
    pub async fn run(&self, cx: &mut RequestContext<R>) -> Result<(), PipelineError> {
        for step in &self.steps {
            tracing::trace!(pipeline = self.name, step = step.name(), "running step");
            step.execute(cx).await.map_err(|source| PipelineError {
                step: step.name(),
                source,
            })?;
        }
        Ok(())
    }
}
