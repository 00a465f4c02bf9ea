//! The reusable steps library.
//!
//! All steps are kind-agnostic: they see resources through the
//! [`ApiResource`] trait and read the kind from the request context.

use async_trait::async_trait;
use chrono::Utc;

use lodestar_core::{new_prefixed_id, slugify};
use lodestar_proto::{ApiResource, ValidationError};

use super::{PipelineStep, RequestContext, StepError};

/// Run the input's explicit spec constraint checks.
pub struct ValidateInput;

#[async_trait]
impl<R: ApiResource> PipelineStep<R> for ValidateInput {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError> {
        cx.input.validate()?;
        Ok(())
    }
}

/// Derive `metadata.slug` from `metadata.name` when absent, and reject
/// malformed client-supplied slugs.
pub struct ResolveSlug;

#[async_trait]
impl<R: ApiResource> PipelineStep<R> for ResolveSlug {
    fn name(&self) -> &'static str {
        "resolve-slug"
    }

    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError> {
        // Touch new_state first so a missing set_new_state call fails here
        // with a clear message rather than deeper in the pipeline.
        if cx.new_state_ref()?.metadata().is_none() {
            return Err(ValidationError::constraint("metadata", "is required").into());
        }

        let metadata = cx.new_state_mut()?.metadata_mut();
        if metadata.slug.is_empty() {
            if metadata.name.is_empty() {
                return Err(ValidationError::constraint(
                    "metadata.name",
                    "either name or slug must be set",
                )
                .into());
            }
            metadata.slug = slugify(&metadata.name)
                .map_err(|e| ValidationError::constraint("metadata.name", e.to_string()))?;
        } else if !lodestar_core::is_valid_slug(&metadata.slug) {
            return Err(ValidationError::constraint(
                "metadata.slug",
                format!("'{}' is not a valid slug", metadata.slug),
            )
            .into());
        }

        // Keep the input in sync so later readers of either see the
        // normalized identity.
        let slug = metadata.slug.clone();
        cx.input.metadata_mut().slug = slug;
        Ok(())
    }
}

/// Reject a create whose slug is already taken within `(kind, org)`.
pub struct CheckDuplicate;

#[async_trait]
impl<R: ApiResource> PipelineStep<R> for CheckDuplicate {
    fn name(&self) -> &'static str {
        "check-duplicate"
    }

    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError> {
        let (slug, org) = {
            let metadata = cx
                .new_state_ref()?
                .metadata()
                .ok_or_else(|| StepError::Internal("metadata vanished after slug resolve".into()))?;
            (metadata.slug.clone(), metadata.org.clone())
        };

        let all: Vec<R> = cx.store.list().await?;
        for resource in &all {
            if let Some(metadata) = resource.metadata()
                && metadata.slug == slug
                && metadata.org == org
            {
                return Err(StepError::Conflict(format!(
                    "{} with slug '{slug}' already exists (id: {})",
                    cx.kind.display_name(),
                    metadata.id
                )));
            }
        }
        Ok(())
    }
}

/// Fail unless `input.metadata.id` is set. First step of Delete.
pub struct ExtractId;

#[async_trait]
impl<R: ApiResource> PipelineStep<R> for ExtractId {
    fn name(&self) -> &'static str {
        "extract-id"
    }

    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError> {
        let id = cx.input.metadata().map(|m| m.id.clone()).unwrap_or_default();
        if id.is_empty() {
            return Err(StepError::Precondition("metadata.id is required".into()));
        }
        Ok(())
    }
}

/// Load the existing resource by the input's id into `existing`.
pub struct LoadExisting;

#[async_trait]
impl<R: ApiResource> PipelineStep<R> for LoadExisting {
    fn name(&self) -> &'static str {
        "load-existing"
    }

    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError> {
        let id = cx.input.metadata().map(|m| m.id.clone()).unwrap_or_default();
        if id.is_empty() {
            return Err(StepError::Precondition("metadata.id is required".into()));
        }
        let existing: R = cx.store.get(&id).await?;
        cx.existing = Some(existing);
        Ok(())
    }
}

/// Look the resource up by slug and record whether Apply should create or
/// update.
pub struct LoadForApply;

#[async_trait]
impl<R: ApiResource> PipelineStep<R> for LoadForApply {
    fn name(&self) -> &'static str {
        "load-for-apply"
    }

    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError> {
        let (slug, org) = {
            let metadata = cx
                .new_state_ref()?
                .metadata()
                .ok_or_else(|| StepError::Internal("metadata vanished after slug resolve".into()))?;
            (metadata.slug.clone(), metadata.org.clone())
        };
        let found: Option<R> = cx.store.get_by_slug(&org, &slug).await?;
        cx.should_create = Some(found.is_none());
        cx.existing = found;
        Ok(())
    }
}

/// Mint the id, stamp both audits, drop any client-supplied status, and
/// set the kind's initial phase.
pub struct BuildNewState;

#[async_trait]
impl<R: ApiResource> PipelineStep<R> for BuildNewState {
    fn name(&self) -> &'static str {
        "build-new-state"
    }

    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError> {
        let actor = cx.actor.principal.clone();
        let now = Utc::now().to_rfc3339();
        let id = new_prefixed_id(cx.kind.id_prefix());

        let state = cx.new_state_mut()?;
        // Status is system state; whatever the client sent goes away
        // before the audits are written.
        state.clear_status();
        state.metadata_mut().id = id;

        let spec_audit = state.spec_audit_mut();
        spec_audit.created_by = actor.clone();
        spec_audit.created_at = now.clone();
        spec_audit.updated_by = actor.clone();
        spec_audit.updated_at = now.clone();

        let status_audit = state.status_audit_mut();
        status_audit.created_by = actor.clone();
        status_audit.created_at = now.clone();
        status_audit.updated_by = actor;
        status_audit.updated_at = now;

        state.set_initial_phase();
        Ok(())
    }
}

/// Merge the input spec over the existing resource: identity comes from
/// the existing metadata, the entire status is copied verbatim from the
/// existing resource, and only `status.audit.status_audit`'s updated
/// fields are rewritten.
///
/// This is the single place the status-preservation invariant lives.
pub struct BuildUpdateState;

#[async_trait]
impl<R: ApiResource> PipelineStep<R> for BuildUpdateState {
    fn name(&self) -> &'static str {
        "build-update-state"
    }

    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError> {
        let existing = cx.existing_ref()?.clone();
        let existing_metadata = existing.metadata().cloned().ok_or_else(|| {
            StepError::Internal("existing resource has no metadata".into())
        })?;
        let actor = cx.actor.principal.clone();
        let now = Utc::now().to_rfc3339();

        let state = cx.new_state_mut()?;

        // The display name is the only client-updatable metadata field;
        // id, slug, org, and scope are stable identity.
        let input_name = state.metadata().map(|m| m.name.clone()).unwrap_or_default();
        {
            let metadata = state.metadata_mut();
            *metadata = existing_metadata;
            if !input_name.is_empty() {
                metadata.name = input_name;
            }
        }

        state.clear_status();
        state.copy_status_from(&existing);
        let audit = state.status_audit_mut();
        audit.updated_by = actor;
        audit.updated_at = now;
        Ok(())
    }
}

/// Save `new_state`: primary record plus slug index, one transaction.
pub struct Persist;

#[async_trait]
impl<R: ApiResource> PipelineStep<R> for Persist {
    fn name(&self) -> &'static str {
        "persist"
    }

    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError> {
        let state = cx.new_state_ref()?.clone();
        cx.store
            .save(&state)
            .await
            .map_err(|e| StepError::Internal(e.to_string()))?;
        Ok(())
    }
}

/// Delete the loaded resource; the prior state stays in `existing` as the
/// response (audit trail).
pub struct Delete;

#[async_trait]
impl<R: ApiResource> PipelineStep<R> for Delete {
    fn name(&self) -> &'static str {
        "delete"
    }

    async fn execute(&self, cx: &mut RequestContext<R>) -> Result<(), StepError> {
        let id = cx
            .existing_ref()?
            .metadata()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        let deleted: R = cx.store.delete(&id).await?;
        cx.existing = Some(deleted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::Pipeline;
    use lodestar_core::Actor;
    use lodestar_proto::v1::{Agent, AgentSpec, AgentStatus, Metadata, ResourceKind};
    use lodestar_store::{MemoryKvStore, ResourceStore};

    fn context(input: Agent) -> RequestContext<Agent> {
        RequestContext::new(
            ResourceKind::Agent,
            Actor::new("user:test"),
            ResourceStore::new(MemoryKvStore::shared()),
            input,
        )
    }

    fn agent_named(name: &str) -> Agent {
        Agent {
            metadata: Some(Metadata {
                name: name.into(),
                ..Metadata::default()
            }),
            spec: Some(AgentSpec {
                instructions: "be helpful".into(),
                ..AgentSpec::default()
            }),
            status: None,
        }
    }

    fn create_pipeline() -> Pipeline<Agent> {
        Pipeline::named("create")
            .step(ValidateInput)
            .step(ResolveSlug)
            .step(CheckDuplicate)
            .step(BuildNewState)
            .step(Persist)
    }

    #[tokio::test]
    async fn test_create_builds_id_slug_and_audit() {
        let mut cx = context(agent_named("PR Reviewer"));
        cx.set_new_state();
        create_pipeline().run(&mut cx).await.unwrap();

        let created = cx.new_state.unwrap();
        let metadata = created.metadata.as_ref().unwrap();
        assert!(metadata.id.starts_with("agt-"));
        assert_eq!(metadata.slug, "pr-reviewer");

        let audit = created.status.as_ref().unwrap().audit.as_ref().unwrap();
        let status_audit = audit.status_audit.as_ref().unwrap();
        assert_eq!(status_audit.created_by, "user:test");
        assert_eq!(status_audit.updated_by, "user:test");
        assert!(!status_audit.created_at.is_empty());
    }

    #[tokio::test]
    async fn test_unseeded_new_state_fails_in_resolve_slug() {
        let mut cx = context(agent_named("X"));
        // set_new_state deliberately not called.
        let err = create_pipeline().run(&mut cx).await.unwrap_err();
        assert_eq!(err.step, "resolve-slug");
        assert!(matches!(err.source, StepError::Internal(_)));
    }

    #[tokio::test]
    async fn test_duplicate_slug_conflicts() {
        let mut cx = context(agent_named("PR Reviewer"));
        cx.set_new_state();
        create_pipeline().run(&mut cx).await.unwrap();
        let store = cx.store.clone();

        let mut second = RequestContext::new(
            ResourceKind::Agent,
            Actor::new("user:test"),
            store,
            agent_named("PR   Reviewer"),
        );
        second.set_new_state();
        let err = create_pipeline().run(&mut second).await.unwrap_err();
        assert_eq!(err.step, "check-duplicate");
        let status = err.into_status();
        assert_eq!(status.code(), tonic::Code::AlreadyExists);
        assert!(status.message().contains("pr-reviewer"));
    }

    #[tokio::test]
    async fn test_client_status_dropped_on_create() {
        let mut input = agent_named("Sneaky");
        input.status = Some(AgentStatus {
            audit: None,
            default_instance_id: "ain-forged".into(),
        });
        let mut cx = context(input);
        cx.set_new_state();
        create_pipeline().run(&mut cx).await.unwrap();
        let created = cx.new_state.unwrap();
        assert!(created.status.unwrap().default_instance_id.is_empty());
    }

    #[tokio::test]
    async fn test_update_preserves_status_and_rewrites_status_audit() {
        // Create, then give the stored resource system-managed status.
        let mut cx = context(agent_named("PR Reviewer"));
        cx.set_new_state();
        create_pipeline().run(&mut cx).await.unwrap();
        let store = cx.store.clone();
        let mut stored = cx.new_state.unwrap();
        let id = stored.metadata.as_ref().unwrap().id.clone();
        stored.status.as_mut().unwrap().default_instance_id = "ain-system".into();
        store.save(&stored).await.unwrap();
        let original_status_created = stored
            .status
            .as_ref()
            .unwrap()
            .audit
            .as_ref()
            .unwrap()
            .status_audit
            .as_ref()
            .unwrap()
            .created_at
            .clone();

        // Update with changed spec and a forged status.
        let mut update_input = agent_named("PR Reviewer");
        update_input.metadata.as_mut().unwrap().id = id.clone();
        update_input.spec.as_mut().unwrap().instructions = "be stricter".into();
        update_input.status = Some(AgentStatus {
            audit: None,
            default_instance_id: "ain-forged".into(),
        });

        let mut update_cx = RequestContext::new(
            ResourceKind::Agent,
            Actor::new("user:second"),
            store.clone(),
            update_input,
        );
        update_cx.set_new_state();
        Pipeline::named("update")
            .step(ValidateInput)
            .step(ResolveSlug)
            .step(LoadExisting)
            .step(BuildUpdateState)
            .step(Persist)
            .run(&mut update_cx)
            .await
            .unwrap();

        let updated: Agent = store.get(&id).await.unwrap();
        assert_eq!(updated.spec.as_ref().unwrap().instructions, "be stricter");
        let status = updated.status.as_ref().unwrap();
        // System status preserved; forged value discarded.
        assert_eq!(status.default_instance_id, "ain-system");
        let status_audit = status
            .audit
            .as_ref()
            .unwrap()
            .status_audit
            .as_ref()
            .unwrap();
        assert_eq!(status_audit.updated_by, "user:second");
        assert_eq!(status_audit.created_at, original_status_created);
    }

    #[tokio::test]
    async fn test_load_existing_not_found() {
        let mut input = agent_named("Ghost");
        input.metadata.as_mut().unwrap().id = "agt-missing".into();
        let mut cx = context(input);
        cx.set_new_state();
        let err = Pipeline::named("update")
            .step(LoadExisting)
            .run(&mut cx)
            .await
            .unwrap_err();
        assert_eq!(err.into_status().code(), tonic::Code::NotFound);
    }

    #[tokio::test]
    async fn test_apply_load_signals_create_then_update() {
        let mut cx = context(agent_named("PR Reviewer"));
        cx.set_new_state();
        Pipeline::named("apply-head")
            .step(ValidateInput)
            .step(ResolveSlug)
            .step(LoadForApply)
            .run(&mut cx)
            .await
            .unwrap();
        assert_eq!(cx.should_create, Some(true));

        create_pipeline().run(&mut cx).await.unwrap();

        let mut second = RequestContext::new(
            ResourceKind::Agent,
            Actor::new("user:test"),
            cx.store.clone(),
            agent_named("PR Reviewer"),
        );
        second.set_new_state();
        Pipeline::named("apply-head")
            .step(ValidateInput)
            .step(ResolveSlug)
            .step(LoadForApply)
            .run(&mut second)
            .await
            .unwrap();
        assert_eq!(second.should_create, Some(false));
        assert!(second.existing.is_some());
    }

    #[tokio::test]
    async fn test_delete_returns_prior_state() {
        let mut cx = context(agent_named("Doomed"));
        cx.set_new_state();
        create_pipeline().run(&mut cx).await.unwrap();
        let id = cx.new_state.as_ref().unwrap().metadata.as_ref().unwrap().id.clone();

        let mut delete_input = Agent::default();
        delete_input.metadata_mut().id = id.clone();
        let mut delete_cx = RequestContext::new(
            ResourceKind::Agent,
            Actor::new("user:test"),
            cx.store.clone(),
            delete_input,
        );
        Pipeline::named("delete")
            .step(ExtractId)
            .step(LoadExisting)
            .step(Delete)
            .run(&mut delete_cx)
            .await
            .unwrap();

        let deleted = delete_cx.existing.unwrap();
        assert_eq!(deleted.metadata.unwrap().slug, "doomed");
        assert!(
            delete_cx
                .store
                .try_get::<Agent>(&id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
