//! Workflow controller: standard pipelines, engine-backed validation on
//! Apply, and default-instance management.

use tonic::{Request, Response, Status};
use tracing::debug;

use lodestar_proto::ApiResource;
use lodestar_proto::v1::{
    ApplyWorkflowRequest, CreateWorkflowRequest, DeleteRequest, ListWorkflowsResponse, Metadata,
    ResourceKind, UpdateWorkflowRequest, Workflow, WorkflowInstance, WorkflowInstanceSpec,
};

use super::generic::impl_query_service;
use super::{Api, Ctx, base, kind_from, required_resource};

/// Ensure the `"<workflow-slug>-default"` instance exists and the
/// workflow's `status.default_instance_id` references it. Same contract
/// as the agent variant: slug-keyed lookup, direct store save for the
/// status reference.
pub(crate) async fn ensure_default_workflow_instance(
    ctx: &Ctx,
    workflow_id: &str,
) -> Result<String, Status> {
    let workflow: Workflow = base::get(ctx, workflow_id).await?;
    let metadata = workflow
        .metadata
        .clone()
        .ok_or_else(|| Status::internal("stored workflow has no metadata"))?;
    let instance_slug = format!("{}-default", metadata.slug);

    let existing: Option<WorkflowInstance> = ctx
        .store
        .get_by_slug(&metadata.org, &instance_slug)
        .await
        .map_err(|e| Status::internal(e.to_string()))?;

    let instance_id = match existing {
        Some(instance) => instance
            .metadata
            .map(|m| m.id)
            .ok_or_else(|| Status::internal("stored instance has no metadata"))?,
        None => {
            let input = WorkflowInstance {
                metadata: Some(Metadata {
                    name: format!("{} (default)", metadata.name),
                    slug: instance_slug.clone(),
                    org: metadata.org.clone(),
                    owner_scope: metadata.owner_scope,
                    ..Metadata::default()
                }),
                spec: Some(WorkflowInstanceSpec {
                    workflow_id: metadata.id.clone(),
                }),
                status: None,
            };
            // WorkflowInstance has no command service; the pipeline runs
            // internally with the same steps a controller would use.
            let created = base::create(ctx, ResourceKind::WorkflowInstance, input).await?;
            created
                .metadata
                .map(|m| m.id)
                .ok_or_else(|| Status::internal("created instance has no metadata"))?
        }
    };

    let current = workflow
        .status
        .as_ref()
        .map(|s| s.default_instance_id.clone())
        .unwrap_or_default();
    if current != instance_id {
        let mut fresh: Workflow = base::get(ctx, workflow_id).await?;
        fresh.status.get_or_insert_default().default_instance_id = instance_id.clone();
        let audit = fresh.status_audit_mut();
        audit.updated_by = ctx.actor.principal.clone();
        audit.updated_at = chrono::Utc::now().to_rfc3339();
        ctx.store
            .save(&fresh)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        debug!(workflow_id, instance_id = %instance_id, "default instance reference written");
    }
    Ok(instance_id)
}

#[tonic::async_trait]
impl lodestar_proto::v1::workflow_command_service_server::WorkflowCommandService for Api {
    async fn create(
        &self,
        request: Request<CreateWorkflowRequest>,
    ) -> Result<Response<Workflow>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        let created = base::create(&self.ctx, kind, input).await?;
        let id = created
            .metadata
            .as_ref()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        ensure_default_workflow_instance(&self.ctx, &id).await?;
        Ok(Response::new(base::get(&self.ctx, &id).await?))
    }

    async fn update(
        &self,
        request: Request<UpdateWorkflowRequest>,
    ) -> Result<Response<Workflow>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        Ok(Response::new(base::update(&self.ctx, kind, input).await?))
    }

    async fn delete(&self, request: Request<DeleteRequest>) -> Result<Response<Workflow>, Status> {
        let kind = kind_from(&request)?;
        let id = request.into_inner().id;
        Ok(Response::new(base::delete(&self.ctx, kind, &id).await?))
    }

    /// Apply runs the engine-hosted validation workflow before the
    /// resource is accepted. A validation-system failure (worker not
    /// polling) fails the apply with a distinct error so the user knows
    /// to restart the daemon rather than debug their workflow.
    async fn apply(&self, request: Request<ApplyWorkflowRequest>) -> Result<Response<Workflow>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;

        let slug = slug_for_validation(&input)?;
        let spec = input
            .spec
            .clone()
            .ok_or_else(|| Status::invalid_argument("spec: is required"))?;
        self.ctx.orchestrator.validate_workflow(&slug, &spec).await?;

        let (applied, _created) = base::apply(&self.ctx, kind, input).await?;
        let id = applied
            .metadata
            .as_ref()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        ensure_default_workflow_instance(&self.ctx, &id).await?;
        Ok(Response::new(base::get(&self.ctx, &id).await?))
    }
}

/// The slug the validation document is named after, derived the same way
/// the pipeline will derive it.
fn slug_for_validation(workflow: &Workflow) -> Result<String, Status> {
    let metadata = workflow
        .metadata
        .as_ref()
        .ok_or_else(|| Status::invalid_argument("metadata: is required"))?;
    if !metadata.slug.is_empty() {
        return Ok(metadata.slug.clone());
    }
    lodestar_core::slugify(&metadata.name)
        .map_err(|_| Status::invalid_argument("metadata.name: either name or slug must be set"))
}

impl_query_service!(
    lodestar_proto::v1::workflow_query_service_server::WorkflowQueryService,
    Workflow,
    ListWorkflowsResponse
);
