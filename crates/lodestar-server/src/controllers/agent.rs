//! Agent controller: standard pipelines plus default-instance management.

use tonic::{Request, Response, Status};
use tracing::debug;

use lodestar_proto::ApiResource;
use lodestar_proto::v1::{
    Agent, AgentInstance, AgentInstanceSpec, ApplyAgentRequest, CreateAgentRequest, DeleteRequest,
    ListAgentsResponse, Metadata, ResourceKind, UpdateAgentRequest,
};

use super::generic::impl_query_service;
use super::{Api, Ctx, base, kind_from, required_resource};

/// Ensure the implicitly-managed `"<agent-slug>-default"` instance exists
/// and that the agent's `status.default_instance_id` points at it.
///
/// The instance lookup key is always the slug — never the display name.
/// The parent's status reference is written by direct store save: routing
/// an Update RPC through the controller would make the status-preservation
/// step rewrite the very audit this write is setting.
pub(crate) async fn ensure_default_agent_instance(
    ctx: &Ctx,
    agent_id: &str,
) -> Result<String, Status> {
    let agent: Agent = base::get(ctx, agent_id).await?;
    let metadata = agent
        .metadata
        .clone()
        .ok_or_else(|| Status::internal("stored agent has no metadata"))?;
    let instance_slug = format!("{}-default", metadata.slug);

    let existing: Option<AgentInstance> = ctx
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
            let input = AgentInstance {
                metadata: Some(Metadata {
                    name: format!("{} (default)", metadata.name),
                    slug: instance_slug.clone(),
                    org: metadata.org.clone(),
                    owner_scope: metadata.owner_scope,
                    ..Metadata::default()
                }),
                spec: Some(AgentInstanceSpec {
                    agent_id: metadata.id.clone(),
                    ..AgentInstanceSpec::default()
                }),
                status: None,
            };
            let created = base::create(ctx, ResourceKind::AgentInstance, input).await?;
            created
                .metadata
                .map(|m| m.id)
                .ok_or_else(|| Status::internal("created instance has no metadata"))?
        }
    };

    let current = agent
        .status
        .as_ref()
        .map(|s| s.default_instance_id.clone())
        .unwrap_or_default();
    if current != instance_id {
        let mut fresh: Agent = base::get(ctx, agent_id).await?;
        fresh.status.get_or_insert_default().default_instance_id = instance_id.clone();
        let audit = fresh.status_audit_mut();
        audit.updated_by = ctx.actor.principal.clone();
        audit.updated_at = chrono::Utc::now().to_rfc3339();
        ctx.store
            .save(&fresh)
            .await
            .map_err(|e| Status::internal(e.to_string()))?;
        debug!(agent_id, instance_id = %instance_id, "default instance reference written");
    }
    Ok(instance_id)
}

#[tonic::async_trait]
impl lodestar_proto::v1::agent_command_service_server::AgentCommandService for Api {
    async fn create(&self, request: Request<CreateAgentRequest>) -> Result<Response<Agent>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        let created = base::create(&self.ctx, kind, input).await?;
        let id = created
            .metadata
            .as_ref()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        ensure_default_agent_instance(&self.ctx, &id).await?;
        // Re-read so the response carries the instance reference.
        Ok(Response::new(base::get(&self.ctx, &id).await?))
    }

    async fn update(&self, request: Request<UpdateAgentRequest>) -> Result<Response<Agent>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        Ok(Response::new(base::update(&self.ctx, kind, input).await?))
    }

    async fn delete(&self, request: Request<DeleteRequest>) -> Result<Response<Agent>, Status> {
        let kind = kind_from(&request)?;
        let id = request.into_inner().id;
        Ok(Response::new(base::delete(&self.ctx, kind, &id).await?))
    }

    async fn apply(&self, request: Request<ApplyAgentRequest>) -> Result<Response<Agent>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        let (applied, _created) = base::apply(&self.ctx, kind, input).await?;
        let id = applied
            .metadata
            .as_ref()
            .map(|m| m.id.clone())
            .unwrap_or_default();
        // Idempotent: an existing default instance is reused and the
        // status reference only rewritten when it drifted.
        ensure_default_agent_instance(&self.ctx, &id).await?;
        Ok(Response::new(base::get(&self.ctx, &id).await?))
    }
}

impl_query_service!(
    lodestar_proto::v1::agent_query_service_server::AgentQueryService,
    Agent,
    ListAgentsResponse
);
