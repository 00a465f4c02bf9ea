//! Macro-generated service impls for kinds without kind-specific steps.

use tonic::{Request, Response, Status};

use lodestar_proto::v1::{
    AgentInstance, ApplyAgentInstanceRequest, ApplyEnvironmentRequest, ApplySessionRequest,
    ApplySkillRequest, CreateAgentInstanceRequest, CreateEnvironmentRequest,
    CreateExecutionContextRequest, CreateSessionRequest, CreateSkillRequest, DeleteRequest,
    Environment, ExecutionContext, GetByReferenceRequest, GetRequest, ListAgentInstancesResponse,
    ListEnvironmentsResponse, ListExecutionContextsResponse, ListRequest, ListSessionsByAgentRequest,
    ListSessionsResponse, ListSkillsResponse, ListWorkflowInstancesResponse, Session, Skill,
    UpdateAgentInstanceRequest, UpdateEnvironmentRequest, UpdateSessionRequest, UpdateSkillRequest,
    WorkflowInstance,
};

use super::{Api, base, kind_from, required_resource};

/// Standard Command service impl: the four pipelines from the steps
/// library, nothing kind-specific. All paths are absolute so the macro
/// expands cleanly in any controller module.
macro_rules! impl_command_service {
    ($trait_path:path, $resource:ty, $create_req:ty, $update_req:ty, $apply_req:ty) => {
        #[tonic::async_trait]
        impl $trait_path for crate::controllers::Api {
            async fn create(
                &self,
                request: tonic::Request<$create_req>,
            ) -> Result<tonic::Response<$resource>, tonic::Status> {
                let kind = crate::controllers::kind_from(&request)?;
                let input = crate::controllers::required_resource(request.into_inner().resource)?;
                Ok(tonic::Response::new(
                    crate::controllers::base::create(&self.ctx, kind, input).await?,
                ))
            }

            async fn update(
                &self,
                request: tonic::Request<$update_req>,
            ) -> Result<tonic::Response<$resource>, tonic::Status> {
                let kind = crate::controllers::kind_from(&request)?;
                let input = crate::controllers::required_resource(request.into_inner().resource)?;
                Ok(tonic::Response::new(
                    crate::controllers::base::update(&self.ctx, kind, input).await?,
                ))
            }

            async fn delete(
                &self,
                request: tonic::Request<lodestar_proto::v1::DeleteRequest>,
            ) -> Result<tonic::Response<$resource>, tonic::Status> {
                let kind = crate::controllers::kind_from(&request)?;
                let id = request.into_inner().id;
                Ok(tonic::Response::new(
                    crate::controllers::base::delete(&self.ctx, kind, &id).await?,
                ))
            }

            async fn apply(
                &self,
                request: tonic::Request<$apply_req>,
            ) -> Result<tonic::Response<$resource>, tonic::Status> {
                let kind = crate::controllers::kind_from(&request)?;
                let input = crate::controllers::required_resource(request.into_inner().resource)?;
                let (applied, _created) =
                    crate::controllers::base::apply(&self.ctx, kind, input).await?;
                Ok(tonic::Response::new(applied))
            }
        }
    };
}

/// Standard Query service impl: Get, GetByReference, List.
macro_rules! impl_query_service {
    ($trait_path:path, $resource:ty, $list_resp:ident) => {
        #[tonic::async_trait]
        impl $trait_path for crate::controllers::Api {
            async fn get(
                &self,
                request: tonic::Request<lodestar_proto::v1::GetRequest>,
            ) -> Result<tonic::Response<$resource>, tonic::Status> {
                let _ = crate::controllers::kind_from(&request)?;
                let id = request.into_inner().id;
                Ok(tonic::Response::new(
                    crate::controllers::base::get::<$resource>(&self.ctx, &id).await?,
                ))
            }

            async fn get_by_reference(
                &self,
                request: tonic::Request<lodestar_proto::v1::GetByReferenceRequest>,
            ) -> Result<tonic::Response<$resource>, tonic::Status> {
                let _ = crate::controllers::kind_from(&request)?;
                let inner = request.into_inner();
                Ok(tonic::Response::new(
                    crate::controllers::base::get_by_reference::<$resource>(
                        &self.ctx,
                        &inner.org,
                        &inner.reference,
                    )
                    .await?,
                ))
            }

            async fn list(
                &self,
                request: tonic::Request<lodestar_proto::v1::ListRequest>,
            ) -> Result<tonic::Response<$list_resp>, tonic::Status> {
                let _ = crate::controllers::kind_from(&request)?;
                let org = request.into_inner().org;
                let resources =
                    crate::controllers::base::list::<$resource>(&self.ctx, &org).await?;
                Ok(tonic::Response::new($list_resp { resources }))
            }
        }
    };
}

pub(crate) use {impl_command_service, impl_query_service};

impl_command_service!(
    lodestar_proto::v1::agent_instance_command_service_server::AgentInstanceCommandService,
    AgentInstance,
    CreateAgentInstanceRequest,
    UpdateAgentInstanceRequest,
    ApplyAgentInstanceRequest
);

impl_query_service!(
    lodestar_proto::v1::agent_instance_query_service_server::AgentInstanceQueryService,
    AgentInstance,
    ListAgentInstancesResponse
);

impl_command_service!(
    lodestar_proto::v1::session_command_service_server::SessionCommandService,
    Session,
    CreateSessionRequest,
    UpdateSessionRequest,
    ApplySessionRequest
);

#[tonic::async_trait]
impl lodestar_proto::v1::session_query_service_server::SessionQueryService for Api {
    async fn get(&self, request: Request<GetRequest>) -> Result<Response<Session>, Status> {
        let _ = kind_from(&request)?;
        let id = request.into_inner().id;
        Ok(Response::new(base::get::<Session>(&self.ctx, &id).await?))
    }

    async fn get_by_reference(
        &self,
        request: Request<GetByReferenceRequest>,
    ) -> Result<Response<Session>, Status> {
        let _ = kind_from(&request)?;
        let inner = request.into_inner();
        Ok(Response::new(
            base::get_by_reference::<Session>(&self.ctx, &inner.org, &inner.reference).await?,
        ))
    }

    async fn list(&self, request: Request<ListRequest>) -> Result<Response<ListSessionsResponse>, Status> {
        let _ = kind_from(&request)?;
        let org = request.into_inner().org;
        let resources = base::list::<Session>(&self.ctx, &org).await?;
        Ok(Response::new(ListSessionsResponse { resources }))
    }

    /// Loads all sessions of the org and filters in memory. Fine at local
    /// single-user scale; the store's list is the future index seam.
    async fn list_by_agent(
        &self,
        request: Request<ListSessionsByAgentRequest>,
    ) -> Result<Response<ListSessionsResponse>, Status> {
        let _ = kind_from(&request)?;
        let agent_id = request.into_inner().agent_id;

        // Sessions reference agent instances; collect the instances owned
        // by the agent first.
        let instances = base::list::<AgentInstance>(&self.ctx, "").await?;
        let instance_ids: std::collections::HashSet<String> = instances
            .into_iter()
            .filter(|i| i.spec.as_ref().is_some_and(|s| s.agent_id == agent_id))
            .filter_map(|i| i.metadata.map(|m| m.id))
            .collect();

        let sessions = base::list::<Session>(&self.ctx, "").await?;
        let resources = sessions
            .into_iter()
            .filter(|s| {
                s.spec
                    .as_ref()
                    .is_some_and(|spec| instance_ids.contains(&spec.agent_instance_id))
            })
            .collect();
        Ok(Response::new(ListSessionsResponse { resources }))
    }
}

impl_command_service!(
    lodestar_proto::v1::environment_command_service_server::EnvironmentCommandService,
    Environment,
    CreateEnvironmentRequest,
    UpdateEnvironmentRequest,
    ApplyEnvironmentRequest
);

impl_query_service!(
    lodestar_proto::v1::environment_query_service_server::EnvironmentQueryService,
    Environment,
    ListEnvironmentsResponse
);

impl_command_service!(
    lodestar_proto::v1::skill_command_service_server::SkillCommandService,
    Skill,
    CreateSkillRequest,
    UpdateSkillRequest,
    ApplySkillRequest
);

impl_query_service!(
    lodestar_proto::v1::skill_query_service_server::SkillQueryService,
    Skill,
    ListSkillsResponse
);

impl_query_service!(
    lodestar_proto::v1::workflow_instance_query_service_server::WorkflowInstanceQueryService,
    WorkflowInstance,
    ListWorkflowInstancesResponse
);

impl_query_service!(
    lodestar_proto::v1::execution_context_query_service_server::ExecutionContextQueryService,
    ExecutionContext,
    ListExecutionContextsResponse
);

/// ExecutionContext is immutable: no Update RPC exists, and Apply on an
/// existing slug conflicts instead of updating. Contexts are created at
/// execution start and deleted at execution end.
#[tonic::async_trait]
impl lodestar_proto::v1::execution_context_command_service_server::ExecutionContextCommandService
    for Api
{
    async fn create(
        &self,
        request: Request<CreateExecutionContextRequest>,
    ) -> Result<Response<ExecutionContext>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        Ok(Response::new(base::create(&self.ctx, kind, input).await?))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> Result<Response<ExecutionContext>, Status> {
        let kind = kind_from(&request)?;
        let id = request.into_inner().id;
        Ok(Response::new(base::delete(&self.ctx, kind, &id).await?))
    }

    async fn apply(
        &self,
        request: Request<lodestar_proto::v1::ApplyExecutionContextRequest>,
    ) -> Result<Response<ExecutionContext>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        Ok(Response::new(
            base::apply_immutable(&self.ctx, kind, input).await?,
        ))
    }
}
