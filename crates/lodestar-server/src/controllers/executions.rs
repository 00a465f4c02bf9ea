//! Execution controllers: create bridges to the durable engine, queries
//! stream execution events, and the ingress service accepts events from
//! the task worker.

use std::pin::Pin;

use futures::Stream;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tonic::{Request, Response, Status};
use tracing::warn;

use lodestar_proto::ApiResource;
use lodestar_proto::v1::{
    AgentExecution, ApplyAgentExecutionRequest, ApplyWorkflowExecutionRequest,
    CreateAgentExecutionRequest, CreateWorkflowExecutionRequest, DeleteRequest, ExecutionContext,
    ExecutionEvent, ListAgentExecutionsResponse, ListWorkflowExecutionsResponse, PublishAck,
    SubscribeExecutionRequest, UpdateAgentExecutionRequest, UpdateWorkflowExecutionRequest,
    Workflow, WorkflowExecution,
};

use super::agent::ensure_default_agent_instance;
use super::workflow::ensure_default_workflow_instance;
use super::{Api, Ctx, base, kind_from, required_resource};

type EventStream = Pin<Box<dyn Stream<Item = Result<ExecutionEvent, Status>> + Send>>;

fn validation_status(error: lodestar_proto::ValidationError) -> Status {
    match error {
        lodestar_proto::ValidationError::Constraint { field, message } => {
            Status::invalid_argument(format!("{field}: {message}"))
        }
        lodestar_proto::ValidationError::MissingReference(message) => {
            Status::failed_precondition(message)
        }
    }
}

/// Record the engine run id on a freshly created execution by direct
/// store save.
async fn record_run_id<R: ApiResource>(
    ctx: &Ctx,
    id: &str,
    write: impl FnOnce(&mut R, String),
    run_id: String,
) -> Result<R, Status> {
    let mut resource: R = base::get(ctx, id).await?;
    write(&mut resource, run_id);
    let audit = resource.status_audit_mut();
    audit.updated_by = ctx.actor.principal.clone();
    audit.updated_at = chrono::Utc::now().to_rfc3339();
    ctx.store
        .save(&resource)
        .await
        .map_err(|e| Status::internal(e.to_string()))?;
    Ok(resource)
}

/// Best-effort removal of an execution whose engine workflow never
/// started; a PENDING record with no backing workflow would be stuck
/// forever.
async fn roll_back<R: ApiResource>(ctx: &Ctx, id: &str) {
    if let Err(e) = ctx.store.delete::<R>(id).await {
        warn!(execution_id = id, error = %e, "rollback of unstarted execution failed");
    }
}

async fn subscribe_stream(ctx: &Ctx, execution_id: String) -> EventStream {
    let receiver = ctx.hub.subscribe(&execution_id).await;
    // Lagged subscribers skip dropped (non-critical) events rather than
    // erroring out; the durable record is the source of truth.
    let stream = BroadcastStream::new(receiver).filter_map(|item| item.ok().map(Ok::<_, Status>));
    Box::pin(stream)
}

// ---------------------------------------------------------------------------
// WorkflowExecution
// ---------------------------------------------------------------------------

#[tonic::async_trait]
impl lodestar_proto::v1::workflow_execution_command_service_server::WorkflowExecutionCommandService
    for Api
{
    async fn create(
        &self,
        request: Request<CreateWorkflowExecutionRequest>,
    ) -> Result<Response<WorkflowExecution>, Status> {
        let kind = kind_from(&request)?;
        let mut input = required_resource(request.into_inner().resource)?;

        // Validate first: malformed input is rejected the same way whether
        // or not the engine is reachable.
        input.validate().map_err(validation_status)?;

        // Refuse before persisting anything when the engine is down.
        self.ctx.orchestrator.require_creator().await?;

        // Resolve the target workflow, ensuring the default instance for
        // bare workflow references.
        let spec = input
            .spec
            .clone()
            .ok_or_else(|| Status::invalid_argument("spec: is required"))?;
        let workflow_id = if spec.workflow_instance_id.is_empty() {
            if spec.workflow_id.is_empty() {
                return Err(Status::failed_precondition(
                    "either spec.workflow_id or spec.workflow_instance_id is required",
                ));
            }
            let instance_id =
                ensure_default_workflow_instance(&self.ctx, &spec.workflow_id).await?;
            if let Some(spec) = input.spec.as_mut() {
                spec.workflow_instance_id = instance_id;
            }
            spec.workflow_id.clone()
        } else {
            let instance: lodestar_proto::v1::WorkflowInstance =
                base::get(&self.ctx, &spec.workflow_instance_id).await?;
            instance.spec.map(|s| s.workflow_id).unwrap_or_default()
        };

        let workflow: Workflow = base::get(&self.ctx, &workflow_id).await?;
        let workflow_slug = workflow
            .metadata
            .as_ref()
            .map(|m| m.slug.clone())
            .unwrap_or_default();
        let workflow_spec = workflow.spec.clone().unwrap_or_default();
        let doc = self
            .ctx
            .orchestrator
            .document_for(&workflow_slug, &workflow_spec)?;

        let created = base::create(&self.ctx, kind, input).await?;
        let id = created
            .metadata
            .as_ref()
            .map(|m| m.id.clone())
            .unwrap_or_default();

        match self.ctx.orchestrator.start_workflow_execution(&id, doc).await {
            Ok(run_id) => {
                let updated = record_run_id::<WorkflowExecution>(
                    &self.ctx,
                    &id,
                    |r, run| r.status.get_or_insert_default().engine_run_id = run,
                    run_id,
                )
                .await?;
                Ok(Response::new(updated))
            }
            Err(status) => {
                roll_back::<WorkflowExecution>(&self.ctx, &id).await;
                Err(status)
            }
        }
    }

    async fn update(
        &self,
        request: Request<UpdateWorkflowExecutionRequest>,
    ) -> Result<Response<WorkflowExecution>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        Ok(Response::new(base::update(&self.ctx, kind, input).await?))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> Result<Response<WorkflowExecution>, Status> {
        let kind = kind_from(&request)?;
        let id = request.into_inner().id;
        Ok(Response::new(base::delete(&self.ctx, kind, &id).await?))
    }

    async fn apply(
        &self,
        request: Request<ApplyWorkflowExecutionRequest>,
    ) -> Result<Response<WorkflowExecution>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        let (applied, _created) = base::apply(&self.ctx, kind, input).await?;
        Ok(Response::new(applied))
    }
}

#[tonic::async_trait]
impl lodestar_proto::v1::workflow_execution_query_service_server::WorkflowExecutionQueryService
    for Api
{
    type SubscribeStream = EventStream;

    async fn get(&self, request: Request<lodestar_proto::v1::GetRequest>) -> Result<Response<WorkflowExecution>, Status> {
        let _ = kind_from(&request)?;
        let id = request.into_inner().id;
        Ok(Response::new(
            base::get::<WorkflowExecution>(&self.ctx, &id).await?,
        ))
    }

    async fn get_by_reference(
        &self,
        request: Request<lodestar_proto::v1::GetByReferenceRequest>,
    ) -> Result<Response<WorkflowExecution>, Status> {
        let _ = kind_from(&request)?;
        let inner = request.into_inner();
        Ok(Response::new(
            base::get_by_reference::<WorkflowExecution>(&self.ctx, &inner.org, &inner.reference)
                .await?,
        ))
    }

    async fn list(
        &self,
        request: Request<lodestar_proto::v1::ListRequest>,
    ) -> Result<Response<ListWorkflowExecutionsResponse>, Status> {
        let _ = kind_from(&request)?;
        let org = request.into_inner().org;
        let resources = base::list::<WorkflowExecution>(&self.ctx, &org).await?;
        Ok(Response::new(ListWorkflowExecutionsResponse { resources }))
    }

    async fn subscribe(
        &self,
        request: Request<SubscribeExecutionRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let _ = kind_from(&request)?;
        let execution_id = request.into_inner().execution_id;
        // Subscribing to a nonexistent execution is a client error.
        let _: WorkflowExecution = base::get(&self.ctx, &execution_id).await?;
        Ok(Response::new(
            subscribe_stream(&self.ctx, execution_id).await,
        ))
    }
}

// ---------------------------------------------------------------------------
// AgentExecution
// ---------------------------------------------------------------------------

#[tonic::async_trait]
impl lodestar_proto::v1::agent_execution_command_service_server::AgentExecutionCommandService
    for Api
{
    async fn create(
        &self,
        request: Request<CreateAgentExecutionRequest>,
    ) -> Result<Response<AgentExecution>, Status> {
        let kind = kind_from(&request)?;
        let mut input = required_resource(request.into_inner().resource)?;

        input.validate().map_err(validation_status)?;

        self.ctx.orchestrator.require_creator().await?;

        let spec = input
            .spec
            .clone()
            .ok_or_else(|| Status::invalid_argument("spec: is required"))?;
        if spec.agent_instance_id.is_empty() {
            if spec.agent_id.is_empty() {
                return Err(Status::failed_precondition(
                    "either spec.agent_id or spec.agent_instance_id is required",
                ));
            }
            let instance_id = ensure_default_agent_instance(&self.ctx, &spec.agent_id).await?;
            if let Some(spec) = input.spec.as_mut() {
                spec.agent_instance_id = instance_id;
            }
        }

        // A referenced execution context must exist before dispatch; its
        // secrets ride in the engine payload.
        if !spec.execution_context_id.is_empty() {
            let context = self
                .ctx
                .store
                .try_get::<ExecutionContext>(&spec.execution_context_id)
                .await
                .map_err(|e| Status::internal(e.to_string()))?;
            if context.is_none() {
                return Err(Status::failed_precondition(format!(
                    "ExecutionContext '{}' not found",
                    spec.execution_context_id
                )));
            }
        }

        let created = base::create(&self.ctx, kind, input).await?;
        let id = created
            .metadata
            .as_ref()
            .map(|m| m.id.clone())
            .unwrap_or_default();

        match self.ctx.orchestrator.start_agent_execution(&id).await {
            Ok(run_id) => {
                let updated = record_run_id::<AgentExecution>(
                    &self.ctx,
                    &id,
                    |r, run| r.status.get_or_insert_default().engine_run_id = run,
                    run_id,
                )
                .await?;
                Ok(Response::new(updated))
            }
            Err(status) => {
                roll_back::<AgentExecution>(&self.ctx, &id).await;
                Err(status)
            }
        }
    }

    async fn update(
        &self,
        request: Request<UpdateAgentExecutionRequest>,
    ) -> Result<Response<AgentExecution>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        Ok(Response::new(base::update(&self.ctx, kind, input).await?))
    }

    async fn delete(
        &self,
        request: Request<DeleteRequest>,
    ) -> Result<Response<AgentExecution>, Status> {
        let kind = kind_from(&request)?;
        let id = request.into_inner().id;
        Ok(Response::new(base::delete(&self.ctx, kind, &id).await?))
    }

    async fn apply(
        &self,
        request: Request<ApplyAgentExecutionRequest>,
    ) -> Result<Response<AgentExecution>, Status> {
        let kind = kind_from(&request)?;
        let input = required_resource(request.into_inner().resource)?;
        let (applied, _created) = base::apply(&self.ctx, kind, input).await?;
        Ok(Response::new(applied))
    }
}

#[tonic::async_trait]
impl lodestar_proto::v1::agent_execution_query_service_server::AgentExecutionQueryService for Api {
    type SubscribeStream = EventStream;

    async fn get(&self, request: Request<lodestar_proto::v1::GetRequest>) -> Result<Response<AgentExecution>, Status> {
        let _ = kind_from(&request)?;
        let id = request.into_inner().id;
        Ok(Response::new(
            base::get::<AgentExecution>(&self.ctx, &id).await?,
        ))
    }

    async fn get_by_reference(
        &self,
        request: Request<lodestar_proto::v1::GetByReferenceRequest>,
    ) -> Result<Response<AgentExecution>, Status> {
        let _ = kind_from(&request)?;
        let inner = request.into_inner();
        Ok(Response::new(
            base::get_by_reference::<AgentExecution>(&self.ctx, &inner.org, &inner.reference)
                .await?,
        ))
    }

    async fn list(
        &self,
        request: Request<lodestar_proto::v1::ListRequest>,
    ) -> Result<Response<ListAgentExecutionsResponse>, Status> {
        let _ = kind_from(&request)?;
        let org = request.into_inner().org;
        let resources = base::list::<AgentExecution>(&self.ctx, &org).await?;
        Ok(Response::new(ListAgentExecutionsResponse { resources }))
    }

    async fn subscribe(
        &self,
        request: Request<SubscribeExecutionRequest>,
    ) -> Result<Response<Self::SubscribeStream>, Status> {
        let _ = kind_from(&request)?;
        let execution_id = request.into_inner().execution_id;
        let _: AgentExecution = base::get(&self.ctx, &execution_id).await?;
        Ok(Response::new(
            subscribe_stream(&self.ctx, execution_id).await,
        ))
    }
}

// ---------------------------------------------------------------------------
// Event ingress
// ---------------------------------------------------------------------------

#[tonic::async_trait]
impl lodestar_proto::v1::execution_event_service_server::ExecutionEventService for Api {
    /// Accept a stream of events from the task worker, applying each to
    /// the execution resource and fanning it out to subscribers.
    async fn publish(
        &self,
        request: Request<tonic::Streaming<ExecutionEvent>>,
    ) -> Result<Response<PublishAck>, Status> {
        let mut stream = request.into_inner();
        let mut accepted: u64 = 0;
        while let Some(event) = stream.message().await? {
            self.ctx.hub.publish(event).await;
            accepted = accepted.saturating_add(1);
        }
        Ok(Response::new(PublishAck { accepted }))
    }
}
