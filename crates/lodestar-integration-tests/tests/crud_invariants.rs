//! Universal CRUD invariants across the pipeline and controllers.
//!
//! Several generated service traits share method names, so calls use
//! fully-qualified syntax throughout.

mod common;

use common::{harness_disconnected, req};

use lodestar_proto::v1::agent_command_service_server::AgentCommandService;
use lodestar_proto::v1::agent_query_service_server::AgentQueryService;
use lodestar_proto::v1::execution_context_command_service_server::ExecutionContextCommandService;
use lodestar_proto::v1::workflow_execution_command_service_server::WorkflowExecutionCommandService;
use lodestar_proto::v1::{
    Agent, AgentSpec, ApplyAgentRequest, ApplyExecutionContextRequest, ContextValue,
    CreateAgentRequest, CreateExecutionContextRequest, CreateWorkflowExecutionRequest,
    ExecutionContext, ExecutionContextSpec, GetByReferenceRequest, GetRequest, Metadata,
    OwnerScope, ResourceKind, UpdateAgentRequest, WorkflowExecution, WorkflowExecutionSpec,
};

fn agent_input(name: &str) -> Agent {
    Agent {
        metadata: Some(Metadata {
            name: name.into(),
            ..Metadata::default()
        }),
        spec: Some(AgentSpec {
            instructions: "review pull requests carefully".into(),
            ..AgentSpec::default()
        }),
        status: None,
    }
}

#[tokio::test]
async fn round_trip_preserves_spec_and_stamps_audit() {
    let harness = harness_disconnected();

    let created = AgentCommandService::create(
        &harness.api,
        req(
            ResourceKind::Agent,
            CreateAgentRequest {
                resource: Some(agent_input("PR Reviewer")),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();

    let id = created.metadata.as_ref().unwrap().id.clone();
    let fetched = AgentQueryService::get(
        &harness.api,
        req(ResourceKind::Agent, GetRequest { id: id.clone() }),
    )
    .await
    .unwrap()
    .into_inner();

    assert_eq!(fetched.spec, created.spec);
    assert_eq!(
        fetched.spec.as_ref().unwrap().instructions,
        "review pull requests carefully"
    );
    let audit = fetched.status.as_ref().unwrap().audit.as_ref().unwrap();
    assert_eq!(audit.spec_audit.as_ref().unwrap().created_by, "user:test");
    assert_eq!(audit.status_audit.as_ref().unwrap().created_by, "user:test");
}

#[tokio::test]
async fn apply_twice_is_idempotent() {
    let harness = harness_disconnected();

    let first = AgentCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Agent,
            ApplyAgentRequest {
                resource: Some(agent_input("PR Reviewer")),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();

    let second = AgentCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Agent,
            ApplyAgentRequest {
                resource: Some(agent_input("PR Reviewer")),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();

    let first_md = first.metadata.as_ref().unwrap();
    let second_md = second.metadata.as_ref().unwrap();
    assert_eq!(first_md.id, second_md.id);
    assert_eq!(first_md.slug, second_md.slug);

    // Status differs only in the status audit's updated fields.
    let mut first_status = first.status.clone().unwrap();
    let mut second_status = second.status.clone().unwrap();
    assert_eq!(
        first_status.default_instance_id,
        second_status.default_instance_id
    );
    let first_audit = first_status.audit.as_mut().unwrap();
    let second_audit = second_status.audit.as_mut().unwrap();
    assert_eq!(first_audit.spec_audit, second_audit.spec_audit);
    let first_sa = first_audit.status_audit.as_mut().unwrap();
    let second_sa = second_audit.status_audit.as_mut().unwrap();
    assert_eq!(first_sa.created_by, second_sa.created_by);
    assert_eq!(first_sa.created_at, second_sa.created_at);
    second_sa.updated_at.clone_from(&first_sa.updated_at);
    second_sa.updated_by.clone_from(&first_sa.updated_by);
    assert_eq!(first_sa, second_sa);
}

#[tokio::test]
async fn update_preserves_system_status() {
    let harness = harness_disconnected();

    let created = AgentCommandService::create(
        &harness.api,
        req(
            ResourceKind::Agent,
            CreateAgentRequest {
                resource: Some(agent_input("PR Reviewer")),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();
    let id = created.metadata.as_ref().unwrap().id.clone();
    let instance_id = created.status.as_ref().unwrap().default_instance_id.clone();
    assert!(!instance_id.is_empty());

    let mut update = agent_input("PR Reviewer");
    update.metadata.as_mut().unwrap().id = id.clone();
    update.spec.as_mut().unwrap().instructions = "be stricter about tests".into();
    let updated = AgentCommandService::update(
        &harness.api,
        req(
            ResourceKind::Agent,
            UpdateAgentRequest {
                resource: Some(update),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();

    assert_eq!(
        updated.spec.as_ref().unwrap().instructions,
        "be stricter about tests"
    );
    assert_eq!(
        updated.status.as_ref().unwrap().default_instance_id,
        instance_id
    );
}

#[tokio::test]
async fn duplicate_slug_is_rejected() {
    let harness = harness_disconnected();

    AgentCommandService::create(
        &harness.api,
        req(
            ResourceKind::Agent,
            CreateAgentRequest {
                resource: Some(agent_input("PR Reviewer")),
            },
        ),
    )
    .await
    .unwrap();

    // Different display name, same derived slug.
    let status = AgentCommandService::create(
        &harness.api,
        req(
            ResourceKind::Agent,
            CreateAgentRequest {
                resource: Some(agent_input("PR  Reviewer!")),
            },
        ),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), tonic::Code::AlreadyExists);
    assert!(status.message().contains("pr-reviewer"));
}

#[tokio::test]
async fn lookup_by_reference_matches_lookup_by_id() {
    let harness = harness_disconnected();

    let created = AgentCommandService::create(
        &harness.api,
        req(
            ResourceKind::Agent,
            CreateAgentRequest {
                resource: Some(agent_input("PR Reviewer")),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();
    let id = created.metadata.as_ref().unwrap().id.clone();

    let by_id = AgentQueryService::get(&harness.api, req(ResourceKind::Agent, GetRequest { id }))
        .await
        .unwrap()
        .into_inner();
    let by_reference = AgentQueryService::get_by_reference(
        &harness.api,
        req(
            ResourceKind::Agent,
            GetByReferenceRequest {
                reference: "pr-reviewer".into(),
                org: String::new(),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();
    assert_eq!(by_id, by_reference);
}

#[tokio::test]
async fn platform_scope_rejected_for_workflow_executions() {
    let harness = harness_disconnected();

    let status = WorkflowExecutionCommandService::create(
        &harness.api,
        req(
            ResourceKind::WorkflowExecution,
            CreateWorkflowExecutionRequest {
                resource: Some(WorkflowExecution {
                    metadata: Some(Metadata {
                        name: "bad run".into(),
                        owner_scope: OwnerScope::Platform as i32,
                        ..Metadata::default()
                    }),
                    spec: Some(WorkflowExecutionSpec {
                        workflow_id: "wfl-1".into(),
                        ..WorkflowExecutionSpec::default()
                    }),
                    status: None,
                }),
            },
        ),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

fn context_input(name: &str, scope: OwnerScope) -> ExecutionContext {
    ExecutionContext {
        metadata: Some(Metadata {
            name: name.into(),
            owner_scope: scope as i32,
            ..Metadata::default()
        }),
        spec: Some(ExecutionContextSpec {
            execution_id: "aex-1".into(),
            data: [(
                "API_TOKEN".to_owned(),
                ContextValue {
                    value: "secret".into(),
                    is_secret: true,
                },
            )]
            .into_iter()
            .collect(),
        }),
        status: None,
    }
}

#[tokio::test]
async fn execution_context_scope_must_be_unspecified() {
    let harness = harness_disconnected();
    let status = ExecutionContextCommandService::create(
        &harness.api,
        req(
            ResourceKind::ExecutionContext,
            CreateExecutionContextRequest {
                resource: Some(context_input("ctx", OwnerScope::Organization)),
            },
        ),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn execution_context_apply_conflicts_instead_of_updating() {
    let harness = harness_disconnected();

    ExecutionContextCommandService::apply(
        &harness.api,
        req(
            ResourceKind::ExecutionContext,
            ApplyExecutionContextRequest {
                resource: Some(context_input("run ctx", OwnerScope::Unspecified)),
            },
        ),
    )
    .await
    .unwrap();

    let status = ExecutionContextCommandService::apply(
        &harness.api,
        req(
            ResourceKind::ExecutionContext,
            ApplyExecutionContextRequest {
                resource: Some(context_input("run ctx", OwnerScope::Unspecified)),
            },
        ),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), tonic::Code::AlreadyExists);
}

#[tokio::test]
async fn missing_kind_extension_is_an_internal_error() {
    let harness = harness_disconnected();
    // A bare request without the middleware's kind injection.
    let status = AgentCommandService::create(
        &harness.api,
        tonic::Request::new(CreateAgentRequest {
            resource: Some(agent_input("X")),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Internal);
    assert!(status.message().contains("kind middleware"));
}
