//! Default-instance behavior for agents: the implicitly-managed
//! `"<slug>-default"` child and the parent's status reference.

mod common;

use common::{harness_disconnected, req};

use lodestar_proto::v1::agent_command_service_server::AgentCommandService;
use lodestar_proto::v1::agent_instance_query_service_server::AgentInstanceQueryService;
use lodestar_proto::v1::{
    Agent, AgentInstance, AgentSpec, ApplyAgentRequest, CreateAgentRequest, GetByReferenceRequest,
    ListRequest, Metadata, ResourceKind,
};

fn agent_input(instructions: &str) -> Agent {
    Agent {
        metadata: Some(Metadata {
            name: "PR Reviewer".into(),
            ..Metadata::default()
        }),
        spec: Some(AgentSpec {
            instructions: instructions.into(),
            ..AgentSpec::default()
        }),
        status: None,
    }
}

async fn default_instance(
    harness: &common::Harness,
) -> Result<AgentInstance, tonic::Status> {
    AgentInstanceQueryService::get_by_reference(
        &harness.api,
        req(
            ResourceKind::AgentInstance,
            GetByReferenceRequest {
                reference: "pr-reviewer-default".into(),
                org: String::new(),
            },
        ),
    )
    .await
    .map(tonic::Response::into_inner)
}

async fn instance_count(harness: &common::Harness) -> usize {
    AgentInstanceQueryService::list(
        &harness.api,
        req(ResourceKind::AgentInstance, ListRequest { org: String::new() }),
    )
    .await
    .unwrap()
    .into_inner()
    .resources
    .len()
}

#[tokio::test]
async fn create_provisions_default_instance_and_reference() {
    let harness = harness_disconnected();

    let created = AgentCommandService::create(
        &harness.api,
        req(
            ResourceKind::Agent,
            CreateAgentRequest {
                resource: Some(agent_input("review PRs")),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();

    let instance = default_instance(&harness).await.unwrap();
    let instance_md = instance.metadata.as_ref().unwrap();
    assert_eq!(instance_md.slug, "pr-reviewer-default");
    assert_eq!(
        instance.spec.as_ref().unwrap().agent_id,
        created.metadata.as_ref().unwrap().id
    );
    assert_eq!(
        created.status.as_ref().unwrap().default_instance_id,
        instance_md.id
    );
}

#[tokio::test]
async fn reapply_reuses_the_default_instance() {
    let harness = harness_disconnected();

    let first = AgentCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Agent,
            ApplyAgentRequest {
                resource: Some(agent_input("review PRs")),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();
    let first_instance = first.status.as_ref().unwrap().default_instance_id.clone();

    let second = AgentCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Agent,
            ApplyAgentRequest {
                resource: Some(agent_input("review PRs")),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();

    assert_eq!(
        second.status.as_ref().unwrap().default_instance_id,
        first_instance
    );
    assert_eq!(instance_count(&harness).await, 1);
}

#[tokio::test]
async fn spec_update_keeps_the_instance_reference() {
    let harness = harness_disconnected();

    let first = AgentCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Agent,
            ApplyAgentRequest {
                resource: Some(agent_input("review PRs")),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();
    let original_instance = first.status.as_ref().unwrap().default_instance_id.clone();

    // Apply with modified instructions (the update branch).
    let updated = AgentCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Agent,
            ApplyAgentRequest {
                resource: Some(agent_input("review PRs and be kind")),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();

    assert_eq!(
        updated.spec.as_ref().unwrap().instructions,
        "review PRs and be kind"
    );
    assert_eq!(
        updated.status.as_ref().unwrap().default_instance_id,
        original_instance
    );
    assert_eq!(instance_count(&harness).await, 1);
}
