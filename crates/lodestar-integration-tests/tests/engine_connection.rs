//! Engine availability semantics: creates refuse while the engine is
//! down and recover after it returns.

mod common;

use common::{
    FakeEngineHandle, ValidationMode, harness_disconnected, harness_with_engine, req,
    wait_for_state,
};

use lodestar_engine::ConnectionState;
use lodestar_proto::v1::agent_command_service_server::AgentCommandService;
use lodestar_proto::v1::agent_execution_command_service_server::AgentExecutionCommandService;
use lodestar_proto::v1::{
    Agent, AgentExecution, AgentExecutionSpec, AgentSpec, CreateAgentExecutionRequest,
    CreateAgentRequest, Metadata, ResourceKind,
};

async fn seed_agent(harness: &common::Harness) -> String {
    let agent = AgentCommandService::create(
        &harness.api,
        req(
            ResourceKind::Agent,
            CreateAgentRequest {
                resource: Some(Agent {
                    metadata: Some(Metadata {
                        name: "PR Reviewer".into(),
                        ..Metadata::default()
                    }),
                    spec: Some(AgentSpec {
                        instructions: "review PRs".into(),
                        ..AgentSpec::default()
                    }),
                    status: None,
                }),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();
    agent.metadata.unwrap().id
}

fn execution_input(agent_id: &str, name: &str) -> CreateAgentExecutionRequest {
    CreateAgentExecutionRequest {
        resource: Some(AgentExecution {
            metadata: Some(Metadata {
                name: name.into(),
                ..Metadata::default()
            }),
            spec: Some(AgentExecutionSpec {
                agent_id: agent_id.into(),
                initial_message: "hello".into(),
                ..AgentExecutionSpec::default()
            }),
            status: None,
        }),
    }
}

#[tokio::test]
async fn create_refuses_while_engine_unavailable() {
    let harness = harness_disconnected();
    let agent_id = seed_agent(&harness).await;

    let status = AgentExecutionCommandService::create(
        &harness.api,
        req(
            ResourceKind::AgentExecution,
            execution_input(&agent_id, "run 1"),
        ),
    )
    .await
    .unwrap_err();

    assert_eq!(status.code(), tonic::Code::Unavailable);
    assert!(status.message().contains("workflow engine unavailable"));
}

#[tokio::test]
async fn create_succeeds_and_records_engine_run() {
    let engine = FakeEngineHandle::spawn(ValidationMode::Inline).await;
    let harness = harness_with_engine(&engine.endpoint()).await;
    let agent_id = seed_agent(&harness).await;

    let created = AgentExecutionCommandService::create(
        &harness.api,
        req(
            ResourceKind::AgentExecution,
            execution_input(&agent_id, "run 1"),
        ),
    )
    .await
    .unwrap()
    .into_inner();

    let status = created.status.unwrap();
    assert!(!status.engine_run_id.is_empty());
    assert_eq!(engine.engine.started_count().await, 1);

    // The auto-managed default instance was wired into the spec.
    assert!(!created.spec.unwrap().agent_instance_id.is_empty());
}

#[tokio::test]
async fn engine_restart_cycle_recovers_creates() {
    let mut engine = FakeEngineHandle::spawn(ValidationMode::Inline).await;
    let port = engine.port;
    let harness = harness_with_engine(&engine.endpoint()).await;
    let agent_id = seed_agent(&harness).await;

    // 1. Engine up: create succeeds.
    AgentExecutionCommandService::create(
        &harness.api,
        req(
            ResourceKind::AgentExecution,
            execution_input(&agent_id, "run 1"),
        ),
    )
    .await
    .unwrap();

    // 2. Engine down: create fails with Unavailable, never silent success.
    engine.stop().await;
    let status = AgentExecutionCommandService::create(
        &harness.api,
        req(
            ResourceKind::AgentExecution,
            execution_input(&agent_id, "run 2"),
        ),
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), tonic::Code::Unavailable);

    // 3. Engine back on the same port: within a probe interval the
    // supervisor reconnects and creates succeed again.
    let engine = FakeEngineHandle::spawn_on(ValidationMode::Inline, port).await;
    wait_for_state(&harness.connection, ConnectionState::Connected).await;

    let created = AgentExecutionCommandService::create(
        &harness.api,
        req(
            ResourceKind::AgentExecution,
            execution_input(&agent_id, "run 3"),
        ),
    )
    .await
    .unwrap()
    .into_inner();
    assert!(!created.status.unwrap().engine_run_id.is_empty());
    assert!(engine.engine.started_count().await >= 1);
}

#[tokio::test]
async fn failed_create_leaves_no_orphan_resource() {
    let harness = harness_disconnected();
    let agent_id = seed_agent(&harness).await;

    let _ = AgentExecutionCommandService::create(
        &harness.api,
        req(
            ResourceKind::AgentExecution,
            execution_input(&agent_id, "run 1"),
        ),
    )
    .await
    .unwrap_err();

    let executions: Vec<lodestar_proto::v1::AgentExecution> = harness.store.list().await.unwrap();
    assert!(executions.is_empty());
}
