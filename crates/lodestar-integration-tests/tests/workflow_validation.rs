//! Workflow apply: engine-backed validation, default instances, and the
//! distinction between user errors and validation-system errors.

mod common;

use common::{FakeEngineHandle, ValidationMode, harness_with_engine, req};

use lodestar_proto::v1::workflow_command_service_server::WorkflowCommandService;
use lodestar_proto::v1::workflow_query_service_server::WorkflowQueryService;
use lodestar_proto::v1::{
    ApplyWorkflowRequest, GetByReferenceRequest, HttpTask, Metadata, ResourceKind, SetTask,
    Workflow, WorkflowSpec, WorkflowTask, workflow_task,
};

fn data_fetch_workflow(url: &str) -> Workflow {
    Workflow {
        metadata: Some(Metadata {
            name: "Basic Data Fetch".into(),
            ..Metadata::default()
        }),
        spec: Some(WorkflowSpec {
            namespace: "data-processing".into(),
            version: "1.0.0".into(),
            tasks: vec![
                WorkflowTask {
                    name: "fetchData".into(),
                    kind: Some(workflow_task::Kind::Http(HttpTask {
                        method: "GET".into(),
                        url: url.into(),
                        timeout_seconds: 10,
                        ..HttpTask::default()
                    })),
                },
                WorkflowTask {
                    name: "processData".into(),
                    kind: Some(workflow_task::Kind::Set(SetTask {
                        values: [("title".to_owned(), "${fetchData.title}".to_owned())]
                            .into_iter()
                            .collect(),
                    })),
                },
            ],
            ..WorkflowSpec::default()
        }),
        status: None,
    }
}

#[tokio::test]
async fn valid_workflow_applies_and_is_retrievable_by_slug() {
    let engine = FakeEngineHandle::spawn(ValidationMode::Inline).await;
    let harness = harness_with_engine(&engine.endpoint()).await;

    let applied = WorkflowCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Workflow,
            ApplyWorkflowRequest {
                resource: Some(data_fetch_workflow(
                    "https://jsonplaceholder.typicode.com/posts/1",
                )),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();

    assert_eq!(applied.metadata.as_ref().unwrap().slug, "basic-data-fetch");
    assert!(!applied.status.as_ref().unwrap().default_instance_id.is_empty());

    let fetched = WorkflowQueryService::get_by_reference(
        &harness.api,
        req(
            ResourceKind::Workflow,
            GetByReferenceRequest {
                reference: "basic-data-fetch".into(),
                org: String::new(),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();
    assert_eq!(fetched.metadata.unwrap().id, applied.metadata.unwrap().id);
}

#[tokio::test]
async fn invalid_workflow_reports_offending_path_and_is_not_stored() {
    let engine = FakeEngineHandle::spawn(ValidationMode::Inline).await;
    let harness = harness_with_engine(&engine.endpoint()).await;

    let status = WorkflowCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Workflow,
            ApplyWorkflowRequest {
                resource: Some(data_fetch_workflow("not a url")),
            },
        ),
    )
    .await
    .unwrap_err();

    assert_eq!(status.code(), tonic::Code::InvalidArgument);
    assert!(status.message().contains("url"), "{}", status.message());

    let workflows: Vec<Workflow> = harness.store.list().await.unwrap();
    assert!(workflows.is_empty());
}

#[tokio::test]
async fn stalled_validation_is_a_system_error_not_a_user_error() {
    let engine = FakeEngineHandle::spawn(ValidationMode::Stalled).await;
    let harness = harness_with_engine(&engine.endpoint()).await;

    let status = WorkflowCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Workflow,
            ApplyWorkflowRequest {
                resource: Some(data_fetch_workflow(
                    "https://jsonplaceholder.typicode.com/posts/1",
                )),
            },
        ),
    )
    .await
    .unwrap_err();

    assert_eq!(status.code(), tonic::Code::Internal);
    assert!(
        status.message().contains("validation system error"),
        "{}",
        status.message()
    );
}

#[tokio::test]
async fn reapply_keeps_workflow_identity() {
    let engine = FakeEngineHandle::spawn(ValidationMode::Inline).await;
    let harness = harness_with_engine(&engine.endpoint()).await;

    let workflow = data_fetch_workflow("https://jsonplaceholder.typicode.com/posts/1");
    let first = WorkflowCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Workflow,
            ApplyWorkflowRequest {
                resource: Some(workflow.clone()),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();

    let second = WorkflowCommandService::apply(
        &harness.api,
        req(
            ResourceKind::Workflow,
            ApplyWorkflowRequest {
                resource: Some(workflow),
            },
        ),
    )
    .await
    .unwrap()
    .into_inner();

    assert_eq!(
        first.metadata.as_ref().unwrap().id,
        second.metadata.as_ref().unwrap().id
    );
    assert_eq!(
        first.status.as_ref().unwrap().default_instance_id,
        second.status.as_ref().unwrap().default_instance_id
    );
}
