//! `lodestar run` - execute a workflow or agent and stream its progress.
//!
//! Inside a project directory the manifest is always applied first (code
//! is the source of truth). Lookup tries workflows before agents; with no
//! argument the single runnable resource is auto-selected.

use anyhow::{Result, bail};
use colored::Colorize;

use lodestar_proto::v1::{
    AgentExecution, AgentExecutionSpec, CreateAgentExecutionRequest,
    CreateWorkflowExecutionRequest, ExecutionPhase, GetByReferenceRequest, ListRequest, Metadata,
    OwnerScope, SubscribeExecutionRequest, WorkflowExecution, WorkflowExecutionSpec,
    agent_execution_command_service_client::AgentExecutionCommandServiceClient,
    agent_execution_query_service_client::AgentExecutionQueryServiceClient,
    agent_query_service_client::AgentQueryServiceClient, execution_event,
    workflow_execution_command_service_client::WorkflowExecutionCommandServiceClient,
    workflow_execution_query_service_client::WorkflowExecutionQueryServiceClient,
    workflow_query_service_client::WorkflowQueryServiceClient,
};

use crate::client;
use crate::commands::apply;

enum Target {
    Workflow(String),
    Agent(String),
}

/// Run a named resource, or the only runnable one.
pub(crate) async fn execute(name: Option<&str>, message: &str) -> Result<()> {
    // Code is the source of truth: apply before running when a manifest
    // is present.
    if std::path::Path::new(apply::DEFAULT_MANIFEST).is_file() {
        let report = apply::apply_manifest(apply::DEFAULT_MANIFEST).await?;
        if report.failed > 0 {
            report.print();
            bail!("apply failed; not running");
        }
        println!("{} applied {} resources", "✓".green(), report.applied);
    }

    let channel = client::connect(client::DIAL_TIMEOUT).await?;
    let target = resolve_target(channel.clone(), name).await?;

    match target {
        Target::Workflow(workflow_id) => run_workflow(channel, &workflow_id).await,
        Target::Agent(agent_id) => run_agent(channel, &agent_id, message).await,
    }
}

async fn resolve_target(
    channel: tonic::transport::Channel,
    name: Option<&str>,
) -> Result<Target> {
    let mut workflows = WorkflowQueryServiceClient::new(channel.clone());
    let mut agents = AgentQueryServiceClient::new(channel);

    if let Some(name) = name {
        let reference = lodestar_core::slugify(name).unwrap_or_else(|_| name.to_owned());
        // Workflow lookup first, then agent.
        if let Ok(response) = workflows
            .get_by_reference(GetByReferenceRequest {
                reference: reference.clone(),
                org: String::new(),
            })
            .await
        {
            let id = response
                .into_inner()
                .metadata
                .map(|m| m.id)
                .unwrap_or_default();
            return Ok(Target::Workflow(id));
        }
        if let Ok(response) = agents
            .get_by_reference(GetByReferenceRequest {
                reference: reference.clone(),
                org: String::new(),
            })
            .await
        {
            let id = response
                .into_inner()
                .metadata
                .map(|m| m.id)
                .unwrap_or_default();
            return Ok(Target::Agent(id));
        }
        bail!("no workflow or agent named '{reference}' — did you `lodestar apply`?");
    }

    // No argument: auto-select when exactly one runnable resource exists.
    let workflow_list = workflows
        .list(ListRequest { org: String::new() })
        .await?
        .into_inner()
        .resources;
    let agent_list = agents
        .list(ListRequest { org: String::new() })
        .await?
        .into_inner()
        .resources;

    match (workflow_list.len(), agent_list.len()) {
        (1, 0) => Ok(Target::Workflow(
            workflow_list[0]
                .metadata
                .clone()
                .map(|m| m.id)
                .unwrap_or_default(),
        )),
        (0, 1) => Ok(Target::Agent(
            agent_list[0]
                .metadata
                .clone()
                .map(|m| m.id)
                .unwrap_or_default(),
        )),
        (0, 0) => bail!("nothing to run — apply a project first"),
        _ => bail!("multiple resources available; name one: `lodestar run <name>`"),
    }
}

fn execution_metadata(prefix: &str) -> Metadata {
    Metadata {
        name: format!("{prefix}-run-{}", chrono::Utc::now().timestamp_millis()),
        owner_scope: OwnerScope::Organization as i32,
        ..Metadata::default()
    }
}

async fn run_workflow(channel: tonic::transport::Channel, workflow_id: &str) -> Result<()> {
    let mut commands = WorkflowExecutionCommandServiceClient::new(channel.clone());
    let created = commands
        .create(CreateWorkflowExecutionRequest {
            resource: Some(WorkflowExecution {
                metadata: Some(execution_metadata("workflow")),
                spec: Some(WorkflowExecutionSpec {
                    workflow_id: workflow_id.to_owned(),
                    ..WorkflowExecutionSpec::default()
                }),
                status: None,
            }),
        })
        .await
        .map_err(map_create_error)?
        .into_inner();

    let execution_id = created.metadata.map(|m| m.id).unwrap_or_default();
    println!("execution {execution_id}");

    let mut queries = WorkflowExecutionQueryServiceClient::new(channel);
    let stream = queries
        .subscribe(SubscribeExecutionRequest {
            execution_id: execution_id.clone(),
        })
        .await;
    match stream {
        Ok(response) => stream_events(response.into_inner()).await,
        Err(status) => {
            // The execution is durable; a broken subscription is not a
            // failed run.
            println!(
                "{} event stream unavailable ({}); execution continues",
                "!".yellow(),
                status.message()
            );
            Ok(())
        }
    }
}

async fn run_agent(
    channel: tonic::transport::Channel,
    agent_id: &str,
    message: &str,
) -> Result<()> {
    let mut commands = AgentExecutionCommandServiceClient::new(channel.clone());
    let created = commands
        .create(CreateAgentExecutionRequest {
            resource: Some(AgentExecution {
                metadata: Some(execution_metadata("agent")),
                spec: Some(AgentExecutionSpec {
                    agent_id: agent_id.to_owned(),
                    initial_message: message.to_owned(),
                    ..AgentExecutionSpec::default()
                }),
                status: None,
            }),
        })
        .await
        .map_err(map_create_error)?
        .into_inner();

    let execution_id = created.metadata.map(|m| m.id).unwrap_or_default();
    println!("execution {execution_id}");

    let mut queries = AgentExecutionQueryServiceClient::new(channel);
    let stream = queries
        .subscribe(SubscribeExecutionRequest {
            execution_id: execution_id.clone(),
        })
        .await;
    match stream {
        Ok(response) => stream_events(response.into_inner()).await,
        Err(status) => {
            println!(
                "{} event stream unavailable ({}); execution continues",
                "!".yellow(),
                status.message()
            );
            Ok(())
        }
    }
}

fn map_create_error(status: tonic::Status) -> anyhow::Error {
    if status.code() == tonic::Code::Unavailable {
        anyhow::anyhow!("workflow engine not ready — retry in a moment")
    } else {
        anyhow::anyhow!("{}", status.message())
    }
}

/// Render the event stream until a terminal phase arrives.
async fn stream_events(
    mut stream: tonic::Streaming<lodestar_proto::v1::ExecutionEvent>,
) -> Result<()> {
    loop {
        let Some(event) = stream.message().await? else {
            return Ok(());
        };
        match event.event {
            Some(execution_event::Event::PhaseTransition(transition)) => {
                let to = transition.to();
                println!("phase: {}", phase_label(to));
                if to.is_terminal() {
                    if to == ExecutionPhase::Completed {
                        return Ok(());
                    }
                    std::process::exit(1);
                }
            }
            Some(execution_event::Event::AgentMessage(message)) => {
                println!("{}: {}", message.role.bold(), message.content);
            }
            Some(execution_event::Event::ToolEvent(tool)) => {
                println!("{} {}", "tool".dimmed(), tool.tool_name);
            }
            Some(execution_event::Event::TaskEvent(task)) => {
                println!(
                    "task {}: {}",
                    task.task_name,
                    phase_label(task.phase())
                );
            }
            Some(execution_event::Event::Error(error)) => {
                eprintln!("{} {}", "error:".red(), error.message);
            }
            None => {}
        }
    }
}

fn phase_label(phase: ExecutionPhase) -> String {
    let label = match phase {
        ExecutionPhase::Pending => "pending",
        ExecutionPhase::Running => "running",
        ExecutionPhase::Completed => "completed",
        ExecutionPhase::Failed => "failed",
        ExecutionPhase::Cancelled => "cancelled",
        ExecutionPhase::Unspecified => "unknown",
    };
    match phase {
        ExecutionPhase::Completed => label.green().to_string(),
        ExecutionPhase::Failed | ExecutionPhase::Cancelled => label.red().to_string(),
        _ => label.to_string(),
    }
}
