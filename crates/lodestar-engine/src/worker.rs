//! The embedded task worker.
//!
//! Spawned by the supervisor as `lodestar __worker`. Long-polls the
//! reserved task queues and runs three activities:
//!
//! - `validate_workflow` — structural validation of a user workflow
//!   document (the functional health check behind `Workflow.Apply`);
//! - `execute_workflow` — runs a user workflow's task chain;
//! - `execute_agent` — pulls the execution resource and its context from
//!   the control plane, dispatches to the executor container, and relays
//!   its event stream.
//!
//! Every activity publishes progress to the control plane's execution
//! event ingress; the control plane fans events out to subscribers and
//! persists phase transitions.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_stream::wrappers::ReceiverStream;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, error, info, warn};

use lodestar_proto::engine::v1::PollActivityTaskResponse;
use lodestar_proto::v1::execution_event_service_client::ExecutionEventServiceClient;
use lodestar_proto::v1::agent_executor_service_client::AgentExecutorServiceClient;
use lodestar_proto::v1::agent_execution_query_service_client::AgentExecutionQueryServiceClient;
use lodestar_proto::v1::agent_instance_query_service_client::AgentInstanceQueryServiceClient;
use lodestar_proto::v1::agent_query_service_client::AgentQueryServiceClient;
use lodestar_proto::v1::environment_query_service_client::EnvironmentQueryServiceClient;
use lodestar_proto::v1::execution_context_query_service_client::ExecutionContextQueryServiceClient;
use lodestar_proto::v1::skill_query_service_client::SkillQueryServiceClient;
use lodestar_proto::v1::{
    ErrorEvent, ExecuteAgentTask, ExecutionEvent, ExecutionPhase, GetByReferenceRequest,
    GetRequest, PhaseTransition, TaskEvent, execution_event,
};

use crate::client::EngineClient;
use crate::dsl::{self, DslTask, ValidationReport, WorkflowDoc};
use crate::error::{EngineError, EngineResult};
use crate::queues::{
    ACTIVITY_EXECUTE_AGENT, ACTIVITY_EXECUTE_WORKFLOW, ACTIVITY_VALIDATE_WORKFLOW,
    TASK_QUEUE_EXECUTION, TASK_QUEUE_VALIDATION, TASK_QUEUE_WORKFLOW_RUN,
};

/// Pause between polls after an engine error.
const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// Worker process configuration, passed down from the daemon.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Engine gRPC endpoint.
    pub engine_endpoint: String,
    /// Control plane gRPC endpoint (queries + event ingress).
    pub control_plane_endpoint: String,
    /// Agent executor gRPC endpoint.
    pub executor_endpoint: String,
    /// Worker identity reported to the engine.
    pub identity: String,
}

/// Input payload of the `execute_workflow` activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunInput {
    /// WorkflowExecution resource id.
    pub execution_id: String,
    /// The validated workflow document.
    pub doc: WorkflowDoc,
}

/// Input payload of the `execute_agent` activity. The activity pulls the
/// current resource state itself, so the payload is just the id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRunInput {
    /// AgentExecution resource id.
    pub execution_id: String,
}

/// Run the worker until shutdown. Connects to the engine (retrying until
/// it is reachable) and polls all reserved queues.
///
/// # Errors
///
/// Returns an error only for unrecoverable configuration problems;
/// transient engine failures are retried forever.
pub async fn run(config: WorkerConfig) -> EngineResult<()> {
    info!(
        engine = %config.engine_endpoint,
        control_plane = %config.control_plane_endpoint,
        "task worker starting"
    );

    let engine = loop {
        match EngineClient::connect(&config.engine_endpoint).await {
            Ok(client) => break client,
            Err(e) => {
                warn!(error = %e, "engine not reachable yet — retrying");
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
            }
        }
    };

    let worker = Arc::new(TaskWorker {
        engine,
        http: reqwest::Client::new(),
        config,
    });

    let queues = [
        TASK_QUEUE_VALIDATION,
        TASK_QUEUE_EXECUTION,
        TASK_QUEUE_WORKFLOW_RUN,
    ];
    let mut pollers = Vec::with_capacity(queues.len());
    for queue in queues {
        let worker = Arc::clone(&worker);
        pollers.push(tokio::spawn(async move { worker.poll_loop(queue).await }));
    }

    // Run until the daemon stops us.
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("task worker shutting down"),
        Err(e) => error!(error = %e, "signal handler failed; shutting down"),
    }
    for poller in pollers {
        poller.abort();
    }
    Ok(())
}

struct TaskWorker {
    engine: EngineClient,
    http: reqwest::Client,
    config: WorkerConfig,
}

impl TaskWorker {
    async fn poll_loop(&self, queue: &'static str) {
        debug!(queue, "poller started");
        loop {
            match self.engine.poll_activity_task(queue, &self.config.identity).await {
                Ok(task) if task.task_token.is_empty() => {}
                Ok(task) => self.dispatch(task).await,
                Err(e) => {
                    debug!(queue, error = %e, "poll failed");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                }
            }
        }
    }

    async fn dispatch(&self, task: PollActivityTaskResponse) {
        let token = task.task_token.clone();
        let activity = task.activity_type.clone();
        debug!(activity = %activity, workflow_id = %task.workflow_id, "activity received");

        let outcome = match activity.as_str() {
            ACTIVITY_VALIDATE_WORKFLOW => self.validate_workflow(&task.input).await,
            ACTIVITY_EXECUTE_WORKFLOW => self.execute_workflow(&task.input).await,
            ACTIVITY_EXECUTE_AGENT => self.execute_agent(&task.input).await,
            other => Err(EngineError::Serialization(format!(
                "unknown activity type '{other}'"
            ))),
        };

        let report = match outcome {
            Ok(result) => self.engine.complete_activity_task(token, result).await,
            Err(e) => {
                warn!(activity = %activity, error = %e, "activity failed");
                self.engine
                    .fail_activity_task(token, e.to_string(), true)
                    .await
            }
        };
        if let Err(e) = report {
            error!(activity = %activity, error = %e, "failed to report activity outcome");
        }
    }

    // -- validate_workflow ---------------------------------------------------

    /// User validation failures complete the activity with a failing
    /// report; only infrastructure problems fail the activity itself.
    async fn validate_workflow(&self, input: &str) -> EngineResult<String> {
        let doc: WorkflowDoc =
            serde_json::from_str(input).map_err(|e| EngineError::Serialization(e.to_string()))?;

        let report = match dsl::validate(&doc) {
            Ok(()) => {
                // Emitting the YAML exercises the same path the engine
                // consumes at run time.
                let _ = dsl::to_yaml(&doc).map_err(EngineError::WorkflowInvalid)?;
                ValidationReport::ok()
            }
            Err(error) => ValidationReport::invalid(error),
        };
        serde_json::to_string(&report).map_err(|e| EngineError::Serialization(e.to_string()))
    }

    // -- execute_workflow ----------------------------------------------------

    async fn execute_workflow(&self, input: &str) -> EngineResult<String> {
        let run: WorkflowRunInput =
            serde_json::from_str(input).map_err(|e| EngineError::Serialization(e.to_string()))?;
        let publisher = EventPublisher::open(&self.config.control_plane_endpoint).await?;

        publisher
            .phase(&run.execution_id, ExecutionPhase::Pending, ExecutionPhase::Running)
            .await;

        let mut outputs: serde_json::Map<String, Value> = serde_json::Map::new();
        let mut records = Vec::with_capacity(run.doc.tasks.len());

        for task in &run.doc.tasks {
            publisher
                .task(&run.execution_id, task.name(), ExecutionPhase::Running, String::new())
                .await;

            match self.run_task(task, &outputs).await {
                Ok(output) => {
                    let rendered = output.to_string();
                    publisher
                        .task(
                            &run.execution_id,
                            task.name(),
                            ExecutionPhase::Completed,
                            rendered.clone(),
                        )
                        .await;
                    outputs.insert(task.name().to_owned(), output);
                    records.push(json!({ "name": task.name(), "output": rendered }));
                }
                Err(e) => {
                    publisher
                        .task(&run.execution_id, task.name(), ExecutionPhase::Failed, String::new())
                        .await;
                    publisher.error(&run.execution_id, &e.to_string()).await;
                    publisher
                        .phase(&run.execution_id, ExecutionPhase::Running, ExecutionPhase::Failed)
                        .await;
                    publisher.close().await;
                    return Err(e);
                }
            }
        }

        publisher
            .phase(&run.execution_id, ExecutionPhase::Running, ExecutionPhase::Completed)
            .await;
        publisher.close().await;

        serde_json::to_string(&json!({ "tasks": records }))
            .map_err(|e| EngineError::Serialization(e.to_string()))
    }

    async fn run_task(
        &self,
        task: &DslTask,
        outputs: &serde_json::Map<String, Value>,
    ) -> EngineResult<Value> {
        match task {
            DslTask::Http {
                method,
                url,
                headers,
                body,
                timeout_seconds,
                ..
            } => {
                let method = reqwest::Method::from_bytes(method.as_bytes())
                    .map_err(|e| EngineError::Serialization(e.to_string()))?;
                let mut request = self
                    .http
                    .request(method, url.as_str())
                    .timeout(Duration::from_secs(u64::from(*timeout_seconds)));
                for (key, value) in headers {
                    request = request.header(key, value);
                }
                if !body.is_empty() {
                    request = request.body(body.clone());
                }
                let response = request
                    .send()
                    .await
                    .and_then(reqwest::Response::error_for_status)
                    .map_err(|e| EngineError::Transport(e.to_string()))?;
                let text = response
                    .text()
                    .await
                    .map_err(|e| EngineError::Transport(e.to_string()))?;
                Ok(serde_json::from_str(&text).unwrap_or(Value::String(text)))
            }
            DslTask::Set { values, .. } => {
                let mut resolved = serde_json::Map::new();
                for (key, template) in values {
                    resolved.insert(key.clone(), resolve_template(template, outputs)?);
                }
                Ok(Value::Object(resolved))
            }
        }
    }

    // -- execute_agent -------------------------------------------------------

    async fn execute_agent(&self, input: &str) -> EngineResult<String> {
        let run: AgentRunInput =
            serde_json::from_str(input).map_err(|e| EngineError::Serialization(e.to_string()))?;
        let task = self.resolve_agent_task(&run.execution_id).await?;
        let publisher = EventPublisher::open(&self.config.control_plane_endpoint).await?;

        publisher
            .phase(&run.execution_id, ExecutionPhase::Pending, ExecutionPhase::Running)
            .await;

        let executor_channel = dial(&self.config.executor_endpoint).await?;
        let mut executor = AgentExecutorServiceClient::new(executor_channel);

        let mut stream = executor
            .execute_agent(task)
            .await
            .map_err(|e| {
                EngineError::Transport(format!("executor dispatch failed: {e}"))
            })?
            .into_inner();

        let mut terminal = ExecutionPhase::Completed;
        loop {
            match stream.message().await {
                Ok(Some(event)) => {
                    if let Some(execution_event::Event::PhaseTransition(ref transition)) =
                        event.event
                        && transition.to() == ExecutionPhase::Failed
                    {
                        terminal = ExecutionPhase::Failed;
                    }
                    publisher.forward(event).await;
                }
                Ok(None) => break,
                Err(e) => {
                    publisher.error(&run.execution_id, &e.to_string()).await;
                    publisher
                        .phase(&run.execution_id, ExecutionPhase::Running, ExecutionPhase::Failed)
                        .await;
                    publisher.close().await;
                    return Err(EngineError::Transport(e.to_string()));
                }
            }
        }

        publisher
            .phase(&run.execution_id, ExecutionPhase::Running, terminal)
            .await;
        publisher.close().await;

        serde_json::to_string(&json!({ "phase": terminal.as_str_name() }))
            .map_err(|e| EngineError::Serialization(e.to_string()))
    }

    /// Pull the execution, its agent/instance, referenced skills and
    /// environments, and the execution context, and assemble the dispatch
    /// payload. Context data rides in the payload, never on disk.
    async fn resolve_agent_task(&self, execution_id: &str) -> EngineResult<ExecuteAgentTask> {
        let channel = dial(&self.config.control_plane_endpoint).await?;

        let execution = AgentExecutionQueryServiceClient::new(channel.clone())
            .get(GetRequest {
                id: execution_id.to_owned(),
            })
            .await?
            .into_inner();
        let spec = execution.spec.clone().unwrap_or_default();

        let instance = AgentInstanceQueryServiceClient::new(channel.clone())
            .get(GetRequest {
                id: spec.agent_instance_id.clone(),
            })
            .await?
            .into_inner();
        let instance_spec = instance.spec.clone().unwrap_or_default();

        let agent = AgentQueryServiceClient::new(channel.clone())
            .get(GetRequest {
                id: instance_spec.agent_id.clone(),
            })
            .await?
            .into_inner();
        let agent_spec = agent.spec.clone().unwrap_or_default();

        // Environment layering: agent env refs, then inline env, then
        // per-run overrides.
        let mut env: std::collections::HashMap<String, String> = std::collections::HashMap::new();
        let mut env_client = EnvironmentQueryServiceClient::new(channel.clone());
        for env_ref in &agent_spec.env_refs {
            let environment = env_client
                .get_by_reference(GetByReferenceRequest {
                    reference: env_ref.clone(),
                    org: String::new(),
                })
                .await?
                .into_inner();
            if let Some(env_spec) = environment.spec {
                env.extend(env_spec.variables);
            }
        }
        env.extend(agent_spec.env.clone());
        env.extend(spec.runtime_env.clone());

        let mut skills = std::collections::HashMap::new();
        let mut skill_client = SkillQueryServiceClient::new(channel.clone());
        for skill_ref in &agent_spec.skill_refs {
            let skill = skill_client
                .get_by_reference(GetByReferenceRequest {
                    reference: skill_ref.clone(),
                    org: String::new(),
                })
                .await?
                .into_inner();
            if let Some(skill_spec) = skill.spec {
                skills.insert(skill_ref.clone(), skill_spec.markdown_content);
            }
        }

        let mut context_data = std::collections::HashMap::new();
        if !spec.execution_context_id.is_empty() {
            let context = ExecutionContextQueryServiceClient::new(channel)
                .get(GetRequest {
                    id: spec.execution_context_id.clone(),
                })
                .await?
                .into_inner();
            if let Some(context_spec) = context.spec {
                for (key, value) in context_spec.data {
                    context_data.insert(key, value.value);
                }
            }
        }

        Ok(ExecuteAgentTask {
            execution_id: execution_id.to_owned(),
            agent: Some(agent),
            instance: Some(instance),
            session_id: spec.session_id,
            initial_message: spec.initial_message,
            env,
            skills,
            context_data,
        })
    }
}

fn resolve_template(
    template: &str,
    outputs: &serde_json::Map<String, Value>,
) -> EngineResult<Value> {
    let references = dsl::extract_references(template);
    // A value that is exactly one reference keeps its JSON type.
    if references.len() == 1 && template == format!("${{{}}}", references[0]) {
        return lookup(&references[0], outputs);
    }
    let mut rendered = template.to_owned();
    for reference in references {
        let value = lookup(&reference, outputs)?;
        let as_text = match value {
            Value::String(s) => s,
            other => other.to_string(),
        };
        rendered = rendered.replace(&format!("${{{reference}}}"), &as_text);
    }
    Ok(Value::String(rendered))
}

fn lookup(reference: &str, outputs: &serde_json::Map<String, Value>) -> EngineResult<Value> {
    let mut parts = reference.split('.');
    let task = parts.next().unwrap_or_default();
    let mut current = outputs.get(task).ok_or_else(|| {
        EngineError::Serialization(format!("reference '${{{reference}}}' has no source task"))
    })?;
    for part in parts {
        current = current.get(part).ok_or_else(|| {
            EngineError::Serialization(format!(
                "reference '${{{reference}}}' missing field '{part}'"
            ))
        })?;
    }
    Ok(current.clone())
}

async fn dial(endpoint: &str) -> EngineResult<Channel> {
    Endpoint::from_shared(endpoint.to_owned())
        .map_err(|e| EngineError::Transport(e.to_string()))?
        .connect_timeout(Duration::from_secs(5))
        .connect()
        .await
        .map_err(|e| EngineError::Transport(e.to_string()))
}

// ---------------------------------------------------------------------------
// Event publishing
// ---------------------------------------------------------------------------

/// Client-streaming publisher into the control plane's event ingress.
struct EventPublisher {
    tx: tokio::sync::mpsc::Sender<ExecutionEvent>,
    handle: tokio::task::JoinHandle<()>,
}

impl EventPublisher {
    async fn open(control_plane_endpoint: &str) -> EngineResult<Self> {
        let channel = dial(control_plane_endpoint).await?;
        let mut client = ExecutionEventServiceClient::new(channel);
        let (tx, rx) = tokio::sync::mpsc::channel::<ExecutionEvent>(64);
        let handle = tokio::spawn(async move {
            if let Err(e) = client.publish(ReceiverStream::new(rx)).await {
                warn!(error = %e, "event publish stream failed");
            }
        });
        Ok(Self { tx, handle })
    }

    async fn send(&self, event: ExecutionEvent) {
        if self.tx.send(event).await.is_err() {
            warn!("event channel closed; dropping event");
        }
    }

    async fn forward(&self, event: ExecutionEvent) {
        self.send(event).await;
    }

    async fn phase(&self, execution_id: &str, from: ExecutionPhase, to: ExecutionPhase) {
        self.send(ExecutionEvent {
            execution_id: execution_id.to_owned(),
            unix_ms: chrono::Utc::now().timestamp_millis(),
            event: Some(execution_event::Event::PhaseTransition(PhaseTransition {
                from: from as i32,
                to: to as i32,
            })),
        })
        .await;
    }

    async fn task(&self, execution_id: &str, name: &str, phase: ExecutionPhase, output: String) {
        self.send(ExecutionEvent {
            execution_id: execution_id.to_owned(),
            unix_ms: chrono::Utc::now().timestamp_millis(),
            event: Some(execution_event::Event::TaskEvent(TaskEvent {
                task_name: name.to_owned(),
                phase: phase as i32,
                output,
            })),
        })
        .await;
    }

    async fn error(&self, execution_id: &str, message: &str) {
        self.send(ExecutionEvent {
            execution_id: execution_id.to_owned(),
            unix_ms: chrono::Utc::now().timestamp_millis(),
            event: Some(execution_event::Event::Error(ErrorEvent {
                message: message.to_owned(),
            })),
        })
        .await;
    }

    /// Close the stream and wait for the ingress to acknowledge.
    async fn close(self) {
        drop(self.tx);
        let _ = self.handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> serde_json::Map<String, Value> {
        let mut map = serde_json::Map::new();
        map.insert(
            "fetchData".to_owned(),
            json!({ "title": "hello", "userId": 1 }),
        );
        map
    }

    #[test]
    fn test_resolve_single_reference_keeps_type() {
        let value = resolve_template("${fetchData.userId}", &outputs()).unwrap();
        assert_eq!(value, json!(1));
    }

    #[test]
    fn test_resolve_interpolation_renders_string() {
        let value = resolve_template("title=${fetchData.title}!", &outputs()).unwrap();
        assert_eq!(value, json!("title=hello!"));
    }

    #[test]
    fn test_resolve_missing_reference_errors() {
        assert!(resolve_template("${missing.title}", &outputs()).is_err());
        assert!(resolve_template("${fetchData.nope}", &outputs()).is_err());
    }

    #[test]
    fn test_plain_value_passes_through() {
        let value = resolve_template("plain", &outputs()).unwrap();
        assert_eq!(value, json!("plain"));
    }

    #[test]
    fn test_run_input_payload_round_trip() {
        let input = AgentRunInput {
            execution_id: "aex-1".into(),
        };
        let encoded = serde_json::to_string(&input).unwrap();
        let decoded: AgentRunInput = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.execution_id, "aex-1");
    }
}
