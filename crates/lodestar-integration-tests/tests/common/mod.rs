//! Shared fixtures: an in-memory control plane harness and a fake engine.

// Not every test binary uses every fixture.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{Request, Response, Status};

use lodestar_core::{Actor, BackoffSchedule};
use lodestar_engine::dsl::{self, WorkflowDoc};
use lodestar_engine::queues::WORKFLOW_TYPE_VALIDATION;
use lodestar_engine::{ConnectionState, ConnectionSupervisor};
use lodestar_proto::engine::v1::workflow_engine_server::{WorkflowEngine, WorkflowEngineServer};
use lodestar_proto::engine::v1::{
    CompleteActivityTaskRequest, CompleteActivityTaskResponse, DescribeNamespaceRequest,
    DescribeNamespaceResponse, FailActivityTaskRequest, FailActivityTaskResponse,
    GetWorkflowResultRequest, GetWorkflowResultResponse, PollActivityTaskRequest,
    PollActivityTaskResponse, StartWorkflowRequest, StartWorkflowResponse,
};
use lodestar_proto::v1::ResourceKind;
use lodestar_server::controllers::{Api, Ctx};
use lodestar_server::{ExecutionEventHub, ExecutionOrchestrator};
use lodestar_store::{MemoryKvStore, ResourceStore};

/// Behavior of the fake engine's validation workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationMode {
    /// Validate documents inline, the way a polling worker would.
    Inline,
    /// Never complete, simulating a worker that is not polling.
    Stalled,
}

/// In-process fake workflow engine.
#[derive(Clone)]
pub struct FakeEngine {
    mode: ValidationMode,
    started: Arc<Mutex<HashMap<String, StartWorkflowRequest>>>,
}

impl FakeEngine {
    fn new(mode: ValidationMode) -> Self {
        Self {
            mode,
            started: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Number of workflows started so far.
    pub async fn started_count(&self) -> usize {
        self.started.lock().await.len()
    }
}

#[tonic::async_trait]
impl WorkflowEngine for FakeEngine {
    async fn describe_namespace(
        &self,
        request: Request<DescribeNamespaceRequest>,
    ) -> Result<Response<DescribeNamespaceResponse>, Status> {
        Ok(Response::new(DescribeNamespaceResponse {
            namespace: request.into_inner().namespace,
            engine_version: "fake".to_owned(),
        }))
    }

    async fn start_workflow(
        &self,
        request: Request<StartWorkflowRequest>,
    ) -> Result<Response<StartWorkflowResponse>, Status> {
        let inner = request.into_inner();
        let run_id = format!("run-{}", inner.workflow_id);
        self.started
            .lock()
            .await
            .insert(inner.workflow_id.clone(), inner);
        Ok(Response::new(StartWorkflowResponse { run_id }))
    }

    async fn get_workflow_result(
        &self,
        request: Request<GetWorkflowResultRequest>,
    ) -> Result<Response<GetWorkflowResultResponse>, Status> {
        let inner = request.into_inner();
        let started = self.started.lock().await;
        let Some(start) = started.get(&inner.workflow_id) else {
            return Err(Status::not_found("unknown workflow"));
        };

        if start.workflow_type == WORKFLOW_TYPE_VALIDATION && self.mode == ValidationMode::Inline {
            let doc: WorkflowDoc = serde_json::from_str(&start.input)
                .map_err(|e| Status::invalid_argument(e.to_string()))?;
            let report = match dsl::validate(&doc) {
                Ok(()) => dsl::ValidationReport::ok(),
                Err(error) => dsl::ValidationReport::invalid(error),
            };
            let output = serde_json::to_string(&report)
                .map_err(|e| Status::internal(e.to_string()))?;
            return Ok(Response::new(GetWorkflowResultResponse {
                completed: true,
                failed: false,
                output,
                error: String::new(),
            }));
        }

        // Executions (and stalled validation) stay in flight.
        Ok(Response::new(GetWorkflowResultResponse {
            completed: false,
            failed: false,
            output: String::new(),
            error: String::new(),
        }))
    }

    async fn poll_activity_task(
        &self,
        _request: Request<PollActivityTaskRequest>,
    ) -> Result<Response<PollActivityTaskResponse>, Status> {
        Ok(Response::new(PollActivityTaskResponse::default()))
    }

    async fn complete_activity_task(
        &self,
        _request: Request<CompleteActivityTaskRequest>,
    ) -> Result<Response<CompleteActivityTaskResponse>, Status> {
        Ok(Response::new(CompleteActivityTaskResponse {}))
    }

    async fn fail_activity_task(
        &self,
        _request: Request<FailActivityTaskRequest>,
    ) -> Result<Response<FailActivityTaskResponse>, Status> {
        Ok(Response::new(FailActivityTaskResponse {}))
    }
}

/// A running fake engine that can be stopped and restarted on its port.
pub struct FakeEngineHandle {
    pub engine: FakeEngine,
    pub port: u16,
    shutdown: Option<oneshot::Sender<()>>,
}

impl FakeEngineHandle {
    /// Spawn on an OS-assigned port.
    pub async fn spawn(mode: ValidationMode) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake engine");
        let port = listener.local_addr().expect("local addr").port();
        Self::spawn_with(mode, listener, port).await
    }

    /// Spawn on a specific port (restart scenarios).
    pub async fn spawn_on(mode: ValidationMode, port: u16) -> Self {
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .expect("rebind fake engine");
        Self::spawn_with(mode, listener, port).await
    }

    async fn spawn_with(
        mode: ValidationMode,
        listener: tokio::net::TcpListener,
        port: u16,
    ) -> Self {
        let engine = FakeEngine::new(mode);
        let service = WorkflowEngineServer::new(engine.clone());
        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            let _ = tonic::transport::Server::builder()
                .add_service(service)
                .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async {
                    let _ = rx.await;
                })
                .await;
        });
        Self {
            engine,
            port,
            shutdown: Some(tx),
        }
    }

    /// Engine endpoint URL.
    pub fn endpoint(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Stop the server, freeing the port.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        // Give the listener a beat to release the port.
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// The assembled in-process control plane under test.
pub struct Harness {
    pub api: Api,
    pub store: ResourceStore,
    pub connection: Arc<ConnectionSupervisor>,
    pub hub: Arc<ExecutionEventHub>,
}

fn build_harness(connection: Arc<ConnectionSupervisor>) -> Harness {
    let store = ResourceStore::new(MemoryKvStore::shared());
    let hub = Arc::new(ExecutionEventHub::new(store.clone()));
    let orchestrator = Arc::new(ExecutionOrchestrator::new(Arc::clone(&connection)));
    let api = Api::new(Ctx {
        store: store.clone(),
        actor: Actor::new("user:test"),
        orchestrator,
        hub: Arc::clone(&hub),
    });
    Harness {
        api,
        store,
        connection,
        hub,
    }
}

/// Harness whose engine endpoint points nowhere: the workflow creator is
/// never available.
pub fn harness_disconnected() -> Harness {
    let connection = ConnectionSupervisor::with_timing(
        "http://127.0.0.1:9",
        Duration::from_millis(200),
        BackoffSchedule::new(Duration::from_millis(50), Duration::from_millis(200)),
    );
    build_harness(connection)
}

/// Harness wired to a live fake engine; waits for the connection.
pub async fn harness_with_engine(endpoint: &str) -> Harness {
    let connection = ConnectionSupervisor::with_timing(
        endpoint.to_owned(),
        Duration::from_millis(200),
        BackoffSchedule::new(Duration::from_millis(50), Duration::from_millis(200)),
    );
    tokio::spawn(Arc::clone(&connection).run());
    wait_for_state(&connection, ConnectionState::Connected).await;
    build_harness(connection)
}

/// Poll until the supervisor reaches the given state (5 s cap).
pub async fn wait_for_state(connection: &Arc<ConnectionSupervisor>, state: ConnectionState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if connection.state().await == state {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("connection never reached {state:?}");
}

/// Build a request with the resource kind injected, the way the kind
/// middleware does for real traffic.
pub fn req<T>(kind: ResourceKind, message: T) -> Request<T> {
    let mut request = Request::new(message);
    request.extensions_mut().insert(kind);
    request
}
