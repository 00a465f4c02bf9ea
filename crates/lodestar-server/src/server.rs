//! Daemon assembly: store, supervised components, engine connection, and
//! the gRPC server.

use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tonic::transport::Server;
use tracing::{info, warn};

use lodestar_core::{
    Actor, CONTROL_PLANE_PORT, ENGINE_PORT, EXECUTOR_PORT, HostPlatform, LodestarHome,
    resolve_host_address,
};
use lodestar_engine::ConnectionSupervisor;
use lodestar_proto::v1::{
    ComponentStatusInfo, DaemonStatusRequest, DaemonStatusResponse,
    agent_command_service_server::AgentCommandServiceServer,
    agent_execution_command_service_server::AgentExecutionCommandServiceServer,
    agent_execution_query_service_server::AgentExecutionQueryServiceServer,
    agent_instance_command_service_server::AgentInstanceCommandServiceServer,
    agent_instance_query_service_server::AgentInstanceQueryServiceServer,
    agent_query_service_server::AgentQueryServiceServer,
    daemon_service_server::{DaemonService, DaemonServiceServer},
    environment_command_service_server::EnvironmentCommandServiceServer,
    environment_query_service_server::EnvironmentQueryServiceServer,
    execution_context_command_service_server::ExecutionContextCommandServiceServer,
    execution_context_query_service_server::ExecutionContextQueryServiceServer,
    execution_event_service_server::ExecutionEventServiceServer,
    session_command_service_server::SessionCommandServiceServer,
    session_query_service_server::SessionQueryServiceServer,
    skill_command_service_server::SkillCommandServiceServer,
    skill_query_service_server::SkillQueryServiceServer,
    workflow_command_service_server::WorkflowCommandServiceServer,
    workflow_execution_command_service_server::WorkflowExecutionCommandServiceServer,
    workflow_execution_query_service_server::WorkflowExecutionQueryServiceServer,
    workflow_instance_query_service_server::WorkflowInstanceQueryServiceServer,
    workflow_query_service_server::WorkflowQueryServiceServer,
};
use lodestar_store::{ResourceStore, SurrealKvStore};
use lodestar_supervisor::{
    ContainerComponent, ContainerSpec, EngineBinaryManager, ExecutorBinaryManager, RestartPolicy,
    SubprocessComponent, SubprocessSpec, Supervisor,
};

use crate::config::DaemonConfig;
use crate::controllers::{Api, Ctx};
use crate::events::ExecutionEventHub;
use crate::kind_layer::KindLayer;
use crate::llm_env;
use crate::orchestrator::ExecutionOrchestrator;
use crate::registry::KindRegistry;

/// Errors from daemon bootstrap and serving.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Data directory problems.
    #[error(transparent)]
    Core(#[from] lodestar_core::CoreError),

    /// The resource store could not be opened.
    #[error(transparent)]
    Store(#[from] lodestar_store::StoreError),

    /// Binary provisioning or component startup failed.
    #[error(transparent)]
    Supervisor(#[from] lodestar_supervisor::SupervisorError),

    /// The gRPC listener failed.
    #[error("transport error: {0}")]
    Transport(String),
}

/// The assembled control plane.
pub struct ControlPlane {
    home: LodestarHome,
    store: ResourceStore,
    supervisor: Arc<Supervisor>,
    connection: Arc<ConnectionSupervisor>,
    api: Api,
    registry: Arc<KindRegistry>,
    managed_engine: bool,
    started_at: Instant,
}

impl ControlPlane {
    /// Assemble the control plane: open the store, provision binaries,
    /// register supervised components, and wire the engine connection.
    ///
    /// # Errors
    ///
    /// Fails when the data directory or store cannot be prepared.
    pub async fn bootstrap(home: LodestarHome) -> Result<Self, ServerError> {
        home.ensure_layout()?;

        let config = DaemonConfig::load(&home.config_file());
        let llm_settings = llm_env::resolve(&config.llm);
        let platform = HostPlatform::current();

        // An explicit engine endpoint disables managed engine mode.
        let (engine_endpoint, managed_engine) = match std::env::var("LODESTAR_ENGINE_ENDPOINT") {
            Ok(endpoint) if !endpoint.is_empty() => {
                info!(endpoint = %endpoint, "using external workflow engine");
                (endpoint, false)
            }
            _ => (format!("http://127.0.0.1:{ENGINE_PORT}"), true),
        };

        let kv = SurrealKvStore::open(home.store_dir())?;
        let store = ResourceStore::new(Arc::new(kv));

        let connection = ConnectionSupervisor::new(engine_endpoint.clone());
        let orchestrator = Arc::new(ExecutionOrchestrator::new(Arc::clone(&connection)));
        let hub = Arc::new(ExecutionEventHub::new(store.clone()));

        let api = Api::new(Ctx {
            store: store.clone(),
            actor: Actor::local_user(),
            orchestrator,
            hub,
        });

        // Supervised components, in dependency order: the engine first,
        // then the worker that polls it, then the executor the worker
        // dispatches into.
        let supervisor = Arc::new(Supervisor::new());
        let control_plane_endpoint = format!("http://127.0.0.1:{CONTROL_PLANE_PORT}");

        if managed_engine {
            let engine_manager = EngineBinaryManager::new(home.clone());
            engine_manager.ensure_installed().await?;
            supervisor
                .register(
                    Arc::new(SubprocessComponent::new(engine_manager.launch_spec())),
                    RestartPolicy::default(),
                )
                .await;
        }

        let worker_exe =
            std::env::current_exe().map_err(lodestar_supervisor::SupervisorError::Io)?;
        supervisor
            .register(
                Arc::new(SubprocessComponent::new(SubprocessSpec {
                    name: "worker".to_owned(),
                    command: worker_exe,
                    args: vec!["__worker".to_owned()],
                    env: vec![
                        ("LODESTAR_ENGINE_ENDPOINT".to_owned(), engine_endpoint.clone()),
                        (
                            "LODESTAR_CONTROL_PLANE_ENDPOINT".to_owned(),
                            control_plane_endpoint.clone(),
                        ),
                        (
                            "LODESTAR_EXECUTOR_ENDPOINT".to_owned(),
                            format!("http://127.0.0.1:{EXECUTOR_PORT}"),
                        ),
                    ],
                    port: None,
                    pid_file: home.pid_file("worker"),
                    log_file: home.log_file("worker"),
                    required: true,
                })),
                RestartPolicy::default(),
            )
            .await;

        // Executor container. The control plane supplies the executor
        // binary (version-matched via C9 extraction) through a read-only
        // bind mount, plus the LLM env and container-reachable endpoints.
        let executor_manager = ExecutorBinaryManager::new(home.clone());
        match executor_manager.ensure_installed().await {
            Ok(executor_binary) => {
                let mut env = llm_env::executor_env(&llm_settings, platform);
                env.push((
                    "LODESTAR_ENGINE_ENDPOINT".to_owned(),
                    resolve_host_address(&engine_endpoint, platform),
                ));
                env.push((
                    "LODESTAR_CONTROL_PLANE_ENDPOINT".to_owned(),
                    resolve_host_address(&control_plane_endpoint, platform),
                ));
                supervisor
                    .register(
                        Arc::new(ContainerComponent::new(ContainerSpec {
                            name: "lodestar-executor".to_owned(),
                            image: format!(
                                "lodestar/executor:{}",
                                lodestar_supervisor::EXECUTOR_VERSION
                            ),
                            env,
                            port: Some(EXECUTOR_PORT),
                            host_network: platform == HostPlatform::LinuxHostNetwork,
                            extra_args: vec![
                                "-v".to_owned(),
                                format!(
                                    "{}:/usr/local/bin/lodestar-executor:ro",
                                    executor_binary.display()
                                ),
                            ],
                            required: false,
                        })),
                        RestartPolicy::default(),
                    )
                    .await;
            }
            Err(e) => {
                warn!(error = %e, "executor binary unavailable; agent executions disabled");
            }
        }

        Ok(Self {
            home,
            store,
            supervisor,
            connection,
            api,
            registry: Arc::new(KindRegistry::new()),
            managed_engine,
            started_at: Instant::now(),
        })
    }

    /// The resource store (tests and tooling).
    #[must_use]
    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    /// Whether the engine binary is managed by this daemon.
    #[must_use]
    pub fn managed_engine(&self) -> bool {
        self.managed_engine
    }

    /// Start supervised components and the engine connection supervisor.
    ///
    /// # Errors
    ///
    /// Fails fast when a required component cannot start.
    pub async fn start_components(&self) -> Result<(), ServerError> {
        self.supervisor.start_all().await?;
        let _monitor = self.supervisor.spawn_monitor();
        let connection = Arc::clone(&self.connection);
        tokio::spawn(connection.run());
        Ok(())
    }

    /// Serve the gRPC API until the shutdown signal resolves, then stop
    /// components in reverse order and clean up PID files.
    ///
    /// # Errors
    ///
    /// Returns a transport error if the listener cannot bind.
    pub async fn serve(
        self,
        shutdown: impl std::future::Future<Output = ()> + Send,
    ) -> Result<(), ServerError> {
        let addr = format!("127.0.0.1:{CONTROL_PLANE_PORT}")
            .parse()
            .map_err(|e: std::net::AddrParseError| ServerError::Transport(e.to_string()))?;

        lodestar_supervisor::pidfile::write(
            &self.home.pid_file("daemon"),
            &lodestar_supervisor::PidRecord::new(std::process::id(), "lodestar"),
        )?;
        info!(addr = %addr, pid = std::process::id(), "control plane listening");

        let api = self.api.clone();
        let daemon = DaemonApi {
            supervisor: Arc::clone(&self.supervisor),
            connection: Arc::clone(&self.connection),
            started_at: self.started_at,
        };

        let result = Server::builder()
            .layer(KindLayer::new(Arc::clone(&self.registry)))
            .add_service(DaemonServiceServer::new(daemon))
            .add_service(AgentCommandServiceServer::new(api.clone()))
            .add_service(AgentQueryServiceServer::new(api.clone()))
            .add_service(AgentInstanceCommandServiceServer::new(api.clone()))
            .add_service(AgentInstanceQueryServiceServer::new(api.clone()))
            .add_service(SessionCommandServiceServer::new(api.clone()))
            .add_service(SessionQueryServiceServer::new(api.clone()))
            .add_service(WorkflowCommandServiceServer::new(api.clone()))
            .add_service(WorkflowQueryServiceServer::new(api.clone()))
            .add_service(WorkflowInstanceQueryServiceServer::new(api.clone()))
            .add_service(WorkflowExecutionCommandServiceServer::new(api.clone()))
            .add_service(WorkflowExecutionQueryServiceServer::new(api.clone()))
            .add_service(AgentExecutionCommandServiceServer::new(api.clone()))
            .add_service(AgentExecutionQueryServiceServer::new(api.clone()))
            .add_service(ExecutionContextCommandServiceServer::new(api.clone()))
            .add_service(ExecutionContextQueryServiceServer::new(api.clone()))
            .add_service(EnvironmentCommandServiceServer::new(api.clone()))
            .add_service(EnvironmentQueryServiceServer::new(api.clone()))
            .add_service(SkillCommandServiceServer::new(api.clone()))
            .add_service(SkillQueryServiceServer::new(api))
            .serve_with_shutdown(addr, shutdown)
            .await
            .map_err(|e| ServerError::Transport(e.to_string()));

        info!("control plane shutting down");
        self.connection.shutdown();
        self.supervisor.shutdown().await;
        lodestar_supervisor::pidfile::remove(&self.home.pid_file("daemon"));
        result
    }
}

/// Daemon status service backing `lodestar server status`.
struct DaemonApi {
    supervisor: Arc<Supervisor>,
    connection: Arc<ConnectionSupervisor>,
    started_at: Instant,
}

#[tonic::async_trait]
impl DaemonService for DaemonApi {
    async fn status(
        &self,
        _request: tonic::Request<DaemonStatusRequest>,
    ) -> Result<tonic::Response<DaemonStatusResponse>, tonic::Status> {
        let components = self
            .supervisor
            .status()
            .await
            .into_iter()
            .map(|c| ComponentStatusInfo {
                name: c.name,
                state: c.state.to_string(),
                recent_restarts: c.recent_restarts,
                required: c.required,
            })
            .collect();

        Ok(tonic::Response::new(DaemonStatusResponse {
            pid: std::process::id(),
            version: env!("CARGO_PKG_VERSION").to_owned(),
            engine_state: self.connection.state().await.to_string(),
            components,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }))
    }
}
