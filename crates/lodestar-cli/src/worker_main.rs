//! Entry point for the internal `__worker` mode.

use anyhow::Result;

use lodestar_core::{CONTROL_PLANE_PORT, ENGINE_PORT, EXECUTOR_PORT};
use lodestar_engine::worker::{self, WorkerConfig};

fn endpoint_from_env(var: &str, default_port: u16) -> String {
    std::env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| format!("http://127.0.0.1:{default_port}"))
}

/// Run the embedded task worker until terminated.
pub(crate) fn run() -> Result<()> {
    let _ = lodestar_core::setup_logging(
        &lodestar_core::LogConfig::new("info")
            .with_format(lodestar_core::LogFormat::Compact),
    );

    let config = WorkerConfig {
        engine_endpoint: endpoint_from_env("LODESTAR_ENGINE_ENDPOINT", ENGINE_PORT),
        control_plane_endpoint: endpoint_from_env(
            "LODESTAR_CONTROL_PLANE_ENDPOINT",
            CONTROL_PLANE_PORT,
        ),
        executor_endpoint: endpoint_from_env("LODESTAR_EXECUTOR_ENDPOINT", EXECUTOR_PORT),
        identity: format!("lodestar-worker-{}", std::process::id()),
    };

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(worker::run(config))?;
    Ok(())
}
