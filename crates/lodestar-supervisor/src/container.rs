//! Container component driven through the `docker` CLI.
//!
//! Containers replace the PID/zombie/port probes with the container
//! runtime's own health reporting: `docker inspect` yields either the
//! healthcheck status (`healthy`) or, for images without a healthcheck,
//! the container state (`running`).

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::component::Component;
use crate::error::{SupervisorError, SupervisorResult};

/// Description of a managed container.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    /// Component name; also the container name.
    pub name: String,
    /// Image reference, e.g. `lodestar/executor:0.1.0`.
    pub image: String,
    /// Environment passed with `-e`.
    pub env: Vec<(String, String)>,
    /// Host port published 1:1, when not on host networking.
    pub port: Option<u16>,
    /// Use `--network host` (Linux).
    pub host_network: bool,
    /// Extra arguments appended to `docker run`.
    pub extra_args: Vec<String>,
    /// Whether the control plane cannot run without this container.
    pub required: bool,
}

/// A supervised container.
pub struct ContainerComponent {
    spec: ContainerSpec,
}

impl ContainerComponent {
    /// Wrap a spec.
    #[must_use]
    pub fn new(spec: ContainerSpec) -> Self {
        Self { spec }
    }

    async fn docker(&self, operation: &str, args: &[String]) -> SupervisorResult<String> {
        debug!(component = %self.spec.name, operation, "docker invocation");
        let output = tokio::process::Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| SupervisorError::Docker {
                operation: operation.to_owned(),
                stderr: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(SupervisorError::Docker {
                operation: operation.to_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_owned())
    }

    fn run_args(&self) -> Vec<String> {
        let mut args = vec![
            "run".to_owned(),
            "-d".to_owned(),
            "--name".to_owned(),
            self.spec.name.clone(),
        ];
        if self.spec.host_network {
            args.push("--network".to_owned());
            args.push("host".to_owned());
        } else if let Some(port) = self.spec.port {
            args.push("-p".to_owned());
            args.push(format!("127.0.0.1:{port}:{port}"));
        }
        for (key, value) in &self.spec.env {
            args.push("-e".to_owned());
            args.push(format!("{key}={value}"));
        }
        args.extend(self.spec.extra_args.iter().cloned());
        args.push(self.spec.image.clone());
        args
    }
}

#[async_trait]
impl Component for ContainerComponent {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn required(&self) -> bool {
        self.spec.required
    }

    async fn start(&self) -> SupervisorResult<()> {
        // A leftover container with the same name blocks `docker run`.
        if let Err(e) = self
            .docker("rm", &["rm".to_owned(), "-f".to_owned(), self.spec.name.clone()])
            .await
        {
            debug!(component = %self.spec.name, error = %e, "no leftover container to remove");
        }
        self.docker("run", &self.run_args()).await?;
        info!(component = %self.spec.name, image = %self.spec.image, "container started");
        Ok(())
    }

    async fn stop(&self) -> SupervisorResult<()> {
        if let Err(e) = self
            .docker(
                "stop",
                &[
                    "stop".to_owned(),
                    "-t".to_owned(),
                    "5".to_owned(),
                    self.spec.name.clone(),
                ],
            )
            .await
        {
            warn!(component = %self.spec.name, error = %e, "container stop failed");
        }
        let _ = self
            .docker("rm", &["rm".to_owned(), "-f".to_owned(), self.spec.name.clone()])
            .await;
        Ok(())
    }

    async fn healthy(&self) -> bool {
        let format = "{{if .State.Health}}{{.State.Health.Status}}{{else}}{{.State.Status}}{{end}}";
        match self
            .docker(
                "inspect",
                &[
                    "inspect".to_owned(),
                    "-f".to_owned(),
                    format.to_owned(),
                    self.spec.name.clone(),
                ],
            )
            .await
        {
            Ok(status) => status == "healthy" || status == "running",
            Err(_) => false,
        }
    }
}
