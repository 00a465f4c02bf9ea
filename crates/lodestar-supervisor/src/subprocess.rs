//! Subprocess component: spawn with log capture, PID file tracking, and
//! the four-step liveness probe.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::component::Component;
use crate::error::{SupervisorError, SupervisorResult};
use crate::pidfile::{self, PidRecord};
use crate::process;

/// How long a stopped process gets to exit after SIGTERM before SIGKILL.
const STOP_GRACE: Duration = Duration::from_secs(5);

/// Description of a subprocess the supervisor manages.
#[derive(Debug, Clone)]
pub struct SubprocessSpec {
    /// Component name; also names PID and log files.
    pub name: String,
    /// Executable to run.
    pub command: PathBuf,
    /// Arguments.
    pub args: Vec<String>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
    /// Port the process must be listening on to count as healthy.
    pub port: Option<u16>,
    /// PID file location.
    pub pid_file: PathBuf,
    /// Log file location (stdout and stderr, truncated per start).
    pub log_file: PathBuf,
    /// Whether the control plane cannot run without this process.
    pub required: bool,
}

/// A supervised subprocess.
pub struct SubprocessComponent {
    spec: SubprocessSpec,
    child: Mutex<Option<tokio::process::Child>>,
}

impl SubprocessComponent {
    /// Wrap a spec.
    #[must_use]
    pub fn new(spec: SubprocessSpec) -> Self {
        Self {
            spec,
            child: Mutex::new(None),
        }
    }

    fn expected_command(&self) -> String {
        self.spec
            .command
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.spec.name.clone())
    }

    async fn spawn(&self) -> SupervisorResult<()> {
        if let Some(parent) = self.spec.log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = std::fs::File::create(&self.spec.log_file)?;
        let log_err = log.try_clone()?;

        let mut command = tokio::process::Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .envs(self.spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));

        let child = command.spawn().map_err(|e| SupervisorError::Spawn {
            name: self.spec.name.clone(),
            reason: e.to_string(),
        })?;

        let pid = child.id().ok_or_else(|| SupervisorError::Spawn {
            name: self.spec.name.clone(),
            reason: "child exited before a PID was assigned".to_owned(),
        })?;

        pidfile::write(
            &self.spec.pid_file,
            &PidRecord::new(pid, self.expected_command()),
        )?;
        *self.child.lock().await = Some(child);
        info!(component = %self.spec.name, pid, "subprocess started");
        Ok(())
    }

    async fn terminate(&self, pid: u32) {
        let Ok(raw) = i32::try_from(pid) else {
            return;
        };
        let nix_pid = Pid::from_raw(raw);
        if kill(nix_pid, Signal::SIGTERM).is_err() {
            return;
        }
        let deadline = tokio::time::Instant::now() + STOP_GRACE;
        while tokio::time::Instant::now() < deadline {
            if !process::signal_alive(pid) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        warn!(component = %self.spec.name, pid, "grace window elapsed — sending SIGKILL");
        let _ = kill(nix_pid, Signal::SIGKILL);
    }
}

#[async_trait]
impl Component for SubprocessComponent {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn required(&self) -> bool {
        self.spec.required
    }

    async fn start(&self) -> SupervisorResult<()> {
        // A previous control-plane run may have left the process behind.
        if let Some(record) = pidfile::read(&self.spec.pid_file) {
            if process::subprocess_alive(&record, self.spec.port).await {
                info!(
                    component = %self.spec.name,
                    pid = record.pid,
                    "adopting already-running subprocess"
                );
                return Ok(());
            }
            debug!(component = %self.spec.name, pid = record.pid, "removing stale PID file");
            pidfile::remove(&self.spec.pid_file);
        }
        self.spawn().await
    }

    async fn stop(&self) -> SupervisorResult<()> {
        if let Some(record) = pidfile::read(&self.spec.pid_file) {
            self.terminate(record.pid).await;
        }
        // Reap our own child if we spawned it this run.
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.start_kill();
            let _ = child.wait().await;
        }
        pidfile::remove(&self.spec.pid_file);
        Ok(())
    }

    async fn healthy(&self) -> bool {
        match pidfile::read(&self.spec.pid_file) {
            Some(record) => process::subprocess_alive(&record, self.spec.port).await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(dir: &std::path::Path, name: &str, command: &str, args: &[&str]) -> SubprocessSpec {
        SubprocessSpec {
            name: name.to_owned(),
            command: PathBuf::from(command),
            args: args.iter().map(|s| (*s).to_owned()).collect(),
            env: Vec::new(),
            port: None,
            pid_file: dir.join(format!("{name}.pid")),
            log_file: dir.join(format!("{name}.log")),
            required: true,
        }
    }

    #[tokio::test]
    async fn test_start_healthy_stop_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let component = SubprocessComponent::new(spec(dir.path(), "sleeper", "sleep", &["30"]));

        component.start().await.unwrap();
        assert!(component.healthy().await);

        component.stop().await.unwrap();
        assert!(!component.healthy().await);
        assert!(!component.spec.pid_file.exists());
    }

    #[tokio::test]
    async fn test_missing_pid_file_is_unhealthy() {
        let dir = tempfile::tempdir().unwrap();
        let component = SubprocessComponent::new(spec(dir.path(), "ghost", "sleep", &["30"]));
        assert!(!component.healthy().await);
    }

    #[tokio::test]
    async fn test_stale_pid_file_replaced_on_start() {
        let dir = tempfile::tempdir().unwrap();
        let component = SubprocessComponent::new(spec(dir.path(), "worker", "sleep", &["30"]));

        // Stale record: our own PID but a different command name.
        pidfile::write(
            &component.spec.pid_file,
            &PidRecord {
                pid: std::process::id(),
                command: Some("some-other-binary".to_owned()),
                started_epoch: Some(0),
            },
        )
        .unwrap();

        component.start().await.unwrap();
        let record = pidfile::read(&component.spec.pid_file).unwrap();
        assert_ne!(record.pid, std::process::id());
        assert_eq!(record.command.as_deref(), Some("sleep"));

        component.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let component = SubprocessComponent::new(spec(
            dir.path(),
            "broken",
            "/nonexistent/binary/path",
            &[],
        ));
        assert!(matches!(
            component.start().await,
            Err(SupervisorError::Spawn { .. })
        ));
    }
}
