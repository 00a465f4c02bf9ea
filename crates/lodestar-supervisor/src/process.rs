//! Process liveness probes.
//!
//! Four checks, all of which must pass for a subprocess to count as alive:
//!
//! 1. PID file exists and parses ([`crate::pidfile::read`]).
//! 2. `kill(pid, 0)` succeeds.
//! 3. The process is not a zombie. `kill(0)` returns success for zombies,
//!    so the state is read from the process table.
//! 4. If the component exposes a port, a TCP connect succeeds within 100 ms.

use std::time::Duration;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use sysinfo::{Pid as SysPid, ProcessStatus, ProcessesToUpdate, System};
use tracing::warn;

use crate::pidfile::PidRecord;

/// Timeout for the port probe.
pub const PORT_PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Whether a signal-0 probe reaches the process.
///
/// Note: this returns `true` for zombies; always pair with
/// [`process_state_alive`].
#[must_use]
pub fn signal_alive(pid: u32) -> bool {
    match i32::try_from(pid) {
        Ok(raw) => kill(Pid::from_raw(raw), None).is_ok(),
        Err(_) => false,
    }
}

/// Read the command name of a running process, if any.
#[must_use]
pub fn command_name(pid: u32) -> Option<String> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[SysPid::from_u32(pid)]), true);
    system
        .process(SysPid::from_u32(pid))
        .map(|p| p.name().to_string_lossy().into_owned())
}

/// Whether the process exists in a runnable state (not zombie/defunct).
///
/// Returns `false` both for missing processes and for zombies.
#[must_use]
pub fn process_state_alive(pid: u32) -> bool {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[SysPid::from_u32(pid)]), true);
    match system.process(SysPid::from_u32(pid)) {
        Some(process) => {
            if process.status() == ProcessStatus::Zombie {
                warn!(pid, "process is zombie/defunct — marking as dead");
                false
            } else {
                true
            }
        }
        None => false,
    }
}

/// Whether something is accepting TCP connections on the loopback port.
pub async fn port_listening(port: u16) -> bool {
    matches!(
        tokio::time::timeout(
            PORT_PROBE_TIMEOUT,
            tokio::net::TcpStream::connect(("127.0.0.1", port)),
        )
        .await,
        Ok(Ok(_))
    )
}

/// Full subprocess liveness verdict from a PID record.
///
/// Applies checks 2–4; the caller has already performed check 1 by holding
/// a parsed record. When the record carries a command name, PID reuse is
/// detected by comparing it to the running process's command.
pub async fn subprocess_alive(record: &PidRecord, port: Option<u16>) -> bool {
    if !signal_alive(record.pid) {
        return false;
    }
    if !process_state_alive(record.pid) {
        return false;
    }
    if let Some(expected) = &record.command
        && let Some(actual) = command_name(record.pid)
        && !actual.contains(expected.as_str())
    {
        warn!(
            pid = record.pid,
            expected, actual, "PID reused by a different command — treating as dead"
        );
        return false;
    }
    match port {
        Some(port) => port_listening(port).await,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_own_process_is_signal_alive() {
        assert!(signal_alive(std::process::id()));
    }

    #[test]
    fn test_own_process_state_is_alive() {
        assert!(process_state_alive(std::process::id()));
    }

    #[test]
    fn test_bogus_pid_is_dead() {
        // PID near the u32 ceiling cannot exist on any Unix we run on.
        assert!(!signal_alive(u32::MAX - 1));
        assert!(!process_state_alive(u32::MAX - 1));
    }

    #[test]
    fn test_own_command_name_readable() {
        let name = command_name(std::process::id()).unwrap();
        assert!(!name.is_empty());
    }

    #[tokio::test]
    async fn test_unbound_port_not_listening() {
        // Nothing should be listening on an arbitrary high port.
        assert!(!port_listening(59_987).await);
    }

    #[tokio::test]
    async fn test_bound_port_listening() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(port_listening(port).await);
    }

    #[tokio::test]
    async fn test_subprocess_alive_detects_command_mismatch() {
        let record = PidRecord {
            pid: std::process::id(),
            command: Some("definitely-not-this-binary".to_owned()),
            started_epoch: None,
        };
        assert!(!subprocess_alive(&record, None).await);
    }

    #[tokio::test]
    async fn test_subprocess_alive_for_self_without_port() {
        let actual = command_name(std::process::id()).unwrap();
        let record = PidRecord {
            pid: std::process::id(),
            command: Some(actual),
            started_epoch: None,
        };
        assert!(subprocess_alive(&record, None).await);
    }
}
