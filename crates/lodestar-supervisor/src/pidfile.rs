//! PID file reading and writing.
//!
//! Format, one field per line:
//!
//! ```text
//! <pid>
//! <expected-command-name>
//! <start-epoch-seconds>
//! ```
//!
//! Readers tolerate the legacy single-line format (bare PID). The command
//! name lets a later supervisor detect PID reuse: if the process now
//! running under that PID has a different command, the file is stale.

use std::path::Path;

use crate::error::SupervisorResult;

/// Parsed contents of a PID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidRecord {
    /// Recorded process id.
    pub pid: u32,
    /// Command name the process was started as. `None` for legacy files.
    pub command: Option<String>,
    /// Unix epoch seconds at start. `None` for legacy files.
    pub started_epoch: Option<i64>,
}

impl PidRecord {
    /// Record for a process started now under the given command name.
    #[must_use]
    pub fn new(pid: u32, command: impl Into<String>) -> Self {
        Self {
            pid,
            command: Some(command.into()),
            started_epoch: Some(chrono::Utc::now().timestamp()),
        }
    }
}

/// Write a PID record, creating parent directories as needed.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write(path: &Path, record: &PidRecord) -> SupervisorResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let command = record.command.as_deref().unwrap_or("");
    let epoch = record.started_epoch.unwrap_or(0);
    std::fs::write(path, format!("{}\n{command}\n{epoch}\n", record.pid))?;
    Ok(())
}

/// Read a PID record. Returns `None` for a missing or unparseable file.
#[must_use]
pub fn read(path: &Path) -> Option<PidRecord> {
    let contents = std::fs::read_to_string(path).ok()?;
    let mut lines = contents.lines();
    let pid: u32 = lines.next()?.trim().parse().ok()?;
    let command = lines
        .next()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned);
    let started_epoch = lines.next().and_then(|s| s.trim().parse().ok());
    Some(PidRecord {
        pid,
        command,
        started_epoch,
    })
}

/// Remove a PID file, ignoring a missing one.
pub fn remove(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.pid");
        let record = PidRecord::new(4242, "lodestar");
        write(&path, &record).unwrap();
        let read_back = read(&path).unwrap();
        assert_eq!(read_back.pid, 4242);
        assert_eq!(read_back.command.as_deref(), Some("lodestar"));
        assert!(read_back.started_epoch.is_some());
    }

    #[test]
    fn test_legacy_single_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.pid");
        std::fs::write(&path, "1234").unwrap();
        let record = read(&path).unwrap();
        assert_eq!(record.pid, 1234);
        assert!(record.command.is_none());
        assert!(record.started_epoch.is_none());
    }

    #[test]
    fn test_garbage_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.pid");
        std::fs::write(&path, "not-a-pid\n").unwrap();
        assert!(read(&path).is_none());
        assert!(read(&dir.path().join("absent.pid")).is_none());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.pid");
        remove(&path);
        write(&path, &PidRecord::new(1, "x")).unwrap();
        remove(&path);
        assert!(!path.exists());
        remove(&path);
    }
}
