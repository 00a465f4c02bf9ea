//! Supervision error types.

use thiserror::Error;

/// Errors from component supervision and binary provisioning.
#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A child process could not be spawned.
    #[error("failed to spawn '{name}': {reason}")]
    Spawn {
        /// Component name.
        name: String,
        /// Underlying failure.
        reason: String,
    },

    /// A required component failed to start or exhausted its restarts.
    #[error("component '{name}' failed: {reason}")]
    ComponentFailed {
        /// Component name.
        name: String,
        /// Underlying failure.
        reason: String,
    },

    /// A binary download failed.
    #[error("download of {url} failed: {reason}")]
    Download {
        /// Source URL.
        url: String,
        /// Underlying failure.
        reason: String,
    },

    /// An archive could not be unpacked.
    #[error("archive extraction failed: {0}")]
    Extract(String),

    /// The host OS/arch combination has no published binary.
    #[error("unsupported platform: {os}/{arch}")]
    UnsupportedPlatform {
        /// Host operating system.
        os: &'static str,
        /// Host architecture.
        arch: &'static str,
    },

    /// A docker CLI invocation failed.
    #[error("docker {operation} failed: {stderr}")]
    Docker {
        /// The docker subcommand that failed.
        operation: String,
        /// Captured stderr.
        stderr: String,
    },

    /// The executor binary is neither embedded nor overridable.
    #[error("executor binary unavailable: {0}")]
    ExecutorUnavailable(String),
}

/// Result alias for supervision operations.
pub type SupervisorResult<T> = Result<T, SupervisorError>;
