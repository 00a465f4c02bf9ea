//! Logging setup for the daemon, worker, and CLI.

use tracing_subscriber::EnvFilter;

use crate::error::{CoreError, CoreResult};

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable, for foreground runs.
    #[default]
    Pretty,
    /// Compact single-line, for daemon log files.
    Compact,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter directive (e.g. `info` or `lodestar_server=debug`).
    pub filter: String,
    /// Output format.
    pub format: LogFormat,
}

impl LogConfig {
    /// Create a config with the given default filter.
    #[must_use]
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            format: LogFormat::default(),
        }
    }

    /// Set the output format.
    #[must_use]
    pub fn with_format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured filter when set.
///
/// # Errors
///
/// Returns [`CoreError::Telemetry`] if a subscriber is already installed
/// or the filter directive cannot be parsed.
pub fn setup_logging(config: &LogConfig) -> CoreResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .map_err(|e| CoreError::Telemetry(e.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match config.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Compact => builder.compact().with_ansi(false).try_init(),
    };
    result.map_err(|e| CoreError::Telemetry(e.to_string()))
}
