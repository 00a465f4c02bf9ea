//! The component contract and restart policy.

use std::time::Duration;

use async_trait::async_trait;

use lodestar_core::BackoffSchedule;

use crate::error::SupervisorResult;

/// A process or container the supervisor owns.
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable component name; also names the PID and log files.
    fn name(&self) -> &str;

    /// Required components fail startup; optional ones only warn.
    fn required(&self) -> bool {
        true
    }

    /// Start the component. Must be safe to call after `stop`.
    async fn start(&self) -> SupervisorResult<()>;

    /// Stop the component and release its resources.
    async fn stop(&self) -> SupervisorResult<()>;

    /// Whether the component currently counts as healthy.
    async fn healthy(&self) -> bool;
}

/// Restart budget and pacing for one component.
#[derive(Debug, Clone, Copy)]
pub struct RestartPolicy {
    /// Delay schedule between restart attempts.
    pub backoff: BackoffSchedule,
    /// Restarts allowed inside the sliding window before the component is
    /// marked permanently failed.
    pub max_restarts: u32,
    /// Sliding window the budget applies to.
    pub window: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            backoff: BackoffSchedule::restart(),
            max_restarts: 5,
            window: Duration::from_secs(60),
        }
    }
}

/// Lifecycle state of a supervised component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    /// Registered but not yet started.
    Stopped,
    /// Started and last seen healthy.
    Running,
    /// Unhealthy; restart in progress or scheduled.
    Restarting,
    /// Restart budget exhausted; requires operator intervention.
    Failed,
}

impl std::fmt::Display for ComponentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running => write!(f, "running"),
            Self::Restarting => write!(f, "restarting"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Point-in-time status of one component, surfaced by `server status`.
#[derive(Debug, Clone)]
pub struct ComponentStatus {
    /// Component name.
    pub name: String,
    /// Current lifecycle state.
    pub state: ComponentState,
    /// Restarts recorded inside the current window.
    pub recent_restarts: u32,
    /// Whether the component is required.
    pub required: bool,
}
