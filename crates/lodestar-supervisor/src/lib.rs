//! Lodestar Supervisor - lifecycle, health, and crash recovery for the
//! processes the control plane manages.
//!
//! The [`Supervisor`] owns a small set of [`Component`]s declared at
//! startup: the embedded task worker subprocess, the managed workflow
//! engine binary, and the containerized agent executor. It starts them in
//! dependency order, probes health on a fixed interval, and restarts
//! unhealthy components under a backoff-bounded budget.
//!
//! Liveness for subprocesses is deliberately paranoid: a PID file alone is
//! not proof of life, `kill(pid, 0)` succeeds on zombies, and a live
//! process may still have failed to bind its port. All checks must pass.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod component;
pub mod container;
pub mod engine_binary;
pub mod error;
pub mod executor_binary;
pub mod pidfile;
pub mod process;
pub mod subprocess;
pub mod supervisor;

pub use component::{Component, ComponentState, ComponentStatus, RestartPolicy};
pub use container::{ContainerComponent, ContainerSpec};
pub use engine_binary::{ENGINE_BINARY_NAME, ENGINE_VERSION, EngineBinaryManager};
pub use error::{SupervisorError, SupervisorResult};
pub use executor_binary::{EXECUTOR_BINARY_NAME, EXECUTOR_VERSION, ExecutorBinaryManager};
pub use pidfile::PidRecord;
pub use subprocess::{SubprocessComponent, SubprocessSpec};
pub use supervisor::Supervisor;
