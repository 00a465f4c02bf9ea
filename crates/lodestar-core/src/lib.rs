//! Lodestar Core - Foundation types for the Lodestar local control plane.
//!
//! This crate provides:
//! - Prefixed, time-ordered resource identifiers
//! - Slug derivation and validation
//! - The request actor carried into audit records
//! - Directory scaffolding for the Lodestar data directory
//! - Retry/backoff configuration shared by the supervisors
//! - Logging setup for the daemon and CLI

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod actor;
pub mod dirs;
pub mod error;
pub mod id;
pub mod net;
pub mod retry;
pub mod slug;
pub mod telemetry;

pub use actor::Actor;
pub use dirs::LodestarHome;
pub use error::{CoreError, CoreResult};
pub use id::new_prefixed_id;
pub use net::{CONTROL_PLANE_PORT, ENGINE_PORT, EXECUTOR_PORT, HostPlatform, resolve_host_address};
pub use retry::BackoffSchedule;
pub use slug::{is_valid_slug, slugify};
pub use telemetry::{LogConfig, LogFormat, setup_logging};
