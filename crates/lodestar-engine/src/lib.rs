//! Lodestar Engine - durable workflow engine integration.
//!
//! Three pieces:
//!
//! - [`EngineClient`]: thin tonic client over the engine's gRPC surface.
//! - [`ConnectionSupervisor`]: keeps the client healthy across engine
//!   restarts. Exposes a [`WorkflowCreator`] only while the connection is
//!   believed good; execution creation fails fast otherwise.
//! - [`worker`]: the embedded task worker process. Long-polls the reserved
//!   task queues, runs the workflow validation activity and the
//!   agent/workflow execution activities, and republishes execution events
//!   to the control plane.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod client;
pub mod connection;
pub mod dsl;
pub mod error;
pub mod queues;
pub mod worker;

pub use client::EngineClient;
pub use connection::{ConnectionState, ConnectionSupervisor, WorkflowCreator};
pub use error::{EngineError, EngineResult};
