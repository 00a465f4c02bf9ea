//! Lodestar Server - the resource control plane.
//!
//! Every CRUD handler is a composition of pipeline steps over a typed
//! request context; the pipeline is the only place invariants like status
//! preservation are enforced. Controllers translate step errors to gRPC
//! status codes exactly once, at the RPC boundary.
//!
//! # Locking design
//!
//! The store is internally concurrent and shared by value. The kind
//! registry cache takes its write lock only on a cache miss. The execution
//! event hub's channel map uses a read-write lock held only for map
//! lookups, never across sends.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod controllers;
pub mod events;
pub mod kind_layer;
pub mod llm_env;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod server;

pub use config::DaemonConfig;
pub use events::ExecutionEventHub;
pub use kind_layer::KindLayer;
pub use orchestrator::ExecutionOrchestrator;
pub use registry::KindRegistry;
pub use server::ControlPlane;
