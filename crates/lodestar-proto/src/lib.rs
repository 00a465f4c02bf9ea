//! Lodestar Proto - protobuf schemas and generated gRPC bindings.
//!
//! Resource messages live in [`v1`], the workflow-engine integration
//! contract in [`engine::v1`]. The [`ApiResource`] trait gives the request
//! pipeline typed access to the handful of operations the Go-style
//! implementation would do through proto reflection: metadata access,
//! status clearing and wholesale copy, audit rewriting, and validation.

#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Resource and service messages (`lodestar.v1`).
#[allow(
    missing_docs,
    clippy::pedantic,
    clippy::arithmetic_side_effects,
    clippy::default_trait_access
)]
pub mod v1 {
    include!(concat!(env!("OUT_DIR"), "/lodestar.v1.rs"));
}

/// Workflow engine integration contract.
pub mod engine {
    /// Engine messages and client/server stubs (`lodestar.engine.v1`).
    #[allow(
        missing_docs,
        clippy::pedantic,
        clippy::arithmetic_side_effects,
        clippy::default_trait_access
    )]
    pub mod v1 {
        include!(concat!(env!("OUT_DIR"), "/lodestar.engine.v1.rs"));
    }
}

/// Encoded file descriptor set for every compiled proto file. The kind
/// registry reads service options out of this at runtime.
pub const FILE_DESCRIPTOR_SET: &[u8] =
    include_bytes!(concat!(env!("OUT_DIR"), "/lodestar_descriptor.bin"));

/// Fully qualified name of the service-option extension declaring a
/// service's resource kind.
pub const API_RESOURCE_KIND_EXTENSION: &str = "lodestar.v1.api_resource_kind";

pub mod kind;
pub mod resource;
pub mod validate;

pub use resource::{ApiResource, ValidationError};
