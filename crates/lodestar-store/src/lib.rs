//! Lodestar Store - embedded persistence for control-plane resources.
//!
//! Two layers:
//!
//! - [`KvStore`]: namespaced byte-level storage with atomic multi-key
//!   batches. Backed by **`SurrealKV`** (embedded, ACID LSM tree) in
//!   production and a `HashMap` in tests.
//! - [`ResourceStore`]: the typed layer the control plane uses. Resources
//!   are proto-encoded and keyed by `(kind, id)`; a secondary `(kind, org,
//!   slug)` index is written in the same transaction as the record, so the
//!   two can never disagree.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod error;
pub mod kv;
pub mod resource_store;

pub use error::{StoreError, StoreResult};
pub use kv::{KvStore, MemoryKvStore, WriteOp};
pub use resource_store::ResourceStore;

#[cfg(feature = "kv")]
pub use kv::SurrealKvStore;
