//! Storage error types.

use thiserror::Error;

/// Errors from the storage layers.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be opened.
    #[error("store connection failed: {0}")]
    Connection(String),

    /// A namespace or key failed validation.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// The requested resource does not exist.
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Kind display name.
        kind: &'static str,
        /// The id or slug that was looked up.
        id: String,
    },

    /// Stored bytes could not be decoded as the expected message.
    #[error("stored resource is corrupt: {0}")]
    Decode(String),

    /// Backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Result alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;
