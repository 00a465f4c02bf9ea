//! Error types for core operations.

use thiserror::Error;

/// Errors produced by the core utilities.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A slug could not be derived because no usable name was given.
    #[error("cannot derive slug: name is empty")]
    EmptySlugSource,

    /// A slug failed validation.
    #[error("invalid slug '{slug}': {reason}")]
    InvalidSlug {
        /// The offending slug.
        slug: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The home directory could not be resolved or created.
    #[error("home directory unavailable: {0}")]
    HomeUnavailable(String),

    /// Filesystem operation on the data directory failed.
    #[error("data directory I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Logging could not be initialized.
    #[error("telemetry setup failed: {0}")]
    Telemetry(String),
}

/// Result alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;
