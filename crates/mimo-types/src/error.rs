//! Shared error types for the Mimo semantic store.

use thiserror::Error;

/// Top-level error type for the semantic store.
#[derive(Error, Debug)]
pub enum MimoError {
    /// Input failed validation (confidence range, TTL, required fields, predicate shape).
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A triple with the same natural key already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The addressed record does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Entity resolution could not pick a single canonical id.
    #[error("Ambiguous resolution: {} candidates", candidates.len())]
    AmbiguousResolution {
        /// Candidate canonical ids, highest score first.
        candidates: Vec<String>,
    },

    /// The backing store is temporarily unreachable (busy, locked, cannot open).
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A structural storage failure (bad SQL, corrupt row).
    #[error("Storage error: {0}")]
    Storage(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl MimoError {
    /// Whether retrying the same operation later might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, MimoError::StorageUnavailable(_))
    }
}

/// Alias for Result with MimoError.
pub type MimoResult<T> = Result<T, MimoError>;
