//! Error types for the storage layer.

use thiserror::Error;

/// A result type using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during storage operations.
///
/// The `Display` form doubles as the human-readable failure reason surfaced
/// to the desk when a write is rejected.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested record was not found.
    #[error("record not found")]
    NotFound,

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The remote backend could not be reached.
    #[error("backend unreachable: {0}")]
    Http(String),

    /// The remote backend refused the request.
    #[error("backend rejected request: {0}")]
    Rejected(String),

    /// The mutation would break a data invariant (e.g. negative stock).
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl StoreError {
    /// Returns true if the same request might succeed when the user retries it.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Database(_) | Self::Http(_))
    }
}
