//! Error types for the synchronizer.
//!
//! None of these errors is fatal: each one maps to a recoverable state of
//! the dashboard (retry affordance, transient notice, or a dropped event).

use rxdesk_core::ConversationId;
use thiserror::Error;

/// A result type using `SyncError`.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Errors that can occur while synchronizing conversations.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    /// The initial load could not complete. The mirror stays empty until the
    /// user reloads.
    #[error("could not load conversations: {0}")]
    FetchFailure(String),

    /// The write confirming an optimistic mutation failed; the mutated fields
    /// were reverted.
    #[error("could not update conversation {id}: {reason}")]
    WriteFailure {
        /// The conversation the write targeted.
        id: ConversationId,
        /// Human-readable reason from the backend.
        reason: String,
    },

    /// A change notification could not be normalized and was dropped.
    #[error("malformed change event: {0}")]
    MalformedEvent(String),

    /// The request would break an invariant and was rejected before any
    /// write was issued.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// The conversation is not in the mirror.
    #[error("conversation not found: {0}")]
    NotFound(ConversationId),

    /// The dashboard view has been unmounted.
    #[error("synchronizer is no longer running")]
    EngineClosed,
}

impl SyncError {
    /// Returns true if the user can retry the action that produced this
    /// error (reload, re-drag, re-submit). Nothing is retried automatically.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::FetchFailure(_) | Self::WriteFailure { .. })
    }
}
