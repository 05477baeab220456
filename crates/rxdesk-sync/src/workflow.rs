//! Conversation workflow state machine.
//!
//! This module defines which status changes the dashboard may request and
//! the side effects that travel with them.
//!
//! # State Machine
//!
//! ```text
//!     ┌───────────┐  claim (assign actor)   ┌───────────┐
//!     │  Ongoing  │────────────────────────▶│  Waiting  │
//!     │           │◀────────────────────────│           │
//!     └─────┬─────┘        release          └─────┬─────┘
//!           │                                     │
//!           │ close                         close │
//!           ▼                                     ▼
//!     ┌───────────────────────────────────────────────────┐
//!     │                     Completed                     │
//!     └───────────────────────────────────────────────────┘
//!                      │ reopen (to either column)
//!                      ▼
//! ```
//!
//! Reopening a completed conversation is currently allowed; the backend
//! does not forbid it and nobody has asked for it to be locked.

use rxdesk_core::AgentId;
use rxdesk_store::{Conversation, ConversationPatch, ConversationStatus};

use crate::error::{Result, SyncError};

/// Check if a status change is allowed.
///
/// Staying in the same status is not a transition.
#[must_use]
pub const fn is_valid_transition(from: ConversationStatus, to: ConversationStatus) -> bool {
    use ConversationStatus::{Completed, Ongoing, Waiting};

    matches!(
        (from, to),
        (Ongoing, Waiting | Completed) | (Waiting, Ongoing | Completed) | (Completed, Ongoing | Waiting)
    )
}

/// Returns the statuses reachable from `status`.
#[must_use]
pub fn valid_transitions_from(status: ConversationStatus) -> Vec<ConversationStatus> {
    ConversationStatus::ALL
        .into_iter()
        .filter(|to| is_valid_transition(status, *to))
        .collect()
}

/// Returns true if moving `from` to `to` claims the conversation for the
/// acting agent.
#[must_use]
pub const fn is_claiming(from: ConversationStatus, to: ConversationStatus) -> bool {
    matches!(
        (from, to),
        (ConversationStatus::Ongoing, ConversationStatus::Waiting)
    )
}

/// Work out the single write that moves `record` to `to`.
///
/// Returns `Ok(None)` when the record already has that status. A claiming
/// transition carries the acting agent in the same patch as the status.
///
/// # Errors
///
/// Returns `SyncError::InvariantViolation` if the transition is not allowed
/// or a claiming transition has no acting agent.
pub fn plan_transition(
    record: &Conversation,
    to: ConversationStatus,
    actor: Option<&AgentId>,
) -> Result<Option<ConversationPatch>> {
    let from = record.status;
    if from == to {
        return Ok(None);
    }

    if !is_valid_transition(from, to) {
        return Err(SyncError::InvariantViolation(format!(
            "conversation {} cannot move from {from} to {to}",
            record.id
        )));
    }

    let patch = ConversationPatch::status(to);
    if !is_claiming(from, to) {
        return Ok(Some(patch));
    }

    let agent = actor.ok_or_else(|| {
        SyncError::InvariantViolation(format!(
            "conversation {} needs an acting agent to move to {to}",
            record.id
        ))
    })?;
    Ok(Some(patch.with_assigned_to(Some(agent.clone()))))
}
