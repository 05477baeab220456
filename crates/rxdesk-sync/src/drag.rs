//! Drag-and-drop to transition requests.
//!
//! The board lets an agent drop a card on any column. The controller only
//! filters out gestures that mean nothing (dropped outside the board, or
//! back onto the column it came from); whether the move is allowed is for
//! the workflow to decide.

use rxdesk_core::{AgentId, ConversationId};
use rxdesk_store::{ConversationStatus, UnknownVariant};

use crate::engine::{EngineHandle, TransitionOutcome};
use crate::error::Result;

/// A completed drag gesture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropAction {
    /// The dragged conversation.
    pub conversation_id: ConversationId,
    /// Column the card was picked up from.
    pub source: ConversationStatus,
    /// Column it was dropped on, if any.
    pub destination: Option<ConversationStatus>,
}

impl DropAction {
    /// Build a drop from board column ids (the status names).
    ///
    /// # Errors
    ///
    /// Returns `UnknownVariant` if a column id does not name a status.
    pub fn from_columns(
        conversation_id: ConversationId,
        source: &str,
        destination: Option<&str>,
    ) -> std::result::Result<Self, UnknownVariant> {
        Ok(Self {
            conversation_id,
            source: source.parse()?,
            destination: destination.map(str::parse).transpose()?,
        })
    }
}

/// A request to move a conversation, on behalf of an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRequest {
    /// The conversation to move.
    pub conversation_id: ConversationId,
    /// The target status.
    pub target: ConversationStatus,
    /// The acting agent.
    pub actor: Option<AgentId>,
}

/// Turns drops into transition requests for one agent.
#[derive(Debug, Clone, Default)]
pub struct DragController {
    actor: Option<AgentId>,
}

impl DragController {
    /// Create a controller acting as `actor`.
    #[must_use]
    pub const fn new(actor: Option<AgentId>) -> Self {
        Self { actor }
    }

    /// The agent requests are issued for.
    #[must_use]
    pub const fn actor(&self) -> Option<&AgentId> {
        self.actor.as_ref()
    }

    /// Translate a drop. Returns `None` for drops that request nothing.
    #[must_use]
    pub fn translate(&self, drop: &DropAction) -> Option<TransitionRequest> {
        let target = drop.destination?;
        if target == drop.source {
            return None;
        }
        Some(TransitionRequest {
            conversation_id: drop.conversation_id.clone(),
            target,
            actor: self.actor.clone(),
        })
    }

    /// Translate a drop and submit it to the engine.
    ///
    /// Ignored drops resolve to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns the error of the transition (see [`EngineHandle::transition`]).
    pub async fn handle_drop(
        &self,
        engine: &EngineHandle,
        drop: &DropAction,
    ) -> Result<Option<TransitionOutcome>> {
        let Some(request) = self.translate(drop) else {
            tracing::trace!(conversation_id = %drop.conversation_id, "Ignoring drop");
            return Ok(None);
        };
        engine
            .transition(&request.conversation_id, request.target, request.actor)
            .await
            .map(Some)
    }
}
