//! Change event normalization.
//!
//! Backends deliver row changes as loosely shaped [`RawChange`] payloads.
//! The [`ChangeAdapter`] turns them into [`CanonicalEvent`]s, the only event
//! shape the rest of the synchronizer understands. Payloads that cannot be
//! normalized are dropped and counted, never propagated.

use rxdesk_core::ConversationId;
use rxdesk_store::{Conversation, ConversationPatch, RawChange};
use serde_json::Value;

use crate::error::{Result, SyncError};

/// A normalized change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CanonicalEvent {
    /// A new row, complete.
    Inserted(Conversation),
    /// Some fields of an existing row changed.
    Updated(ConversationId, ConversationPatch),
    /// A row was removed.
    Deleted(ConversationId),
}

impl CanonicalEvent {
    /// The id of the row the event refers to.
    #[must_use]
    pub fn id(&self) -> &ConversationId {
        match self {
            Self::Inserted(record) => &record.id,
            Self::Updated(id, _) | Self::Deleted(id) => id,
        }
    }

    /// Decode a raw notification.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::MalformedEvent` if the event type is unknown, the
    /// id is missing, an insert does not carry a full record, or an update
    /// carries a field of the wrong shape.
    pub fn decode(raw: &RawChange) -> Result<Self> {
        match raw.event_type.as_str() {
            "INSERT" => serde_json::from_value::<Conversation>(raw.new.clone())
                .map(Self::Inserted)
                .map_err(|e| SyncError::MalformedEvent(format!("insert without full record: {e}"))),
            "UPDATE" => {
                let id = row_id(&raw.new)
                    .or_else(|| row_id(&raw.old))
                    .ok_or_else(|| SyncError::MalformedEvent("update without id".to_string()))?;
                // Unrecognised columns (including `type`) are ignored by the
                // patch decoder; recognised ones must be well typed.
                let patch = serde_json::from_value::<ConversationPatch>(raw.new.clone())
                    .map_err(|e| SyncError::MalformedEvent(format!("update of {id}: {e}")))?;
                Ok(Self::Updated(id, patch))
            }
            "DELETE" => row_id(&raw.old)
                .or_else(|| row_id(&raw.new))
                .map(Self::Deleted)
                .ok_or_else(|| SyncError::MalformedEvent("delete without id".to_string())),
            other => Err(SyncError::MalformedEvent(format!(
                "unknown event type {other:?}"
            ))),
        }
    }
}

fn row_id(row: &Value) -> Option<ConversationId> {
    row.get("id")
        .and_then(Value::as_str)
        .and_then(|id| ConversationId::new(id).ok())
}

/// Normalizes raw notifications and keeps count of the ones it drops.
#[derive(Debug, Default)]
pub struct ChangeAdapter {
    dropped: u64,
}

impl ChangeAdapter {
    /// Create an adapter with a zero drop count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalize `raw`, or drop it with a warning if it is malformed.
    pub fn normalize(&mut self, raw: &RawChange) -> Option<CanonicalEvent> {
        match CanonicalEvent::decode(raw) {
            Ok(event) => Some(event),
            Err(e) => {
                self.dropped += 1;
                tracing::warn!(
                    event_type = %raw.event_type,
                    error = %e,
                    dropped = self.dropped,
                    "Dropping change event"
                );
                None
            }
        }
    }

    /// Number of events dropped so far.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}
