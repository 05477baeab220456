//! In-memory mirror of the conversation table.
//!
//! The mirror keeps one record per id and an ordering index so that
//! [`MirrorStore::read`] always yields the most recently active conversation
//! first. It never errors: events that do not apply are no-ops.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use rxdesk_core::ConversationId;
use rxdesk_store::{Conversation, ConversationPatch};

use crate::adapter::CanonicalEvent;

type OrderKey = (Reverse<DateTime<Utc>>, ConversationId);

fn order_key(record: &Conversation) -> OrderKey {
    (Reverse(record.last_message_time), record.id.clone())
}

/// De-duplicated, ordered set of conversation records.
#[derive(Debug, Default, Clone)]
pub struct MirrorStore {
    records: HashMap<ConversationId, Conversation>,
    order: BTreeSet<OrderKey>,
}

impl MirrorStore {
    /// Create an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the contents with `records`.
    ///
    /// When the input repeats an id, the first occurrence wins.
    pub fn seed(&mut self, records: impl IntoIterator<Item = Conversation>) {
        self.records.clear();
        self.order.clear();

        let mut seen = HashSet::new();
        for record in records {
            if !seen.insert(record.id.clone()) {
                tracing::debug!(conversation_id = %record.id, "Ignoring duplicate seed record");
                continue;
            }
            self.order.insert(order_key(&record));
            self.records.insert(record.id.clone(), record);
        }
    }

    /// Apply a canonical event. Returns true if the mirror changed.
    ///
    /// Inserting a present id updates it in place and keeps its `is_new`
    /// flag. Updating or deleting an absent id does nothing.
    pub fn apply(&mut self, event: &CanonicalEvent) -> bool {
        match event {
            CanonicalEvent::Inserted(record) => {
                if self.records.contains_key(&record.id) {
                    self.patch(&record.id, &ConversationPatch::from_record(record))
                } else {
                    let mut record = record.clone();
                    record.is_new = true;
                    self.order.insert(order_key(&record));
                    self.records.insert(record.id.clone(), record);
                    true
                }
            }
            CanonicalEvent::Updated(id, patch) => self.patch(id, patch),
            CanonicalEvent::Deleted(id) => self.remove(id).is_some(),
        }
    }

    /// Write the fields of `patch` into the record `id`.
    ///
    /// Returns true if the record exists and anything changed.
    pub fn patch(&mut self, id: &ConversationId, patch: &ConversationPatch) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };

        let before = order_key(record);
        if !patch.apply_to(record) {
            return false;
        }

        let after = order_key(record);
        if before != after {
            self.order.remove(&before);
            self.order.insert(after);
        }
        true
    }

    /// Remove the record `id`.
    pub fn remove(&mut self, id: &ConversationId) -> Option<Conversation> {
        let record = self.records.remove(id)?;
        self.order.remove(&order_key(&record));
        Some(record)
    }

    /// Clear the `is_new` flag. Returns true if it was set.
    pub fn acknowledge(&mut self, id: &ConversationId) -> bool {
        match self.records.get_mut(id) {
            Some(record) if record.is_new => {
                record.is_new = false;
                true
            }
            _ => false,
        }
    }

    /// The records, most recent `last_message_time` first, ties by id.
    #[must_use]
    pub fn read(&self) -> Vec<Conversation> {
        self.order
            .iter()
            .filter_map(|(_, id)| self.records.get(id))
            .cloned()
            .collect()
    }

    /// Get a record by id.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.records.get(id)
    }

    /// Check if a record is present.
    #[must_use]
    pub fn contains(&self, id: &ConversationId) -> bool {
        self.records.contains_key(id)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the mirror is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
