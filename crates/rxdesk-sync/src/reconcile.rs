//! Deterministic reconciliation of remote events and optimistic writes.
//!
//! [`Reconciler`] is the only code that mutates the [`MirrorStore`]. It keeps
//! an in-flight record per optimistic mutation holding the mutation's patch
//! and a baseline: the last known-good values of exactly the fields the
//! patch touches.
//!
//! Remote state is authoritative. A remote update that overlaps an in-flight
//! mutation is shown at once and becomes that mutation's baseline, so a
//! failed write reverts to what the backend last confirmed rather than to a
//! stale local guess.

use std::collections::HashMap;

use rxdesk_core::{ConversationId, MutationId};
use rxdesk_store::{Conversation, ConversationPatch};

use crate::adapter::CanonicalEvent;
use crate::error::{Result, SyncError};
use crate::mirror::MirrorStore;

/// An optimistic mutation that has been applied locally and must now be
/// written to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    /// Identifies this mutation when its outcome comes back.
    pub mutation_id: MutationId,
    /// The conversation being written.
    pub id: ConversationId,
    /// Exactly the fields to write.
    pub patch: ConversationPatch,
}

/// What settling a mutation did to the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The write succeeded; the mirror is left as is.
    Confirmed,
    /// The write failed; `restored` holds the field values written back.
    Reverted {
        /// The conversation that was reverted.
        id: ConversationId,
        /// Fields restored in the mirror. Fields handed to a later in-flight
        /// mutation are not included.
        restored: ConversationPatch,
    },
    /// The mutation is no longer tracked (its record was deleted or the
    /// mirror was reseeded without it).
    Discarded,
}

#[derive(Debug, Clone)]
struct InFlight {
    mutation_id: MutationId,
    patch: ConversationPatch,
    baseline: ConversationPatch,
}

/// Mirror plus in-flight mutation table.
#[derive(Debug, Default)]
pub struct Reconciler {
    mirror: MirrorStore,
    in_flight: HashMap<ConversationId, Vec<InFlight>>,
    owners: HashMap<MutationId, ConversationId>,
}

impl Reconciler {
    /// Create a reconciler over an empty mirror.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the mirror with freshly fetched records.
    ///
    /// Mutations still in flight survive for records that are present: the
    /// fetched values become their baselines and their patches are applied
    /// again on top. Mutations for records missing from the fetch are
    /// dropped.
    pub fn seed(&mut self, records: Vec<Conversation>) {
        self.mirror.seed(records);

        let mirror = &mut self.mirror;
        let owners = &mut self.owners;
        self.in_flight.retain(|id, entries| {
            let Some(record) = mirror.get(id).cloned() else {
                for entry in entries.iter() {
                    owners.remove(&entry.mutation_id);
                }
                return false;
            };
            for entry in entries.iter_mut() {
                entry.baseline = ConversationPatch::capture(&record, entry.patch.fields());
            }
            for entry in entries.iter() {
                mirror.patch(id, &entry.patch);
            }
            true
        });
    }

    /// Apply a remote event. Returns true if the mirror changed.
    pub fn apply_remote(&mut self, event: &CanonicalEvent) -> bool {
        match event {
            CanonicalEvent::Inserted(record) if self.mirror.contains(&record.id) => {
                self.apply_remote_update(&record.id, &ConversationPatch::from_record(record))
            }
            CanonicalEvent::Inserted(_) => self.mirror.apply(event),
            CanonicalEvent::Updated(id, patch) => self.apply_remote_update(id, patch),
            CanonicalEvent::Deleted(id) => {
                if let Some(entries) = self.in_flight.remove(id) {
                    for entry in entries {
                        tracing::debug!(
                            conversation_id = %id,
                            mutation_id = %entry.mutation_id,
                            "Dropping in-flight mutation of deleted conversation"
                        );
                        self.owners.remove(&entry.mutation_id);
                    }
                }
                self.mirror.apply(event)
            }
        }
    }

    fn apply_remote_update(&mut self, id: &ConversationId, patch: &ConversationPatch) -> bool {
        if let Some(entries) = self.in_flight.get_mut(id) {
            for entry in entries.iter_mut() {
                for field in patch.fields() {
                    if entry.patch.touches(field) {
                        entry.baseline.copy_field(patch, field);
                    }
                }
            }
        }
        self.mirror.patch(id, patch)
    }

    /// Apply `patch` optimistically and record it as in flight.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::NotFound` if the record is not in the mirror, or
    /// `SyncError::InvariantViolation` if the patch is empty.
    pub fn begin(&mut self, id: &ConversationId, patch: ConversationPatch) -> Result<PendingWrite> {
        let record = self
            .mirror
            .get(id)
            .ok_or_else(|| SyncError::NotFound(id.clone()))?;
        if patch.is_empty() {
            return Err(SyncError::InvariantViolation(format!(
                "empty write for conversation {id}"
            )));
        }

        let baseline = ConversationPatch::capture(record, patch.fields());
        self.mirror.patch(id, &patch);

        let mutation_id = MutationId::generate();
        self.owners.insert(mutation_id, id.clone());
        self.in_flight.entry(id.clone()).or_default().push(InFlight {
            mutation_id,
            patch: patch.clone(),
            baseline,
        });

        tracing::debug!(
            conversation_id = %id,
            mutation_id = %mutation_id,
            fields = ?patch.fields(),
            "Applied optimistic mutation"
        );

        Ok(PendingWrite {
            mutation_id,
            id: id.clone(),
            patch,
        })
    }

    /// Settle the outcome of a write started with [`Reconciler::begin`].
    ///
    /// On success, the confirmed values become the baseline of any earlier
    /// mutation still in flight on the same fields.
    ///
    /// On failure, every field of the mutation goes back to its baseline,
    /// except fields that a later in-flight mutation also touches: those
    /// keep the later mutation's value and the baseline moves to that
    /// mutation instead.
    pub fn settle(
        &mut self,
        mutation_id: MutationId,
        outcome: &std::result::Result<(), String>,
    ) -> Settlement {
        let Some(id) = self.owners.remove(&mutation_id) else {
            tracing::debug!(mutation_id = %mutation_id, "Discarding outcome of untracked mutation");
            return Settlement::Discarded;
        };
        let Some(entries) = self.in_flight.get_mut(&id) else {
            return Settlement::Discarded;
        };
        let Some(position) = entries.iter().position(|e| e.mutation_id == mutation_id) else {
            return Settlement::Discarded;
        };

        let entry = entries.remove(position);
        let settlement = match outcome {
            Ok(()) => {
                // The backend now holds this value; earlier mutations that
                // still fail must fall back to it.
                for field in entry.patch.fields() {
                    for earlier in entries[..position]
                        .iter_mut()
                        .filter(|earlier| earlier.patch.touches(field))
                    {
                        earlier.baseline.copy_field(&entry.patch, field);
                    }
                }
                Settlement::Confirmed
            }
            Err(reason) => {
                let mut restored = ConversationPatch::default();
                for field in entry.baseline.fields() {
                    let successor = entries[position..]
                        .iter_mut()
                        .find(|later| later.patch.touches(field));
                    match successor {
                        Some(later) => later.baseline.copy_field(&entry.baseline, field),
                        None => restored.copy_field(&entry.baseline, field),
                    }
                }
                self.mirror.patch(&id, &restored);
                tracing::info!(
                    conversation_id = %id,
                    mutation_id = %mutation_id,
                    reason = %reason,
                    "Reverted failed mutation"
                );
                Settlement::Reverted {
                    id: id.clone(),
                    restored,
                }
            }
        };

        if entries.is_empty() {
            self.in_flight.remove(&id);
        }
        settlement
    }

    /// Clear the new-arrival flag of a record.
    pub fn acknowledge(&mut self, id: &ConversationId) -> bool {
        self.mirror.acknowledge(id)
    }

    /// The ordered records.
    #[must_use]
    pub fn read(&self) -> Vec<Conversation> {
        self.mirror.read()
    }

    /// Get a record by id.
    #[must_use]
    pub fn get(&self, id: &ConversationId) -> Option<&Conversation> {
        self.mirror.get(id)
    }

    /// Number of mutations in flight for `id`.
    #[must_use]
    pub fn in_flight(&self, id: &ConversationId) -> usize {
        self.in_flight.get(id).map_or(0, Vec::len)
    }

    /// The underlying mirror.
    #[must_use]
    pub const fn mirror(&self) -> &MirrorStore {
        &self.mirror
    }
}
