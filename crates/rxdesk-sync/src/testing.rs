//! Test doubles for the synchronizer.
//!
//! [`ScriptedStore`] is an in-memory [`PersistentStore`] whose fetches and
//! writes can be made to fail, hang, or wait for the test to release them.
//! Successful writes are recorded and, when a feed is attached, echoed as
//! `UPDATE` notifications the way a realtime backend would.

use std::collections::VecDeque;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rxdesk_core::ConversationId;
use rxdesk_store::{
    Conversation, ConversationPatch, ConversationStatus, ConversationType, LocalFeed,
    PersistentStore, RawChange, Result, StoreError,
};
use tokio::sync::oneshot;

/// Fixed reference time used by [`conversation`].
#[must_use]
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .single()
        .unwrap_or_default()
}

/// An `ongoing` vendor conversation whose last message is `minutes` after
/// [`base_time`].
///
/// # Panics
///
/// Panics if `id` is blank.
#[must_use]
pub fn conversation(id: &str, minutes: i64) -> Conversation {
    Conversation {
        id: ConversationId::new(id).expect("test ids are not blank"),
        customer_name: format!("Customer {id}"),
        customer_phone: "+55 11 90000-0000".to_string(),
        last_message: "Hello".to_string(),
        last_message_time: base_time() + Duration::minutes(minutes),
        status: ConversationStatus::Ongoing,
        kind: ConversationType::Vendor,
        assigned_to: None,
        is_new: false,
    }
}

/// How the next write behaves.
#[derive(Debug)]
pub enum WriteScript {
    /// Accept the write.
    Succeed,
    /// Reject the write with this reason.
    Fail(String),
    /// Never answer.
    Hang,
    /// Wait for the test to send the outcome; a dropped sender rejects.
    Hold(oneshot::Receiver<std::result::Result<(), String>>),
}

/// Scripted in-memory conversation store.
#[derive(Debug, Default)]
pub struct ScriptedStore {
    records: Mutex<Vec<Conversation>>,
    fetch_error: Mutex<Option<String>>,
    fetch_gate: Mutex<Option<oneshot::Receiver<()>>>,
    scripts: Mutex<VecDeque<WriteScript>>,
    writes: Mutex<Vec<(ConversationId, ConversationPatch)>>,
    fetches: Mutex<usize>,
    echo: Option<LocalFeed>,
}

impl ScriptedStore {
    /// A store holding `records`.
    #[must_use]
    pub fn new(records: Vec<Conversation>) -> Self {
        Self {
            records: Mutex::new(records),
            ..Self::default()
        }
    }

    /// Echo accepted writes on `feed`.
    #[must_use]
    pub fn with_echo(mut self, feed: LocalFeed) -> Self {
        self.echo = Some(feed);
        self
    }

    /// Make fetches fail with `reason` until [`ScriptedStore::heal_fetch`].
    pub fn fail_fetch(&self, reason: impl Into<String>) {
        *self.fetch_error.lock() = Some(reason.into());
    }

    /// Let fetches succeed again.
    pub fn heal_fetch(&self) {
        *self.fetch_error.lock() = None;
    }

    /// Make the next fetch wait until the returned sender fires or drops.
    pub fn hold_fetch(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *self.fetch_gate.lock() = Some(rx);
        tx
    }

    /// Queue the behaviour of the next unscripted write.
    pub fn script(&self, script: WriteScript) {
        self.scripts.lock().push_back(script);
    }

    /// Make the next write wait for the outcome sent on the returned sender.
    pub fn hold_write(&self) -> oneshot::Sender<std::result::Result<(), String>> {
        let (tx, rx) = oneshot::channel();
        self.script(WriteScript::Hold(rx));
        tx
    }

    /// Every write received so far, in order.
    #[must_use]
    pub fn writes(&self) -> Vec<(ConversationId, ConversationPatch)> {
        self.writes.lock().clone()
    }

    /// Number of fetches started.
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        *self.fetches.lock()
    }

    fn commit(&self, id: &ConversationId, patch: &ConversationPatch) {
        let row = {
            let mut records = self.records.lock();
            records.iter_mut().find(|r| &r.id == id).map(|record| {
                patch.apply_to(record);
                serde_json::to_value(&*record).unwrap_or_default()
            })
        };
        if let (Some(feed), Some(row)) = (&self.echo, row) {
            feed.publish(&RawChange::update(id.as_str(), row));
        }
    }
}

#[async_trait]
impl PersistentStore for ScriptedStore {
    async fn fetch_all(&self) -> Result<Vec<Conversation>> {
        *self.fetches.lock() += 1;
        let gate = self.fetch_gate.lock().take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        if let Some(reason) = self.fetch_error.lock().clone() {
            return Err(StoreError::Http(reason));
        }
        let mut records = self.records.lock().clone();
        records.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(records)
    }

    async fn write(&self, id: &ConversationId, patch: &ConversationPatch) -> Result<()> {
        self.writes.lock().push((id.clone(), patch.clone()));
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(WriteScript::Succeed);

        let outcome = match script {
            WriteScript::Succeed => Ok(()),
            WriteScript::Fail(reason) => Err(reason),
            WriteScript::Hang => std::future::pending().await,
            WriteScript::Hold(rx) => rx
                .await
                .unwrap_or_else(|_| Err("write abandoned".to_string())),
        };

        match outcome {
            Ok(()) => {
                self.commit(id, patch);
                Ok(())
            }
            Err(reason) => Err(StoreError::Rejected(reason)),
        }
    }
}
