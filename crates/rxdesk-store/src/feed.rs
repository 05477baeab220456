//! Change notifications.
//!
//! Backends announce row changes as [`RawChange`] values in their native
//! `{eventType, new, old}` shape. Consumers receive them through a
//! [`FeedSubscription`], which deregisters itself when dropped so that no
//! notification reaches a torn-down view.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::ChangeFeed;

/// A change notification as emitted by the backend.
///
/// Nothing about the payload is trusted: `event_type` may be anything and
/// `new`/`old` may be missing or partially shaped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChange {
    /// `INSERT`, `UPDATE` or `DELETE`.
    #[serde(rename = "eventType")]
    pub event_type: String,
    /// The row after the change (full row for inserts, changed columns or
    /// full row for updates).
    #[serde(default)]
    pub new: Value,
    /// The row before the change; at least the primary key.
    #[serde(default)]
    pub old: Value,
}

impl RawChange {
    /// An insert of `row`.
    #[must_use]
    pub fn insert(row: Value) -> Self {
        Self {
            event_type: "INSERT".to_string(),
            new: row,
            old: Value::Object(serde_json::Map::new()),
        }
    }

    /// An update of the row keyed by `id` to `row`.
    #[must_use]
    pub fn update(id: &str, row: Value) -> Self {
        Self {
            event_type: "UPDATE".to_string(),
            new: row,
            old: serde_json::json!({ "id": id }),
        }
    }

    /// A delete of the row keyed by `id`.
    #[must_use]
    pub fn delete(id: &str) -> Self {
        Self {
            event_type: "DELETE".to_string(),
            new: Value::Object(serde_json::Map::new()),
            old: serde_json::json!({ "id": id }),
        }
    }
}

/// A live subscription to a change feed.
///
/// Exactly one consumer owns it. Dropping it (or calling
/// [`FeedSubscription::unsubscribe`]) releases the slot in the producing
/// feed before returning.
pub struct FeedSubscription {
    rx: mpsc::UnboundedReceiver<RawChange>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl FeedSubscription {
    /// Wrap a receiver and the callback that deregisters it from its feed.
    #[must_use]
    pub fn new(
        rx: mpsc::UnboundedReceiver<RawChange>,
        release: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            rx,
            release: Some(Box::new(release)),
        }
    }

    /// Wait for the next notification.
    ///
    /// Returns `None` once the feed has shut down.
    pub async fn recv(&mut self) -> Option<RawChange> {
        self.rx.recv().await
    }

    /// Take a notification if one is already queued.
    pub fn try_recv(&mut self) -> Option<RawChange> {
        self.rx.try_recv().ok()
    }

    /// Release the subscription.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for FeedSubscription {
    fn drop(&mut self) {
        self.rx.close();
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for FeedSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedSubscription")
            .field("released", &self.release.is_none())
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Registry {
    subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<RawChange>>>,
    next_id: AtomicU64,
}

/// In-process fan-out feed.
///
/// Backends that run in the same process (such as
/// [`RocksStore`](crate::RocksStore)) publish into it after every committed
/// change. Cloning yields another handle to the same feed.
#[derive(Clone, Default)]
pub struct LocalFeed {
    registry: Arc<Registry>,
}

impl LocalFeed {
    /// Create a feed with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `change` to every live subscriber, in publish order.
    ///
    /// Returns the number of subscribers that received it.
    pub fn publish(&self, change: &RawChange) -> usize {
        let mut subscribers = self.registry.subscribers.lock();
        subscribers.retain(|_, tx| tx.send(change.clone()).is_ok());
        let delivered = subscribers.len();
        tracing::trace!(
            event_type = %change.event_type,
            delivered,
            "Published change"
        );
        delivered
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscribers.lock().len()
    }
}

impl ChangeFeed for LocalFeed {
    fn subscribe(&self) -> FeedSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.subscribers.lock().insert(id, tx);
        tracing::debug!(subscription = id, "Feed subscription opened");

        let registry = Arc::downgrade(&self.registry);
        FeedSubscription::new(rx, move || {
            if let Some(registry) = registry.upgrade() {
                registry.subscribers.lock().remove(&id);
            }
            tracing::debug!(subscription = id, "Feed subscription released");
        })
    }
}

impl fmt::Debug for LocalFeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalFeed")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
