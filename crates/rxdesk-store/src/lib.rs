//! Persistence layer for rxdesk.
//!
//! This crate defines the record types of the support desk and the two
//! collaborator interfaces the synchronizer depends on:
//!
//! - [`PersistentStore`]: bulk fetch and single-record writes
//! - [`ChangeFeed`]: push notifications of row changes
//!
//! Two backends are provided:
//!
//! - [`RocksStore`]: a local `RocksDB` table that announces its own changes on
//!   a [`LocalFeed`]
//! - [`RestStore`]: a PostgREST-style HTTP table (fetch and write only)
//!
//! # Example
//!
//! ```no_run
//! use rxdesk_store::{ChangeFeed, RocksStore};
//!
//! let store = RocksStore::open("/tmp/rxdesk-db").unwrap();
//! let mut subscription = store.feed().subscribe();
//!
//! for conversation in store.list_conversations().unwrap() {
//!     println!("{} [{}]", conversation.customer_name, conversation.status);
//! }
//! # drop(subscription.try_recv());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod feed;
pub mod inventory;
pub mod keys;
pub mod rest;
pub mod rocks;
pub mod schema;
pub mod types;

pub use error::{Result, StoreError};
pub use feed::{FeedSubscription, LocalFeed, RawChange};
pub use inventory::ProductFilter;
pub use rest::{RestConfig, RestStore};
pub use rocks::RocksStore;
pub use types::{
    Conversation, ConversationPatch, ConversationStatus, ConversationType, PatchField, Product,
    UnknownVariant,
};

use async_trait::async_trait;
use rxdesk_core::ConversationId;

/// The backend conversation table.
///
/// The backend is the source of truth; implementations never validate
/// workflow rules.
#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Fetch every conversation, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    async fn fetch_all(&self) -> Result<Vec<Conversation>>;

    /// Write the fields set in `patch` to the conversation `id`.
    ///
    /// # Errors
    ///
    /// Returns an error describing why the backend did not apply the write.
    async fn write(&self, id: &ConversationId, patch: &ConversationPatch) -> Result<()>;
}

/// A source of row change notifications.
pub trait ChangeFeed: Send + Sync {
    /// Open a subscription. Notifications published after this call are
    /// delivered to it until it is dropped.
    fn subscribe(&self) -> FeedSubscription;
}
