//! Conversation state synchronizer for the rxdesk dashboard.
//!
//! This crate keeps a local, ordered mirror of the conversation table
//! consistent with the backend while agents move conversations across the
//! board. It combines:
//!
//! - [`MirrorStore`]: de-duplicated records in board order
//! - [`ChangeAdapter`]: normalizes raw change notifications
//! - [`Reconciler`]: applies remote events and optimistic local writes
//! - [`SyncEngine`]: the per-view actor and its [`EngineHandle`]
//! - [`workflow`]: legal status changes and their side effects
//! - [`Board`]: the three-column projection
//! - [`DragController`]: turns drops into transition requests
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use rxdesk_core::{AgentId, ConversationId};
//! use rxdesk_store::{ConversationStatus, RocksStore};
//! use rxdesk_sync::{SyncConfig, SyncEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(RocksStore::open("/tmp/rxdesk-db")?);
//! let feed = store.feed().clone();
//! let engine = SyncEngine::mount(store, &feed, SyncConfig::default());
//!
//! engine.wait_until(|view| !view.loading).await?;
//! engine
//!     .transition(
//!         &ConversationId::new("1")?,
//!         ConversationStatus::Waiting,
//!         Some(AgentId::new("agent-7")?),
//!     )
//!     .await?;
//! engine.unmount().await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod adapter;
pub mod board;
pub mod config;
pub mod drag;
pub mod engine;
pub mod error;
pub mod mirror;
pub mod reconcile;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;
pub mod workflow;

pub use adapter::{CanonicalEvent, ChangeAdapter};
pub use board::{Board, Column};
pub use config::SyncConfig;
pub use drag::{DragController, DropAction, TransitionRequest};
pub use engine::{DashboardView, EngineHandle, SyncEngine, TransitionOutcome};
pub use error::{Result, SyncError};
pub use mirror::MirrorStore;
pub use reconcile::{PendingWrite, Reconciler, Settlement};
