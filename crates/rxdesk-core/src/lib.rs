//! Core types for rxdesk.
//!
//! This crate provides the strongly-typed identifiers shared by every other
//! rxdesk crate:
//!
//! - [`ConversationId`]: backend-assigned conversation key
//! - [`AgentId`]: support desk agent (the signed-in user)
//! - [`ProductId`]: inventory product key
//! - [`MutationId`]: locally generated key of one optimistic mutation
//!
//! # Example
//!
//! ```
//! use rxdesk_core::{AgentId, ConversationId, MutationId};
//!
//! let conversation = ConversationId::new("c-42").unwrap();
//! let agent: AgentId = "agent-7".parse().unwrap();
//! let mutation = MutationId::generate();
//!
//! assert_eq!(conversation.as_str(), "c-42");
//! assert_eq!(agent.to_string(), "agent-7");
//! assert_ne!(mutation, MutationId::generate());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod ids;

pub use ids::{AgentId, ConversationId, IdError, MutationId, ProductId};
