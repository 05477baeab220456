//! Key encoding utilities for `RocksDB`.
//!
//! The recency index stores `descending_time || id` so that a forward scan
//! yields the most recently active conversation first, with ties broken by
//! ascending id.

use chrono::{DateTime, Utc};
use rxdesk_core::{ConversationId, ProductId};

/// Width of the encoded timestamp prefix.
const TIME_PREFIX_LEN: usize = 8;

/// Encode a conversation key (the id bytes).
#[must_use]
pub fn conversation_key(id: &ConversationId) -> Vec<u8> {
    id.as_ref().to_vec()
}

/// Encode a product key (the id bytes).
#[must_use]
pub fn product_key(id: &ProductId) -> Vec<u8> {
    id.as_ref().to_vec()
}

/// Encode a timestamp so that byte order is newest first.
#[must_use]
#[allow(clippy::cast_sign_loss)]
pub fn descending_time(time: &DateTime<Utc>) -> [u8; TIME_PREFIX_LEN] {
    // Flipping the sign bit makes signed micros sort as unsigned; inverting
    // every bit then reverses the order.
    let ascending = (time.timestamp_micros() as u64) ^ (1 << 63);
    (!ascending).to_be_bytes()
}

/// Encode a recency index key: `descending_time || id`.
#[must_use]
pub fn time_key(time: &DateTime<Utc>, id: &ConversationId) -> Vec<u8> {
    let id_bytes: &[u8] = id.as_ref();
    let mut key = Vec::with_capacity(TIME_PREFIX_LEN + id_bytes.len());
    key.extend_from_slice(&descending_time(time));
    key.extend_from_slice(id_bytes);
    key
}

/// Extract the conversation id from a recency index key.
///
/// Returns `None` if the key is too short or the id is not valid UTF-8.
#[must_use]
pub fn extract_conversation_id_from_time_key(key: &[u8]) -> Option<ConversationId> {
    let id = key.get(TIME_PREFIX_LEN..)?;
    let id = std::str::from_utf8(id).ok()?;
    ConversationId::new(id).ok()
}
