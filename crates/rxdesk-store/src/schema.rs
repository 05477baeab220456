//! Database schema definitions and column families.
//!
//! This module defines the column families used in `RocksDB` storage.

/// Column family names for the `RocksDB` database.
pub mod cf {
    /// Primary conversation records, keyed by conversation id.
    pub const CONVERSATIONS: &str = "conversations";

    /// Index: conversations by recency, keyed by `descending_time || id`.
    pub const CONVERSATIONS_BY_TIME: &str = "conversations_by_time";

    /// Product records, keyed by product id.
    pub const PRODUCTS: &str = "products";
}

/// Returns all column family names for database initialization.
#[must_use]
pub fn all_column_families() -> Vec<&'static str> {
    vec![cf::CONVERSATIONS, cf::CONVERSATIONS_BY_TIME, cf::PRODUCTS]
}
