//! `RocksDB` storage implementation.
//!
//! `RocksStore` is a durable, single-process stand-in for the remote
//! conversation table. Every committed conversation change is announced on
//! its [`LocalFeed`] in the backend's native notification shape, so the
//! synchronizer can run end-to-end against it.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rocksdb::{
    BoundColumnFamily, ColumnFamilyDescriptor, DBWithThreadMode, IteratorMode, MultiThreaded,
    Options, WriteBatch,
};
use rxdesk_core::{ConversationId, ProductId};

use crate::error::{Result, StoreError};
use crate::feed::{LocalFeed, RawChange};
use crate::inventory;
use crate::keys;
use crate::schema::{all_column_families, cf};
use crate::types::{Conversation, ConversationPatch, Product};
use crate::PersistentStore;

/// RocksDB-backed storage implementation.
pub struct RocksStore {
    db: Arc<DBWithThreadMode<MultiThreaded>>,
    feed: LocalFeed,
    /// Serializes read-modify-write cycles so rows and their announcements
    /// commit in one order.
    writes: Mutex<()>,
}

impl RocksStore {
    /// Open or create a `RocksDB` database at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_feed(path, LocalFeed::new())
    }

    /// Open a database that publishes into an existing feed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or created.
    pub fn open_with_feed<P: AsRef<Path>>(path: P, feed: LocalFeed) -> Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cf_descriptors: Vec<_> = all_column_families()
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()))
            .collect();

        let db = DBWithThreadMode::open_cf_descriptors(&opts, path, cf_descriptors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(Self {
            db: Arc::new(db),
            feed,
            writes: Mutex::new(()),
        })
    }

    /// The feed this store announces conversation changes on.
    #[must_use]
    pub const fn feed(&self) -> &LocalFeed {
        &self.feed
    }

    /// Get a column family handle.
    fn cf(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::Database(format!("column family not found: {name}")))
    }

    /// Serialize a value using CBOR.
    fn serialize<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        ciborium::into_writer(value, &mut buf)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(buf)
    }

    /// Deserialize a value from CBOR.
    fn deserialize<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T> {
        ciborium::from_reader(data).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn row_json(conversation: &Conversation) -> Result<serde_json::Value> {
        serde_json::to_value(conversation).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    /// Write a conversation row and keep the recency index in step.
    ///
    /// Returns the previous row, if any.
    fn write_conversation(&self, conversation: &Conversation) -> Result<Option<Conversation>> {
        let cf_conversations = self.cf(cf::CONVERSATIONS)?;
        let cf_by_time = self.cf(cf::CONVERSATIONS_BY_TIME)?;

        let key = keys::conversation_key(&conversation.id);
        let value = Self::serialize(conversation)?;
        let previous = self.get_conversation(&conversation.id)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_conversations, &key, &value);

        if let Some(old) = &previous {
            if old.last_message_time != conversation.last_message_time {
                let old_time_key = keys::time_key(&old.last_message_time, &old.id);
                batch.delete_cf(&cf_by_time, &old_time_key);
            }
        }
        let time_key = keys::time_key(&conversation.last_message_time, &conversation.id);
        batch.put_cf(&cf_by_time, &time_key, []);

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(previous)
    }

    // =========================================================================
    // Conversation Operations
    // =========================================================================

    /// Insert or replace a conversation.
    ///
    /// Announces an `INSERT` for a new id and an `UPDATE` otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_conversation(&self, conversation: &Conversation) -> Result<()> {
        let _guard = self.writes.lock();
        let previous = self.write_conversation(conversation)?;
        let row = Self::row_json(conversation)?;

        let change = if previous.is_some() {
            RawChange::update(conversation.id.as_str(), row)
        } else {
            RawChange::insert(row)
        };
        self.feed.publish(&change);

        tracing::debug!(conversation_id = %conversation.id, "Stored conversation");
        Ok(())
    }

    /// Get a conversation by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_conversation(&self, id: &ConversationId) -> Result<Option<Conversation>> {
        let cf = self.cf(cf::CONVERSATIONS)?;
        let key = keys::conversation_key(id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// Apply a partial update to a conversation and announce the new row.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the conversation doesn't exist.
    pub fn update_conversation(
        &self,
        id: &ConversationId,
        patch: &ConversationPatch,
    ) -> Result<Conversation> {
        let _guard = self.writes.lock();
        let mut conversation = self.get_conversation(id)?.ok_or(StoreError::NotFound)?;
        patch.apply_to(&mut conversation);
        self.write_conversation(&conversation)?;

        let row = Self::row_json(&conversation)?;
        self.feed.publish(&RawChange::update(id.as_str(), row));

        tracing::debug!(conversation_id = %id, "Updated conversation");
        Ok(conversation)
    }

    /// Delete a conversation and announce it.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the conversation doesn't exist.
    pub fn delete_conversation(&self, id: &ConversationId) -> Result<()> {
        let cf_conversations = self.cf(cf::CONVERSATIONS)?;
        let cf_by_time = self.cf(cf::CONVERSATIONS_BY_TIME)?;

        let _guard = self.writes.lock();
        let conversation = self.get_conversation(id)?.ok_or(StoreError::NotFound)?;

        let mut batch = WriteBatch::default();
        batch.delete_cf(&cf_conversations, keys::conversation_key(id));
        batch.delete_cf(
            &cf_by_time,
            keys::time_key(&conversation.last_message_time, id),
        );

        self.db
            .write(batch)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        self.feed.publish(&RawChange::delete(id.as_str()));

        tracing::debug!(conversation_id = %id, "Deleted conversation");
        Ok(())
    }

    /// List all conversations, most recently active first.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_conversations(&self) -> Result<Vec<Conversation>> {
        let cf_by_time = self.cf(cf::CONVERSATIONS_BY_TIME)?;

        let mut conversations = Vec::new();
        let iter = self.db.iterator_cf(&cf_by_time, IteratorMode::Start);

        for item in iter {
            let (key, _) = item.map_err(|e| StoreError::Database(e.to_string()))?;

            let Some(id) = keys::extract_conversation_id_from_time_key(&key) else {
                tracing::warn!(key_len = key.len(), "Skipping malformed recency index key");
                continue;
            };
            if let Some(conversation) = self.get_conversation(&id)? {
                conversations.push(conversation);
            }
        }

        Ok(conversations)
    }

    // =========================================================================
    // Product Operations
    // =========================================================================

    /// Insert or replace a product.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn put_product(&self, product: &Product) -> Result<()> {
        let cf = self.cf(cf::PRODUCTS)?;
        let key = keys::product_key(&product.id);
        let value = Self::serialize(product)?;

        self.db
            .put_cf(&cf, key, value)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        Ok(())
    }

    /// Get a product by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn get_product(&self, id: &ProductId) -> Result<Option<Product>> {
        let cf = self.cf(cf::PRODUCTS)?;
        let key = keys::product_key(id);

        self.db
            .get_cf(&cf, key)
            .map_err(|e| StoreError::Database(e.to_string()))?
            .map(|data| Self::deserialize(&data))
            .transpose()
    }

    /// List all products ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn list_products(&self) -> Result<Vec<Product>> {
        let cf = self.cf(cf::PRODUCTS)?;

        let mut products = Vec::new();
        for item in self.db.iterator_cf(&cf, IteratorMode::Start) {
            let (_, value) = item.map_err(|e| StoreError::Database(e.to_string()))?;
            products.push(Self::deserialize::<Product>(&value)?);
        }
        products.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));

        Ok(products)
    }

    /// Add `delta` units (negative to remove) to a product's stock.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::NotFound` if the product doesn't exist and
    /// `StoreError::InvariantViolation` if stock would drop below zero; in
    /// that case nothing is written.
    pub fn adjust_stock(&self, id: &ProductId, delta: i64) -> Result<Product> {
        let _guard = self.writes.lock();
        let mut product = self.get_product(id)?.ok_or(StoreError::NotFound)?;
        product.stock_quantity = inventory::apply_stock_delta(&product, delta)?;
        self.put_product(&product)?;

        tracing::info!(
            product_id = %id,
            delta,
            stock_quantity = product.stock_quantity,
            "Adjusted stock"
        );
        Ok(product)
    }
}

#[async_trait]
impl PersistentStore for RocksStore {
    async fn fetch_all(&self) -> Result<Vec<Conversation>> {
        self.list_conversations()
    }

    async fn write(&self, id: &ConversationId, patch: &ConversationPatch) -> Result<()> {
        self.update_conversation(id, patch).map(|_| ())
    }
}
