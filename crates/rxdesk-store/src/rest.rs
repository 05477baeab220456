//! HTTP client for a PostgREST-style conversation table.
//!
//! This module provides `RestStore`, a [`PersistentStore`] that reads and
//! patches the `conversations` table of a hosted Postgres REST endpoint.
//! It has no change feed; live updates come from whichever transport the
//! deployment provides.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use rxdesk_core::ConversationId;
use serde::Deserialize;

use crate::error::{Result, StoreError};
use crate::types::{Conversation, ConversationPatch};
use crate::PersistentStore;

/// Connection settings for the REST backend.
#[derive(Debug, Clone, Deserialize)]
pub struct RestConfig {
    /// Project base URL (e.g. `https://project.example.co`).
    pub base_url: String,
    /// API key sent as `apikey` and bearer token.
    pub api_key: String,
    /// Conversation table name.
    #[serde(default = "RestConfig::default_table")]
    pub table: String,
    /// Per-request timeout in seconds.
    #[serde(default = "RestConfig::default_timeout")]
    pub timeout_seconds: u64,
}

impl RestConfig {
    /// Settings for `base_url` with default table and timeout.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            table: Self::default_table(),
            timeout_seconds: Self::default_timeout(),
        }
    }

    fn default_table() -> String {
        "conversations".to_string()
    }

    const fn default_timeout() -> u64 {
        30
    }

    /// The REST endpoint of the conversation table.
    #[must_use]
    pub fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.base_url, self.table)
    }

    /// Get the request timeout as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Error body returned by the REST backend.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// REST-backed conversation store.
#[derive(Debug, Clone)]
pub struct RestStore {
    client: reqwest::Client,
    config: RestConfig,
}

impl RestStore {
    /// Create a new REST store.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Http` if the HTTP client cannot be built (for
    /// instance when the API key is not a valid header value).
    pub fn new(config: RestConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|e| StoreError::Http(format!("invalid api key: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|e| StoreError::Http(format!("invalid api key: {e}")))?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| StoreError::Http(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Get the connection settings.
    #[must_use]
    pub const fn config(&self) -> &RestConfig {
        &self.config
    }

    /// Turn a non-success response into a `Rejected` error.
    async fn rejection(response: reqwest::Response) -> StoreError {
        let status = response.status();
        let message = response
            .json::<ErrorResponse>()
            .await
            .map(|e| e.message)
            .unwrap_or_else(|_| format!("backend returned status {status}"));
        StoreError::Rejected(message)
    }
}

#[async_trait]
impl PersistentStore for RestStore {
    async fn fetch_all(&self) -> Result<Vec<Conversation>> {
        let response = self
            .client
            .get(self.config.table_url())
            .query(&[("select", "*"), ("order", "last_message_time.desc")])
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let error = Self::rejection(response).await;
            tracing::error!(error = %error, "Failed to fetch conversations");
            return Err(error);
        }

        let conversations: Vec<Conversation> = response
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        tracing::debug!(count = conversations.len(), "Fetched conversations");
        Ok(conversations)
    }

    async fn write(&self, id: &ConversationId, patch: &ConversationPatch) -> Result<()> {
        let response = self
            .client
            .patch(self.config.table_url())
            .query(&[("id", format!("eq.{id}"))])
            .header("Prefer", "return=representation")
            .json(patch)
            .send()
            .await
            .map_err(|e| StoreError::Http(e.to_string()))?;

        if !response.status().is_success() {
            let error = Self::rejection(response).await;
            tracing::error!(conversation_id = %id, error = %error, "Conversation write rejected");
            return Err(error);
        }

        let rows: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        if rows.is_empty() {
            return Err(StoreError::NotFound);
        }

        tracing::debug!(conversation_id = %id, "Wrote conversation");
        Ok(())
    }
}
