//! Document-store abstraction.
//!
//! The [`DocumentStore`] trait lets the persister write documents without
//! coupling to a particular backend. Writes are upserts: the last write for
//! a key wins.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

use crate::document::MarketDocument;

/// Errors returned by document-store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The configured base URI could not be used to build document URLs.
    #[error("invalid store uri '{0}'")]
    InvalidUri(String),
    /// The request never produced a response (connect, timeout, TLS).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// The store answered with a non-success status.
    #[error("store rejected write of '{key}' with status {status}: {body}")]
    Rejected {
        key: String,
        status: u16,
        body: String,
    },
    #[error("document serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Upsert-only document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Insert or replace the document stored under `key`.
    async fn upsert(&self, key: &str, doc: &MarketDocument) -> Result<(), StoreError>;
}

/// In-process store backed by a concurrent map.
///
/// Used for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    docs: DashMap<String, MarketDocument>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the document under `key`, if any.
    pub fn get(&self, key: &str) -> Option<MarketDocument> {
        self.docs.get(key).map(|d| d.value().clone())
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// All stored keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.docs.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn upsert(&self, key: &str, doc: &MarketDocument) -> Result<(), StoreError> {
        self.docs.insert(key.to_string(), doc.clone());
        Ok(())
    }
}
