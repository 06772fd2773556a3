//! Couchbase REST document client.
//!
//! Writes documents through the cluster manager's document endpoint:
//! `POST {uri}/pools/{cluster}/buckets/{bucket}/docs/{key}` with the JSON
//! body in the `value` form field. The endpoint creates or replaces the
//! document, which gives upsert semantics without a native SDK.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use tracing::debug;

use emdr_core::config::StoreConfig;

use crate::document::MarketDocument;
use crate::store::{DocumentStore, StoreError};

/// Couchbase document writer over HTTP.
pub struct CouchbaseRestStore {
    client: Client,
    base: Url,
    cluster: String,
    bucket: String,
    username: String,
    password: String,
}

impl CouchbaseRestStore {
    /// Build a client from store configuration.
    ///
    /// Does not contact the cluster; the first upsert does.
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&config.uri).map_err(|_| StoreError::InvalidUri(config.uri.clone()))?;
        if base.cannot_be_a_base() {
            return Err(StoreError::InvalidUri(config.uri.clone()));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            base,
            cluster: config.cluster.clone(),
            bucket: config.bucket.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Document URL with every component percent-encoded as a path segment.
    fn doc_url(&self, key: &str) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::InvalidUri(self.base.to_string()))?
            .pop_if_empty()
            .extend(["pools", &self.cluster, "buckets", &self.bucket, "docs", key]);
        Ok(url)
    }
}

#[async_trait]
impl DocumentStore for CouchbaseRestStore {
    async fn upsert(&self, key: &str, doc: &MarketDocument) -> Result<(), StoreError> {
        let url = self.doc_url(key)?;
        let body = serde_json::to_string(doc)?;

        let mut request = self.client.post(url).form(&[("value", body.as_str())]);
        if !self.username.is_empty() {
            request = request.basic_auth(&self.username, Some(&self.password));
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Rejected {
                key: key.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        debug!(key, bucket = %self.bucket, "document upserted");
        Ok(())
    }
}
