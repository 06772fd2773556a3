//! Background persistence of novel payloads.
//!
//! The [`Persister`] runs on its own task and receives raw payloads from the
//! relay through a bounded channel. For each payload it decodes the envelope,
//! selects fresh rowsets, and upserts one document per rowset. Every failure
//! is logged and counted; nothing is retried and nothing propagates back to
//! the relay loop.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::extract::{decode_envelope, fresh_documents};
use crate::store::DocumentStore;

/// Counters shared between the persister task and its observers.
#[derive(Debug, Default)]
pub struct PersisterMetrics {
    /// Payloads taken off the channel.
    pub payloads_received: AtomicU64,
    /// Payloads that failed decompression or parsing.
    pub decode_errors: AtomicU64,
    /// Rowsets outside the freshness window.
    pub stale_rowsets: AtomicU64,
    pub documents_written: AtomicU64,
    pub write_errors: AtomicU64,
    /// Payloads dropped because the channel was full.
    pub payloads_dropped: AtomicU64,
}

/// Point-in-time copy of [`PersisterMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PersisterSnapshot {
    pub payloads_received: u64,
    pub decode_errors: u64,
    pub stale_rowsets: u64,
    pub documents_written: u64,
    pub write_errors: u64,
    pub payloads_dropped: u64,
}

impl PersisterMetrics {
    pub fn snapshot(&self) -> PersisterSnapshot {
        PersisterSnapshot {
            payloads_received: self.payloads_received.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            stale_rowsets: self.stale_rowsets.load(Ordering::Relaxed),
            documents_written: self.documents_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            payloads_dropped: self.payloads_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Decodes payloads and writes fresh rowsets to a [`DocumentStore`].
///
/// Create via [`Persister::new`], which also returns the clonable
/// [`PersisterHandle`] the relay submits payloads through.
pub struct Persister {
    rx: mpsc::Receiver<Bytes>,
    store: Arc<dyn DocumentStore>,
    metrics: Arc<PersisterMetrics>,
}

/// Clonable handle for submitting payloads to the [`Persister`].
///
/// Dropping every handle closes the channel; the persister drains what is
/// queued and returns.
#[derive(Clone)]
pub struct PersisterHandle {
    tx: mpsc::Sender<Bytes>,
    metrics: Arc<PersisterMetrics>,
}

impl Persister {
    /// Creates a persister with a queue of `channel_capacity` payloads.
    pub fn new(store: Arc<dyn DocumentStore>, channel_capacity: usize) -> (Self, PersisterHandle) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let metrics = Arc::new(PersisterMetrics::default());

        let persister = Self {
            rx,
            store,
            metrics: metrics.clone(),
        };
        let handle = PersisterHandle { tx, metrics };
        (persister, handle)
    }

    pub fn metrics(&self) -> Arc<PersisterMetrics> {
        self.metrics.clone()
    }

    /// Runs until every [`PersisterHandle`] is dropped.
    pub async fn run(mut self) -> Result<()> {
        info!("persister started");
        while let Some(payload) = self.rx.recv().await {
            self.process(&payload, Utc::now()).await;
        }
        info!("persister channel closed");
        Ok(())
    }

    /// Decode one payload and upsert its fresh rowsets.
    ///
    /// Returns the number of documents written.
    pub async fn process(&self, payload: &[u8], now: DateTime<Utc>) -> usize {
        self.metrics.payloads_received.fetch_add(1, Ordering::Relaxed);

        let envelope = match decode_envelope(payload) {
            Ok(env) => env,
            Err(e) => {
                self.metrics.decode_errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    error = %e,
                    bytes = payload.len(),
                    "skipping persistence for undecodable payload"
                );
                return 0;
            }
        };

        let docs = fresh_documents(&envelope, now);
        let stale = envelope.rowsets.len() - docs.len();
        if stale > 0 {
            self.metrics
                .stale_rowsets
                .fetch_add(stale as u64, Ordering::Relaxed);
            debug!(stale, result_type = %envelope.result_type, "skipped stale rowsets");
        }

        let mut written = 0;
        for (key, doc) in &docs {
            match self.store.upsert(key, doc).await {
                Ok(()) => {
                    written += 1;
                    self.metrics.documents_written.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.metrics.write_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "document upsert failed");
                }
            }
        }
        written
    }
}

impl PersisterHandle {
    /// Queue a payload without blocking.
    ///
    /// A full queue drops the payload (persistence only) and logs a warning,
    /// so a slow store never stalls forwarding. Fails only once the
    /// persister has gone away.
    pub fn submit(&self, payload: Bytes) -> Result<()> {
        match self.tx.try_send(payload) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.metrics.payloads_dropped.fetch_add(1, Ordering::Relaxed);
                warn!("persister queue full, dropping payload");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(anyhow::anyhow!("persister channel closed"))
            }
        }
    }

    pub fn metrics(&self) -> Arc<PersisterMetrics> {
        self.metrics.clone()
    }
}
