//! The dedup relay loop.
//!
//! For each inbound message: fingerprint the raw bytes, look the fingerprint
//! up in the bounded cache, drop it on a hit, and on a miss record it,
//! forward the original bytes, and (if enabled) queue it for persistence.
//!
//! The cache is updated before the forward, so a fingerprint can never be
//! admitted twice while it is resident. Nothing on this path terminates the
//! process: receive, publish, and persistence hand-off failures are logged,
//! counted, and the loop moves on.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use emdr_core::config::DedupConfig;
use emdr_dedup::{capacity_for_budget, DedupError, Fingerprint, LruSet};
use emdr_store::PersisterHandle;

use crate::transport::{InboundFeed, OutboundSink};

/// Outcome of checking one message against the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// First sighting within the dedup window; forward it.
    Novel(Fingerprint),
    /// Already resident in the cache; drop it.
    Duplicate(Fingerprint),
}

impl Verdict {
    pub fn is_novel(&self) -> bool {
        matches!(self, Verdict::Novel(_))
    }

    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            Verdict::Novel(fp) | Verdict::Duplicate(fp) => *fp,
        }
    }
}

/// Counters updated by the relay loop and read by the status server.
#[derive(Debug, Default)]
pub struct RelayStats {
    pub received: AtomicU64,
    pub forwarded: AtomicU64,
    pub duplicates: AtomicU64,
    pub receive_errors: AtomicU64,
    pub publish_errors: AtomicU64,
    /// Payloads handed to the persister.
    pub persist_submitted: AtomicU64,
    /// Current number of cached fingerprints.
    pub cache_len: AtomicU64,
}

/// Serializable copy of [`RelayStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RelaySnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub duplicates: u64,
    pub receive_errors: u64,
    pub publish_errors: u64,
    pub persist_submitted: u64,
    pub cache_len: u64,
}

impl RelayStats {
    pub fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            publish_errors: self.publish_errors.load(Ordering::Relaxed),
            persist_submitted: self.persist_submitted.load(Ordering::Relaxed),
            cache_len: self.cache_len.load(Ordering::Relaxed),
        }
    }
}

/// Backoff applied between consecutive receive errors.
#[derive(Debug, Clone)]
pub struct ReceiveBackoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for ReceiveBackoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(10),
            max: Duration::from_secs(5),
        }
    }
}

/// Number of fingerprints to remember.
///
/// A memory budget, when configured, takes precedence over the plain count.
pub fn resolve_capacity(config: &DedupConfig) -> usize {
    match config.memory_budget_bytes {
        Some(budget) => capacity_for_budget::<Fingerprint>(budget),
        None => config.cache_capacity,
    }
}

/// Deduplicating relay. Owns the fingerprint cache exclusively.
pub struct DedupRelay {
    cache: LruSet<Fingerprint>,
    persister: Option<PersisterHandle>,
    stats: Arc<RelayStats>,
    backoff: ReceiveBackoff,
}

impl DedupRelay {
    /// Create a relay remembering up to `capacity` fingerprints.
    ///
    /// With `persister = None` no payload is ever decoded or stored.
    pub fn new(capacity: usize, persister: Option<PersisterHandle>) -> Result<Self, DedupError> {
        Ok(Self {
            cache: LruSet::new(capacity)?,
            persister,
            stats: Arc::new(RelayStats::default()),
            backoff: ReceiveBackoff::default(),
        })
    }

    pub fn with_backoff(mut self, backoff: ReceiveBackoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    pub fn cache(&self) -> &LruSet<Fingerprint> {
        &self.cache
    }

    pub fn persistence_enabled(&self) -> bool {
        self.persister.is_some()
    }

    /// Decide forward-vs-drop and update the cache.
    ///
    /// A hit promotes the fingerprint; a miss inserts it, evicting the
    /// least recently used fingerprint when the cache is full.
    pub fn admit(&mut self, payload: &[u8]) -> Verdict {
        let fp = Fingerprint::of(payload);
        if self.cache.get(&fp) {
            return Verdict::Duplicate(fp);
        }
        if let Some(evicted) = self.cache.set(fp) {
            trace!(fingerprint = %evicted, "evicted fingerprint");
        }
        self.stats
            .cache_len
            .store(self.cache.len() as u64, Ordering::Relaxed);
        Verdict::Novel(fp)
    }

    /// Process one received message end to end.
    pub async fn handle<O>(&mut self, payload: Bytes, outbound: &mut O) -> Verdict
    where
        O: OutboundSink + ?Sized,
    {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        let verdict = self.admit(&payload);
        let fp = match verdict {
            Verdict::Duplicate(fp) => {
                self.stats.duplicates.fetch_add(1, Ordering::Relaxed);
                trace!(fingerprint = %fp, "duplicate dropped");
                return verdict;
            }
            Verdict::Novel(fp) => fp,
        };

        let persist_copy = self.persister.as_ref().map(|_| payload.clone());
        let len = payload.len();

        match outbound.publish(payload).await {
            Ok(()) => {
                self.stats.forwarded.fetch_add(1, Ordering::Relaxed);
                debug!(fingerprint = %fp, bytes = len, "forwarded");
            }
            Err(e) => {
                self.stats.publish_errors.fetch_add(1, Ordering::Relaxed);
                warn!(fingerprint = %fp, error = %e, "publish failed");
            }
        }

        if let Some(copy) = persist_copy {
            let submitted = match &self.persister {
                Some(handle) => handle.submit(copy),
                None => Ok(()),
            };
            match submitted {
                Ok(()) => {
                    self.stats.persist_submitted.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    error!(error = %e, "persister unavailable, disabling persistence");
                    self.persister = None;
                }
            }
        }

        verdict
    }

    /// Run until the inbound feed closes.
    pub async fn run<I, O>(&mut self, inbound: &mut I, outbound: &mut O) -> Result<()>
    where
        I: InboundFeed + ?Sized,
        O: OutboundSink + ?Sized,
    {
        info!(
            capacity = self.cache.capacity(),
            persistence = self.persistence_enabled(),
            "relay loop started"
        );

        let mut consecutive_errors: u32 = 0;
        loop {
            match inbound.recv().await {
                Ok(Some(payload)) => {
                    consecutive_errors = 0;
                    self.handle(payload, outbound).await;
                }
                Ok(None) => {
                    info!("inbound feed closed, relay loop stopping");
                    return Ok(());
                }
                Err(e) => {
                    self.stats.receive_errors.fetch_add(1, Ordering::Relaxed);
                    let delay = calculate_backoff(
                        &self.backoff.initial,
                        &self.backoff.max,
                        consecutive_errors,
                    );
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    warn!(
                        error = %e,
                        consecutive = consecutive_errors,
                        backoff_ms = delay.as_millis() as u64,
                        "receive failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Exponential backoff with jitter.
///
/// `backoff = initial * 2^attempt`, capped at `max`, plus a random
/// `[0, 0.5 * backoff]`.
pub(crate) fn calculate_backoff(initial: &Duration, max: &Duration, attempt: u32) -> Duration {
    let base = initial
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(*max);

    let jitter_frac = rand::random::<f64>() * 0.5;
    let jitter = Duration::from_secs_f64(base.as_secs_f64() * jitter_frac);

    base + jitter
}
