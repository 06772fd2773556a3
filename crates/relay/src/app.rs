//! Relay application: wires the components and manages lifecycle.
//!
//! [`RelayApp`] builds the optional persister, the dedup relay, the
//! transports, the liveness supervisor, and the status server, then runs the
//! relay loop until the feed closes or SIGINT arrives.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use emdr_core::config::AppConfig;
use emdr_store::{CouchbaseRestStore, DocumentStore, Persister, PersisterMetrics};

use crate::relay::{resolve_capacity, DedupRelay};
use crate::server::{self, StatusState};
use crate::supervisor::LivenessSupervisor;
use crate::transport::{InboundFeed, OutboundSink, ZmqPublisher, ZmqSubscriber};

/// The relay process.
pub struct RelayApp {
    config: AppConfig,
    store: Option<Arc<dyn DocumentStore>>,
    cancel: CancellationToken,
}

impl RelayApp {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            store: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `store` instead of the Couchbase client when persistence is enabled.
    pub fn with_store(mut self, store: Arc<dyn DocumentStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Token that stops the status server and the relay loop.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Connect the ZeroMQ sockets and run.
    pub async fn run(self) -> Result<()> {
        let mut publisher = ZmqPublisher::bind(&self.config.publisher.bind).await?;
        let mut subscriber = ZmqSubscriber::connect(&self.config.upstream.endpoints).await?;

        let delay = Duration::from_millis(self.config.upstream.connect_delay_ms);
        if !delay.is_zero() {
            tracing::debug!(
                delay_ms = self.config.upstream.connect_delay_ms,
                "waiting for upstream connections"
            );
            tokio::time::sleep(delay).await;
        }

        self.run_with(&mut subscriber, &mut publisher).await
    }

    /// Run over arbitrary transports.
    ///
    /// Returns when the inbound feed closes, SIGINT arrives, or the cancel
    /// token fires. Queued payloads are persisted before returning.
    pub async fn run_with<I, O>(self, inbound: &mut I, outbound: &mut O) -> Result<()>
    where
        I: InboundFeed + ?Sized,
        O: OutboundSink + ?Sized,
    {
        let config = &self.config;
        let cancel = self.cancel.clone();

        // ── 1. Persister ─────────────────────────────────────────
        let mut persister_metrics: Option<Arc<PersisterMetrics>> = None;
        let mut persister_task: Option<JoinHandle<Result<()>>> = None;
        let handle = if config.store.enabled {
            let store: Arc<dyn DocumentStore> = match &self.store {
                Some(store) => store.clone(),
                None => Arc::new(
                    CouchbaseRestStore::new(&config.store)
                        .context("failed to build document store client")?,
                ),
            };
            let (persister, handle) = Persister::new(store, config.store.channel_capacity);
            persister_metrics = Some(persister.metrics());
            persister_task = Some(tokio::spawn(persister.run()));
            tracing::info!(
                uri = %config.store.uri,
                bucket = %config.store.bucket,
                "persistence enabled"
            );
            Some(handle)
        } else {
            tracing::info!("persistence disabled");
            None
        };

        // ── 2. Relay ─────────────────────────────────────────────
        let capacity = resolve_capacity(&config.dedup);
        let mut relay =
            DedupRelay::new(capacity, handle).context("invalid dedup cache capacity")?;
        tracing::info!(
            capacity,
            budget_bytes = ?config.dedup.memory_budget_bytes,
            "dedup cache sized"
        );

        // ── 3. Liveness supervisor ───────────────────────────────
        let supervisor = LivenessSupervisor::from_config(&config.supervisor).map(|s| s.spawn());

        // ── 4. Status server ─────────────────────────────────────
        if config.server.port != 0 {
            let state = Arc::new(StatusState {
                relay: relay.stats(),
                persister: persister_metrics,
                cache_capacity: capacity,
            });
            let port = config.server.port;
            let server_cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = server::run_server(state, port, server_cancel).await {
                    tracing::error!(error = %e, "status server failed");
                }
            });
        }

        // ── Relay loop until shutdown ────────────────────────────
        let result = tokio::select! {
            res = relay.run(inbound, outbound) => res,
            _ = signal::ctrl_c() => {
                tracing::info!("received SIGINT, shutting down");
                Ok(())
            }
            _ = cancel.cancelled() => {
                tracing::info!("cancellation token triggered");
                Ok(())
            }
        };

        cancel.cancel();
        if let Some(task) = supervisor {
            task.abort();
        }

        // Dropping the relay closes the persister channel.
        let stats = relay.stats().snapshot();
        drop(relay);
        if let Some(task) = persister_task {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "persister ended with error"),
                Err(e) => tracing::warn!(error = %e, "persister task panicked"),
            }
        }

        tracing::info!(
            received = stats.received,
            forwarded = stats.forwarded,
            duplicates = stats.duplicates,
            "relay stopped"
        );
        result
    }
}
