//! HTTP status server.
//!
//! Exposes `/health`, `/stats` (JSON), and `/metrics` (Prometheus text) so
//! operators can see forward and duplicate rates without reading logs.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use emdr_store::{PersisterMetrics, PersisterSnapshot};

use crate::relay::{RelaySnapshot, RelayStats};

/// State shared by the status handlers.
pub struct StatusState {
    pub relay: Arc<RelayStats>,
    /// Present only when persistence is enabled.
    pub persister: Option<Arc<PersisterMetrics>>,
    pub cache_capacity: usize,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    relay: RelaySnapshot,
    cache_capacity: usize,
    persister: Option<PersisterSnapshot>,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// `GET /stats`: counters as JSON.
async fn stats_handler(State(state): State<Arc<StatusState>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        relay: state.relay.snapshot(),
        cache_capacity: state.cache_capacity,
        persister: state.persister.as_ref().map(|m| m.snapshot()),
    })
}

/// `GET /metrics`: Prometheus-style text.
async fn metrics_handler(State(state): State<Arc<StatusState>>) -> String {
    let r = state.relay.snapshot();

    let mut out = String::new();
    let mut counter = |name: &str, help: &str, value: u64| {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n"
        ));
    };
    counter("emdr_relay_received_total", "Messages received from upstream", r.received);
    counter("emdr_relay_forwarded_total", "Novel messages republished", r.forwarded);
    counter("emdr_relay_duplicates_total", "Duplicate messages dropped", r.duplicates);
    counter("emdr_relay_receive_errors_total", "Upstream receive errors", r.receive_errors);
    counter("emdr_relay_publish_errors_total", "Downstream publish errors", r.publish_errors);

    if let Some(p) = state.persister.as_ref().map(|m| m.snapshot()) {
        counter("emdr_store_documents_written_total", "Documents upserted", p.documents_written);
        counter(
            "emdr_store_decode_errors_total",
            "Payloads that failed to decode",
            p.decode_errors,
        );
        counter("emdr_store_write_errors_total", "Failed document upserts", p.write_errors);
        counter(
            "emdr_store_payloads_dropped_total",
            "Payloads dropped on a full queue",
            p.payloads_dropped,
        );
    }

    out.push_str(&format!(
        "# HELP emdr_relay_cache_entries Fingerprints currently cached\n\
         # TYPE emdr_relay_cache_entries gauge\n\
         emdr_relay_cache_entries {}\n",
        r.cache_len
    ));
    out
}

/// Build the status router.
pub fn status_router(state: Arc<StatusState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve the status router until `cancel` fires.
pub async fn run_server(
    state: Arc<StatusState>,
    port: u16,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let app = status_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "status server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await?;

    Ok(())
}
