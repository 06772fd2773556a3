//! End-to-end relay behavior over the channel transports.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;
use tokio::sync::mpsc;

use emdr_core::config::{
    AppConfig, DedupConfig, LoggingConfig, PublisherConfig, ServerConfig, StoreConfig,
    SupervisorConfig, UpstreamConfig,
};
use emdr_dedup::{entry_footprint, Fingerprint};
use emdr_relay::{ChannelFeed, ChannelSink, OutboundSink, RelayApp};
use emdr_store::MemoryStore;

fn test_config(cache_capacity: usize, store_enabled: bool) -> AppConfig {
    AppConfig {
        upstream: UpstreamConfig {
            endpoints: vec!["tcp://127.0.0.1:1".into()],
            connect_delay_ms: 0,
        },
        publisher: PublisherConfig {
            bind: "tcp://127.0.0.1:0".into(),
        },
        dedup: DedupConfig {
            cache_capacity,
            memory_budget_bytes: None,
        },
        store: StoreConfig {
            enabled: store_enabled,
            uri: "http://127.0.0.1:1".into(),
            cluster: "default".into(),
            bucket: "emdr".into(),
            username: String::new(),
            password: String::new(),
            timeout_ms: 1000,
            channel_capacity: 64,
        },
        supervisor: SupervisorConfig {
            restart_interval_secs: 0,
        },
        server: ServerConfig { port: 0 },
        logging: LoggingConfig::default(),
    }
}

fn compress(json: &str) -> Bytes {
    let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
    enc.write_all(json.as_bytes()).unwrap();
    Bytes::from(enc.finish().unwrap())
}

fn history_payload(region: u64, type_id: u64, generated_at: chrono::DateTime<Utc>) -> Bytes {
    let json = format!(
        r#"{{
            "resultType": "history",
            "version": "0.1",
            "uploadKeys": [{{"name": "emk", "key": "abc"}}],
            "generator": {{"name": "Test", "version": "1.0"}},
            "currentTime": "{now}",
            "columns": ["date", "orders", "quantity", "low", "high", "average"],
            "rowsets": [{{
                "generatedAt": "{gen}",
                "regionID": {region},
                "typeID": {type_id},
                "rows": [["2011-12-03T00:00:00+00:00", 40, 40, 1999, 499999.99, 35223.50]]
            }}]
        }}"#,
        now = Utc::now().to_rfc3339(),
        gen = generated_at.to_rfc3339(),
    );
    compress(&json)
}

/// Feed everything, close the feed, and run the app to completion.
async fn drive(app: RelayApp, messages: Vec<Result<Bytes>>) -> Vec<Bytes> {
    let (tx, mut feed) = ChannelFeed::new(messages.len().max(1));
    for msg in messages {
        tx.send(msg).await.unwrap();
    }
    drop(tx);

    let (mut sink, mut rx) = ChannelSink::new();
    app.run_with(&mut feed, &mut sink).await.unwrap();
    drop(sink);

    let mut out = Vec::new();
    while let Some(b) = rx.recv().await {
        out.push(b);
    }
    out
}

#[tokio::test]
async fn two_identical_messages_forward_once() {
    let app = RelayApp::new(test_config(1000, false));
    let msg = Bytes::from_static(b"same snapshot");
    let out = drive(app, vec![Ok(msg.clone()), Ok(msg.clone())]).await;
    assert_eq!(out, vec![msg]);
}

#[tokio::test]
async fn forwarded_bytes_are_unmodified() {
    let app = RelayApp::new(test_config(1000, false));
    let payload = history_payload(1, 2, Utc::now());
    let out = drive(app, vec![Ok(payload.clone())]).await;
    assert_eq!(out.len(), 1);
    assert_eq!(out[0], payload);
}

#[tokio::test]
async fn evicted_message_is_forwarded_again() {
    let app = RelayApp::new(test_config(1000, false));
    let mut messages: Vec<Result<Bytes>> = (0..1001)
        .map(|i| Ok(Bytes::from(format!("message-{i}"))))
        .collect();
    messages.push(Ok(Bytes::from("message-0")));

    let out = drive(app, messages).await;
    assert_eq!(out.len(), 1002);
    assert_eq!(out.last().unwrap(), &Bytes::from("message-0"));
}

#[tokio::test]
async fn cached_message_is_not_forwarded_again() {
    let app = RelayApp::new(test_config(1000, false));
    let mut messages: Vec<Result<Bytes>> = (0..1000)
        .map(|i| Ok(Bytes::from(format!("message-{i}"))))
        .collect();
    messages.push(Ok(Bytes::from("message-0")));

    let out = drive(app, messages).await;
    assert_eq!(out.len(), 1000);
}

#[tokio::test]
async fn persistence_disabled_writes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let app = RelayApp::new(test_config(1000, false)).with_store(store.clone());
    let payload = history_payload(10000210, 34, Utc::now() - ChronoDuration::seconds(10));

    let out = drive(app, vec![Ok(payload)]).await;
    assert_eq!(out.len(), 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn persistence_enabled_stores_fresh_history() {
    let store = Arc::new(MemoryStore::new());
    let app = RelayApp::new(test_config(1000, true)).with_store(store.clone());
    let payload = history_payload(10000210, 34, Utc::now() - ChronoDuration::seconds(10));

    let out = drive(app, vec![Ok(payload)]).await;
    assert_eq!(out.len(), 1);
    assert_eq!(store.keys(), vec!["10000210-34-history".to_string()]);

    let doc = store.get("10000210-34-history").unwrap();
    assert_eq!(doc.region, 10000210);
    assert_eq!(doc.item_id, 34);
    assert_eq!(doc.result_type, "history");
}

#[tokio::test]
async fn duplicates_are_persisted_once() {
    let store = Arc::new(MemoryStore::new());
    let app = RelayApp::new(test_config(1000, true)).with_store(store.clone());
    let payload = history_payload(10000002, 34, Utc::now());

    let out = drive(app, vec![Ok(payload.clone()), Ok(payload)]).await;
    assert_eq!(out.len(), 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test]
async fn stale_rowsets_are_not_stored() {
    let store = Arc::new(MemoryStore::new());
    let app = RelayApp::new(test_config(1000, true)).with_store(store.clone());
    let payload = history_payload(10000002, 34, Utc::now() - ChronoDuration::hours(2));

    let out = drive(app, vec![Ok(payload)]).await;
    assert_eq!(out.len(), 1);
    assert!(store.is_empty());
}

#[tokio::test]
async fn corrupt_payload_is_still_forwarded() {
    let store = Arc::new(MemoryStore::new());
    let app = RelayApp::new(test_config(1000, true)).with_store(store.clone());
    let garbage = Bytes::from_static(b"\x00\x01 definitely not zlib");
    let good = history_payload(10000043, 587, Utc::now());

    let out = drive(app, vec![Ok(garbage.clone()), Ok(good)]).await;
    assert_eq!(out.len(), 2);
    assert_eq!(out[0], garbage);
    assert_eq!(store.keys(), vec!["10000043-587-history".to_string()]);
}

#[tokio::test]
async fn receive_errors_do_not_stop_the_relay() {
    let app = RelayApp::new(test_config(1000, false));
    let out = drive(
        app,
        vec![
            Ok(Bytes::from_static(b"first")),
            Err(anyhow::anyhow!("socket hiccup")),
            Ok(Bytes::from_static(b"second")),
        ],
    )
    .await;
    assert_eq!(
        out,
        vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]
    );
}

/// Fails every other publish, recording the ones that succeed.
struct FlakySink {
    calls: usize,
    tx: mpsc::UnboundedSender<Bytes>,
}

#[async_trait]
impl OutboundSink for FlakySink {
    async fn publish(&mut self, payload: Bytes) -> Result<()> {
        self.calls += 1;
        if self.calls % 2 == 1 {
            anyhow::bail!("downstream busy");
        }
        self.tx.send(payload).map_err(|_| anyhow::anyhow!("closed"))
    }
}

#[tokio::test]
async fn publish_failures_do_not_stop_the_relay() {
    let app = RelayApp::new(test_config(1000, false));
    let (tx, mut feed) = ChannelFeed::new(8);
    for i in 0..4 {
        tx.send(Ok(Bytes::from(format!("m{i}")))).await.unwrap();
    }
    drop(tx);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let mut sink = FlakySink { calls: 0, tx: out_tx };
    app.run_with(&mut feed, &mut sink).await.unwrap();
    assert_eq!(sink.calls, 4);
    drop(sink);

    let mut delivered = Vec::new();
    while let Some(b) = out_rx.recv().await {
        delivered.push(b);
    }
    assert_eq!(delivered, vec![Bytes::from("m1"), Bytes::from("m3")]);
}

#[tokio::test]
async fn memory_budget_sizes_the_cache() {
    let mut config = test_config(1000, false);
    config.dedup.memory_budget_bytes = Some(entry_footprint::<Fingerprint>() * 2);
    let app = RelayApp::new(config);

    // With room for two fingerprints, "a" is evicted by "c" and forwarded again.
    let out = drive(
        app,
        ["a", "b", "c", "a"]
            .into_iter()
            .map(|m| Ok(Bytes::from(m)))
            .collect(),
    )
    .await;
    assert_eq!(out.len(), 4);
}

#[tokio::test]
async fn cancel_token_stops_a_live_feed() {
    let app = RelayApp::new(test_config(1000, false));
    let cancel = app.cancel_token();

    let (tx, mut feed) = ChannelFeed::new(4);
    tx.send(Ok(Bytes::from_static(b"only"))).await.unwrap();
    let (mut sink, mut rx) = ChannelSink::new();

    let stopper = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();
    });

    // The sender stays alive, so only the token can end the run.
    app.run_with(&mut feed, &mut sink).await.unwrap();
    stopper.await.unwrap();

    assert_eq!(rx.recv().await, Some(Bytes::from_static(b"only")));
    drop(tx);
}
