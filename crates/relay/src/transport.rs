//! Inbound and outbound publish/subscribe transports.
//!
//! The relay loop only sees the [`InboundFeed`] and [`OutboundSink`] traits.
//! Production uses ZeroMQ SUB/PUB sockets ([`ZmqSubscriber`],
//! [`ZmqPublisher`]); tests and embedders use the channel-backed
//! [`ChannelFeed`] and [`ChannelSink`].

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;
use tracing::{info, warn};
use zeromq::{PubSocket, Socket, SocketRecv, SocketSend, SubSocket, ZmqMessage};

/// Source of raw upstream messages.
#[async_trait]
pub trait InboundFeed: Send {
    /// Wait for the next message.
    ///
    /// `Ok(None)` means the feed is closed for good. Errors are transient:
    /// the caller may keep receiving.
    async fn recv(&mut self) -> Result<Option<Bytes>>;
}

/// Destination for novel messages.
#[async_trait]
pub trait OutboundSink: Send {
    /// Publish `payload` byte-for-byte.
    async fn publish(&mut self, payload: Bytes) -> Result<()>;
}

/// SUB socket connected to every upstream announcer, subscribed to all topics.
pub struct ZmqSubscriber {
    socket: SubSocket,
}

impl ZmqSubscriber {
    /// Connect to each endpoint.
    ///
    /// Unreachable endpoints are logged and skipped; at least one must
    /// connect.
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        if endpoints.is_empty() {
            bail!("no upstream endpoints configured");
        }

        let mut socket = SubSocket::new();
        let mut connected = 0usize;
        for endpoint in endpoints {
            match socket.connect(endpoint).await {
                Ok(()) => {
                    connected += 1;
                    info!(%endpoint, "connected to upstream");
                }
                Err(e) => {
                    warn!(%endpoint, error = %e, "upstream connect failed, skipping");
                }
            }
        }
        if connected == 0 {
            bail!("failed to connect to any of {} upstream endpoints", endpoints.len());
        }

        socket
            .subscribe("")
            .await
            .context("failed to subscribe to all topics")?;

        Ok(Self { socket })
    }
}

#[async_trait]
impl InboundFeed for ZmqSubscriber {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        let msg = self.socket.recv().await.context("zmq receive failed")?;
        Ok(Some(flatten(msg.into_vec())))
    }
}

/// PUB socket that republishes novel messages.
pub struct ZmqPublisher {
    socket: PubSocket,
}

impl ZmqPublisher {
    /// Bind the publisher (e.g. `tcp://0.0.0.0:8050`).
    pub async fn bind(endpoint: &str) -> Result<Self> {
        let mut socket = PubSocket::new();
        let bound = socket
            .bind(endpoint)
            .await
            .with_context(|| format!("failed to bind publisher on {endpoint}"))?;
        info!(endpoint = %bound, "publisher bound");
        Ok(Self { socket })
    }
}

#[async_trait]
impl OutboundSink for ZmqPublisher {
    async fn publish(&mut self, payload: Bytes) -> Result<()> {
        self.socket
            .send(ZmqMessage::from(payload))
            .await
            .context("zmq publish failed")
    }
}

/// Join the frames of a message into one payload.
///
/// Announcers publish single-frame messages, which pass through untouched.
fn flatten(mut frames: Vec<Bytes>) -> Bytes {
    if frames.len() == 1 {
        if let Some(frame) = frames.pop() {
            return frame;
        }
    }
    let total = frames.iter().map(Bytes::len).sum();
    let mut buf = BytesMut::with_capacity(total);
    for frame in &frames {
        buf.extend_from_slice(frame);
    }
    buf.freeze()
}

/// Feed backed by an mpsc channel. Closing every sender closes the feed.
pub struct ChannelFeed {
    rx: mpsc::Receiver<Result<Bytes>>,
}

impl ChannelFeed {
    /// Create a feed and the sender that drives it.
    pub fn new(capacity: usize) -> (mpsc::Sender<Result<Bytes>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx })
    }
}

#[async_trait]
impl InboundFeed for ChannelFeed {
    async fn recv(&mut self) -> Result<Option<Bytes>> {
        match self.rx.recv().await {
            Some(Ok(payload)) => Ok(Some(payload)),
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }
}

/// Sink that hands published payloads to an unbounded channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Bytes>,
}

impl ChannelSink {
    /// Create a sink and the receiver that observes it.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl OutboundSink for ChannelSink {
    async fn publish(&mut self, payload: Bytes) -> Result<()> {
        self.tx
            .send(payload)
            .map_err(|_| anyhow::anyhow!("sink receiver dropped"))
    }
}
