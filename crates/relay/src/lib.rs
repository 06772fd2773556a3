//! # emdr-relay
//!
//! Deduplicating relay between upstream EMDR announcers and one downstream
//! PUB endpoint. Each distinct payload is forwarded once; re-announcements
//! are dropped while their fingerprint is still cached.

pub mod app;
pub mod relay;
pub mod server;
pub mod supervisor;
pub mod transport;

pub use app::RelayApp;
pub use relay::{resolve_capacity, DedupRelay, ReceiveBackoff, RelaySnapshot, RelayStats, Verdict};
pub use supervisor::LivenessSupervisor;
pub use transport::{ChannelFeed, ChannelSink, InboundFeed, OutboundSink};
