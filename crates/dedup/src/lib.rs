//! # emdr-dedup
//!
//! Duplicate suppression primitives for the relay: content [`Fingerprint`]s
//! and the bounded [`LruSet`] that remembers which fingerprints were seen
//! recently. The dedup window is whatever the set's capacity covers at the
//! current message rate; there is no clock-based expiry.

pub mod fingerprint;
pub mod lru;

pub use fingerprint::Fingerprint;
pub use lru::{capacity_for_budget, entry_footprint, LruSet};

use thiserror::Error;

/// Errors raised when building dedup structures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DedupError {
    /// A cache must be able to hold at least one key.
    #[error("cache capacity must be greater than zero")]
    ZeroCapacity,
}
