//! Content fingerprints for raw message bytes.
//!
//! A [`Fingerprint`] is the 64-bit xxHash (XXH64, seed 0) of a message. It
//! is not cryptographic: distinct messages can collide, in which case the
//! second one is treated as a duplicate and dropped.

use std::fmt;

/// Seed for all fingerprints. Changing it invalidates nothing persistent,
/// since the cache lives only for the process lifetime.
const SEED: u64 = 0;

/// 64-bit content digest used as the dedup cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// Hash the raw bytes of a message.
    #[inline]
    pub fn of(bytes: &[u8]) -> Self {
        Self(xxhash_rust::xxh64::xxh64(bytes, SEED))
    }

    /// Fixed-width (16 character) lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        format!("{:016x}", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}
