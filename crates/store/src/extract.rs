//! Payload decoding and time-window extraction.
//!
//! A forwarded message is a zlib stream wrapping an EMDR [`Envelope`] in
//! JSON. Only rowsets generated within the last [`FRESHNESS_WINDOW_SECS`]
//! are turned into documents; older ones are stale for downstream readers.

use std::io::Read;

use chrono::{DateTime, Duration, Utc};
use flate2::read::ZlibDecoder;
use thiserror::Error;

use emdr_core::types::Envelope;

use crate::document::{document_key, MarketDocument};

/// Maximum rowset age, in seconds, that still gets persisted.
pub const FRESHNESS_WINDOW_SECS: i64 = 3600;

/// Upper bound on an inflated payload. Real envelopes are a few hundred
/// kilobytes at most.
pub const MAX_INFLATED_BYTES: u64 = 32 * 1024 * 1024;

/// Failures while turning raw bytes into an [`Envelope`].
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("zlib decompression failed: {0}")]
    Decompress(#[from] std::io::Error),
    #[error("envelope parse failed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Inflate a zlib stream of at most [`MAX_INFLATED_BYTES`].
pub fn decompress(payload: &[u8]) -> Result<Vec<u8>, ExtractError> {
    decompress_with_limit(payload, MAX_INFLATED_BYTES)
}

/// Inflate a zlib stream, failing once the output would exceed `limit` bytes.
pub fn decompress_with_limit(payload: &[u8], limit: u64) -> Result<Vec<u8>, ExtractError> {
    let mut out = Vec::with_capacity(payload.len() * 4);
    ZlibDecoder::new(payload)
        .take(limit.saturating_add(1))
        .read_to_end(&mut out)?;
    if out.len() as u64 > limit {
        return Err(ExtractError::Decompress(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("inflated payload exceeds {limit} bytes"),
        )));
    }
    Ok(out)
}

/// Decompress and parse a raw message.
pub fn decode_envelope(payload: &[u8]) -> Result<Envelope, ExtractError> {
    let json = decompress(payload)?;
    Ok(serde_json::from_slice(&json)?)
}

/// Build `(key, document)` pairs for every rowset generated at or after
/// `now - FRESHNESS_WINDOW_SECS`.
pub fn fresh_documents(envelope: &Envelope, now: DateTime<Utc>) -> Vec<(String, MarketDocument)> {
    let cutoff = now - Duration::seconds(FRESHNESS_WINDOW_SECS);
    let insert_time = now.timestamp();

    envelope
        .rowsets
        .iter()
        .filter(|rowset| rowset.is_fresh(cutoff))
        .map(|rowset| {
            let key = document_key(rowset.region_id, rowset.type_id, &envelope.result_type);
            let doc = MarketDocument {
                region: rowset.region_id,
                item_id: rowset.type_id,
                insert_time,
                upload_keys: envelope.upload_keys.clone(),
                result_type: envelope.result_type.clone(),
            };
            (key, doc)
        })
        .collect()
}
