//! # emdr-store
//!
//! The persistence side of the relay: decoding forwarded payloads, picking
//! out rowsets young enough to matter, and upserting them into a document
//! store. Runs off the forwarding path via [`Persister`].

pub mod couchbase;
pub mod document;
pub mod extract;
pub mod persister;
pub mod store;

pub use couchbase::CouchbaseRestStore;
pub use document::{document_key, MarketDocument};
pub use extract::{
    decode_envelope, fresh_documents, ExtractError, FRESHNESS_WINDOW_SECS, MAX_INFLATED_BYTES,
};
pub use persister::{Persister, PersisterHandle, PersisterMetrics, PersisterSnapshot};
pub use store::{DocumentStore, MemoryStore, StoreError};
