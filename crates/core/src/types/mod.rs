//! Wire types for EMDR payloads.

pub mod envelope;

pub use envelope::{Envelope, Generator, HistoryRow, OrderRow, ResultType, Row, Rowset, UploadKey};
