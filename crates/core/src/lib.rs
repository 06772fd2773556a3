//! # emdr-core
//!
//! Shared building blocks for the EMDR relay workspace: layered
//! configuration, the logging setup, and the envelope types decoded from
//! compressed market data payloads.

pub mod config;
pub mod logging;
pub mod types;
