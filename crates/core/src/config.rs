//! Layered configuration for the EMDR relay.
//!
//! Configuration is loaded in layers with increasing priority:
//! 1. Compiled-in defaults (public EMDR announcers, persistence disabled)
//! 2. Configuration file (if provided; TOML or JSON, chosen by extension)
//! 3. Environment variable overrides (prefix `EMDR_RELAY_`, nested with `__`)
//! 4. The document-store password from `EMDR_STORE_PASSWORD`
//!
//! The store password **should** come from the environment, never from a
//! checked-in configuration file.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Env var holding the document-store password.
pub const STORE_PASSWORD_ENV: &str = "EMDR_STORE_PASSWORD";

// ── Default value functions ────────────────────────────────────────────

/// Default settle delay after connecting to upstreams: 1 000 ms.
fn default_connect_delay_ms() -> u64 {
    1_000
}

/// Default dedup cache capacity: 1 000 fingerprints.
fn default_cache_capacity() -> usize {
    1_000
}

/// Default bucket pool name.
fn default_cluster() -> String {
    "default".to_string()
}

/// Default store request timeout: 5 000 ms.
fn default_store_timeout_ms() -> u64 {
    5_000
}

/// Default persister queue depth: 1 024 payloads.
fn default_channel_capacity() -> usize {
    1_024
}

/// Default forced-restart interval: 12 hours.
fn default_restart_interval_secs() -> u64 {
    12 * 3600
}

/// Default status server port.
fn default_server_port() -> u16 {
    8051
}

fn default_json_logs() -> bool {
    true
}

// ── Configuration structs ──────────────────────────────────────────────

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Announcers to subscribe to.
    pub upstream: UpstreamConfig,
    /// Where novel messages are republished.
    pub publisher: PublisherConfig,
    /// Deduplication cache sizing.
    pub dedup: DedupConfig,
    /// Document-store persistence.
    pub store: StoreConfig,
    /// Periodic self-restart.
    pub supervisor: SupervisorConfig,
    /// HTTP status server.
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Upstream announcer subscriptions.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Endpoint addresses (e.g., `tcp://relay-us-central-1.eve-emdr.com:8050`).
    pub endpoints: Vec<String>,
    /// Pause after connecting so subscriptions settle before the loop starts.
    #[serde(default = "default_connect_delay_ms")]
    pub connect_delay_ms: u64,
}

/// Downstream publisher socket.
#[derive(Debug, Clone, Deserialize)]
pub struct PublisherConfig {
    /// Bind address for the PUB socket.
    pub bind: String,
}

/// Dedup cache sizing.
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Maximum number of remembered fingerprints.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    /// Size the cache from a memory budget instead. Overrides
    /// `cache_capacity` when set.
    #[serde(default)]
    pub memory_budget_bytes: Option<usize>,
}

/// Document-store configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Enables decode and upsert of fresh rowsets.
    #[serde(default)]
    pub enabled: bool,
    /// Base URI of the store REST endpoint (e.g., `http://localhost:8091`).
    #[serde(default)]
    pub uri: String,
    /// Pool / cluster name.
    #[serde(default = "default_cluster")]
    pub cluster: String,
    /// Bucket documents are written to.
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub username: String,
    /// Loaded from `EMDR_STORE_PASSWORD`.
    #[serde(default)]
    pub password: String,
    /// Request timeout in milliseconds.
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
    /// Payloads queued for the persister before new ones are dropped.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

/// Forced-restart supervisor.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds between forced exits. `0` disables the supervisor.
    #[serde(default = "default_restart_interval_secs")]
    pub restart_interval_secs: u64,
}

/// HTTP status server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Listen port. `0` disables the server.
    #[serde(default = "default_server_port")]
    pub port: u16,
}

/// Log output format.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// JSON lines when `true`, pretty output otherwise.
    #[serde(default = "default_json_logs")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: default_json_logs(),
        }
    }
}

impl AppConfig {
    /// Load configuration using layered sources.
    ///
    /// 1. Compiled-in defaults.
    /// 2. File at `config_path` (if `Some`).
    /// 3. Environment variable overrides with prefix `EMDR_RELAY_` and `__` as
    ///    the nesting separator (e.g., `EMDR_RELAY_STORE__ENABLED=true`).
    /// 4. Store password from `EMDR_STORE_PASSWORD`.
    ///
    /// The result is validated before being returned.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self> {
        let mut builder = Config::builder()
            // ── Layer 1: compiled-in defaults ───────────────────────
            .set_default(
                "upstream.endpoints",
                vec![
                    "tcp://relay-us-central-1.eve-emdr.com:8050",
                    "tcp://relay-us-east-1.eve-emdr.com:8050",
                ],
            )?
            .set_default("upstream.connect_delay_ms", 1000i64)?
            .set_default("publisher.bind", "tcp://0.0.0.0:8050")?
            .set_default("dedup.cache_capacity", 1000i64)?
            .set_default("store.enabled", false)?
            .set_default("store.uri", "")?
            .set_default("store.cluster", "default")?
            .set_default("store.bucket", "")?
            .set_default("store.username", "")?
            .set_default("store.password", "")?
            .set_default("store.timeout_ms", 5000i64)?
            .set_default("store.channel_capacity", 1024i64)?
            .set_default("supervisor.restart_interval_secs", 43200i64)?
            .set_default("server.port", 8051i64)?
            .set_default("logging.json", true)?;

        // ── Layer 2: config file ───────────────────────────────────
        if let Some(path) = config_path {
            let path_str = path
                .to_str()
                .context("config path is not valid UTF-8")?;
            builder = builder.add_source(File::with_name(path_str).required(true));
        }

        // ── Layer 3: env var overrides (EMDR_RELAY_ prefix) ────────
        // The prefix separator is set to `_` explicitly; otherwise the
        // `config` crate reuses the `__` nesting separator after the prefix.
        builder = builder.add_source(
            Environment::with_prefix("EMDR_RELAY")
                .prefix_separator("_")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("upstream.endpoints")
                .try_parsing(true),
        );

        let mut cfg: AppConfig = builder
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        // ── Layer 4: store password ────────────────────────────────
        if let Ok(v) = std::env::var(STORE_PASSWORD_ENV) {
            cfg.store.password = v;
        }

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate configuration invariants.
    fn validate(&self) -> Result<()> {
        if self.upstream.endpoints.is_empty() {
            bail!("at least one upstream endpoint is required");
        }
        if self.dedup.cache_capacity == 0 {
            bail!("dedup.cache_capacity must be greater than zero");
        }
        if self.dedup.memory_budget_bytes == Some(0) {
            bail!("dedup.memory_budget_bytes must be greater than zero when set");
        }
        if self.store.enabled {
            if self.store.uri.is_empty() {
                bail!("store.uri is required when persistence is enabled");
            }
            if self.store.bucket.is_empty() {
                bail!("store.bucket is required when persistence is enabled");
            }
            if self.store.channel_capacity == 0 {
                bail!("store.channel_capacity must be greater than zero");
            }
        }
        Ok(())
    }
}
