//! Forced periodic restart.
//!
//! Upstream SUB connections can go silent without any error surfacing. The
//! [`LivenessSupervisor`] bounds how long such a stall can last: when its
//! interval elapses it exits the process with status 0, and the external
//! process manager starts a fresh one. Nothing is drained or flushed first;
//! the dedup cache starts empty in the new process.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::info;

use emdr_core::config::SupervisorConfig;

/// Timer that terminates the process when it fires.
#[derive(Debug, Clone)]
pub struct LivenessSupervisor {
    interval: Duration,
}

impl LivenessSupervisor {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// `None` when the configured interval is zero (supervisor disabled).
    pub fn from_config(config: &SupervisorConfig) -> Option<Self> {
        if config.restart_interval_secs == 0 {
            None
        } else {
            Some(Self::new(Duration::from_secs(config.restart_interval_secs)))
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Resolves once the interval has elapsed.
    pub async fn expired(&self) {
        tokio::time::sleep(self.interval).await;
    }

    /// Spawn the timer. When it fires the process exits with status 0.
    pub fn spawn(self) -> JoinHandle<()> {
        info!(interval_secs = self.interval.as_secs(), "liveness supervisor armed");
        tokio::spawn(async move {
            self.expired().await;
            info!("restart interval elapsed, exiting for supervisor restart");
            std::process::exit(0);
        })
    }
}
