// SPDX-License-Identifier: AGPL-3.0-or-later
//! Daemon readiness strategies
//!
//! The tunnel client needs the daemon's control socket. How long to wait for it is
//! a deployment decision, so the wait sits behind [`ReadinessProbe`].

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::ReadinessSettings;
use crate::error::{Result, TailwikiError};

/// Decides when the tunnel daemon can accept client commands
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    /// Return once the daemon behind `socket` is considered ready
    async fn wait_ready(&self, socket: &Path) -> Result<()>;
}

/// Sleep for a fixed interval and assume the daemon is up
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay {
    delay: Duration,
}

impl FixedDelay {
    /// Create a probe sleeping for `delay`
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl ReadinessProbe for FixedDelay {
    async fn wait_ready(&self, _socket: &Path) -> Result<()> {
        debug!(delay_ms = self.delay.as_millis() as u64, "Waiting for daemon to settle");
        sleep(self.delay).await;
        Ok(())
    }
}

/// Poll for the control socket until it appears or the deadline passes.
///
/// Only checks that the path exists, so a socket left by an earlier daemon
/// passes at once. The tunnel bootstrap removes it before spawning.
#[derive(Debug, Clone, Copy)]
pub struct SocketPoll {
    interval: Duration,
    timeout: Duration,
}

impl SocketPoll {
    /// Create a probe checking every `interval` for at most `timeout`
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

#[async_trait]
impl ReadinessProbe for SocketPoll {
    async fn wait_ready(&self, socket: &Path) -> Result<()> {
        let deadline = Instant::now() + self.timeout;
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            if tokio::fs::try_exists(socket).await.unwrap_or(false) {
                info!(socket = %socket.display(), attempts, "Daemon control socket is up");
                return Ok(());
            }

            if Instant::now() >= deadline {
                return Err(TailwikiError::DaemonNotReadyError {
                    message: format!(
                        "control socket {} did not appear within {} ms",
                        socket.display(),
                        self.timeout.as_millis()
                    ),
                });
            }

            sleep(self.interval).await;
        }
    }
}

/// Build the probe selected in the settings
pub fn probe_from_settings(settings: &ReadinessSettings) -> Box<dyn ReadinessProbe> {
    match *settings {
        ReadinessSettings::FixedDelay { delay_ms } => {
            Box::new(FixedDelay::new(Duration::from_millis(delay_ms)))
        }
        ReadinessSettings::PollSocket {
            interval_ms,
            timeout_ms,
        } => Box::new(SocketPoll::new(
            Duration::from_millis(interval_ms),
            Duration::from_millis(timeout_ms),
        )),
    }
}
