// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tunnel bootstrap
//!
//! Brings the Tailscale node up from the last persisted state (or a fresh auth
//! key) and writes the daemon's resulting state back to the store.

use std::fmt;
use std::path::Path;

use tracing::{debug, error, info};

use crate::config::TunnelSettings;
use crate::error::{Result, TailwikiError};
use crate::readiness::ReadinessProbe;
use crate::store::StateStore;
use crate::supervisor::{ProcessSpec, ProcessSupervisor, SpawnedProcess};

/// Progress of a bootstrap run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapPhase {
    /// Nothing has run yet
    Unconfigured,
    /// The state table exists
    SchemaReady,
    /// The latest snapshot was read and, if present, written to the state file
    StateLoaded,
    /// `tailscaled` is running
    DaemonStarted,
    /// `tailscale up` succeeded
    Joined,
    /// The resulting state file matches the latest stored row
    Synced,
    /// A step failed; carries the error message
    Failed(String),
}

impl fmt::Display for BootstrapPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BootstrapPhase::Unconfigured => write!(f, "unconfigured"),
            BootstrapPhase::SchemaReady => write!(f, "schema-ready"),
            BootstrapPhase::StateLoaded => write!(f, "state-loaded"),
            BootstrapPhase::DaemonStarted => write!(f, "daemon-started"),
            BootstrapPhase::Joined => write!(f, "joined"),
            BootstrapPhase::Synced => write!(f, "synced"),
            BootstrapPhase::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of a successful bootstrap
#[derive(Debug)]
pub struct BootstrapReport {
    /// Whether a new snapshot was written to the store
    pub appended: bool,
    /// The running tunnel daemon
    pub daemon: SpawnedProcess,
}

/// Runs the tunnel startup sequence against a state store
pub struct TunnelBootstrapper<'a> {
    settings: &'a TunnelSettings,
    auth_key: Option<&'a str>,
    supervisor: &'a dyn ProcessSupervisor,
    readiness: &'a dyn ReadinessProbe,
}

impl<'a> TunnelBootstrapper<'a> {
    /// Create a bootstrapper. An empty auth key counts as none.
    pub fn new(
        settings: &'a TunnelSettings,
        auth_key: Option<&'a str>,
        supervisor: &'a dyn ProcessSupervisor,
        readiness: &'a dyn ReadinessProbe,
    ) -> Self {
        Self {
            settings,
            auth_key: auth_key.filter(|key| !key.is_empty()),
            supervisor,
            readiness,
        }
    }

    /// `tailscaled --socket <sock> --state <file> --tun <mode>`
    pub fn daemon_spec(&self) -> ProcessSpec {
        ProcessSpec::new("tailscaled", &self.settings.daemon_path)
            .arg("--socket")
            .arg(&self.settings.socket_path)
            .arg("--state")
            .arg(&self.settings.state_file)
            .arg("--tun")
            .arg(&self.settings.tun_mode)
    }

    /// `tailscale --socket <sock> up --hostname <host> [--authkey <key>]`
    pub fn client_spec(&self) -> ProcessSpec {
        let spec = ProcessSpec::new("tailscale", &self.settings.client_path)
            .arg("--socket")
            .arg(&self.settings.socket_path)
            .arg("up")
            .arg("--hostname")
            .arg(&self.settings.hostname);

        match self.auth_key {
            Some(key) => spec.arg("--authkey").arg(key),
            None => spec,
        }
    }

    /// Run the whole sequence. Any error is fatal and leaves the phase at `Failed`.
    pub async fn bootstrap(&self, store: &dyn StateStore) -> Result<BootstrapReport> {
        let mut phase = BootstrapPhase::Unconfigured;

        let result = self.run(store, &mut phase).await;
        match result {
            Ok(report) => Ok(report),
            Err(e) => {
                error!(phase = %phase, error = %e, "Tunnel bootstrap failed");
                advance(&mut phase, BootstrapPhase::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        store: &dyn StateStore,
        phase: &mut BootstrapPhase,
    ) -> Result<BootstrapReport> {
        store.ensure_schema().await?;
        advance(phase, BootstrapPhase::SchemaReady);

        let previous = store.read_latest().await?.unwrap_or_default();
        if !previous.is_empty() {
            write_state_file(&self.settings.state_file, &previous).await?;
            info!(
                path = %self.settings.state_file.display(),
                bytes = previous.len(),
                "Restored persisted tunnel state"
            );
        }
        advance(phase, BootstrapPhase::StateLoaded);

        if self.auth_key.is_none() && previous.is_empty() {
            return Err(TailwikiError::MissingCredentialsError);
        }

        remove_stale_socket(&self.settings.socket_path).await?;

        let daemon = self
            .supervisor
            .spawn(&self.daemon_spec())
            .await
            .map_err(|e| TailwikiError::DaemonStartError {
                message: e.to_string(),
            })?;
        advance(phase, BootstrapPhase::DaemonStarted);

        self.readiness.wait_ready(&self.settings.socket_path).await?;

        self.join().await?;
        advance(phase, BootstrapPhase::Joined);

        let current = read_state_file(&self.settings.state_file).await?;
        let appended = if current.as_bytes() != previous.as_bytes() {
            store.append(&current).await?;
            info!(bytes = current.len(), "Persisted new tunnel state");
            true
        } else {
            debug!("Tunnel state unchanged");
            false
        };
        advance(phase, BootstrapPhase::Synced);

        Ok(BootstrapReport {
            appended,
            daemon,
        })
    }

    async fn join(&self) -> Result<()> {
        let outcome = self
            .supervisor
            .run(&self.client_spec())
            .await
            .map_err(|e| TailwikiError::ClientJoinError {
                message: e.to_string(),
            })?;

        if !outcome.success {
            let code = outcome
                .code
                .map(|code| code.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(TailwikiError::ClientJoinError {
                message: format!("exit status {}: {}", code, outcome.stderr.trim()),
            });
        }

        info!(hostname = %self.settings.hostname, "Node joined tailnet");
        Ok(())
    }
}

fn advance(phase: &mut BootstrapPhase, next: BootstrapPhase) {
    debug!("Tunnel bootstrap: {} -> {}", phase, next);
    *phase = next;
}

/// A socket left behind by an earlier daemon would satisfy the readiness
/// check before the new daemon is listening.
async fn remove_stale_socket(path: &Path) -> Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {
            debug!(path = %path.display(), "Removed stale control socket");
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TailwikiError::DaemonStartError {
            message: format!("cannot remove stale socket {}: {}", path.display(), e),
        }),
    }
}

async fn write_state_file(path: &Path, state: &str) -> Result<()> {
    let to_error = |e: std::io::Error| TailwikiError::StateWriteError {
        path: path.to_path_buf(),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(to_error)?;
    }
    tokio::fs::write(path, state).await.map_err(to_error)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
            .await
            .map_err(to_error)?;
    }

    Ok(())
}

async fn read_state_file(path: &Path) -> Result<String> {
    let to_error = |message: String| TailwikiError::StateReadError {
        path: path.to_path_buf(),
        message,
    };

    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| to_error(e.to_string()))?;
    String::from_utf8(bytes).map_err(|_| to_error("state is not valid UTF-8".to_string()))
}
