// SPDX-License-Identifier: AGPL-3.0-or-later
//! Startup sequence
//!
//! Tunnel first, then the wiki. The public placeholder is bound by the caller
//! only after both succeeded.

use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::readiness::ReadinessProbe;
use crate::store::StateStore;
use crate::supervisor::{ProcessSupervisor, SpawnedProcess};
use crate::tunnel::TunnelBootstrapper;
use crate::wiki::launch_wiki;

/// Background processes started during bring-up
#[derive(Debug)]
pub struct Services {
    /// Tunnel daemon
    pub daemon: SpawnedProcess,
    /// Wiki server
    pub wiki: SpawnedProcess,
    /// Whether the tunnel state changed and was persisted
    pub state_appended: bool,
}

impl Services {
    /// Leave both processes running unsupervised
    pub fn detach(self) {
        self.daemon.detach();
        self.wiki.detach();
    }
}

/// Bootstrap the tunnel against `store`, then launch the wiki.
///
/// The store is closed once the tunnel is synced, before the wiki starts, and
/// also when the bootstrap fails.
pub async fn bring_up(
    config: &Config,
    store: &dyn StateStore,
    supervisor: &dyn ProcessSupervisor,
    readiness: &dyn ReadinessProbe,
) -> Result<Services> {
    let bootstrapper = TunnelBootstrapper::new(
        &config.tunnel,
        config.auth_key.as_deref(),
        supervisor,
        readiness,
    );
    let tunnel = bootstrapper.bootstrap(store).await;
    store.close().await;
    let tunnel = tunnel?;

    let wiki = launch_wiki(&config.wiki, supervisor).await?;

    info!(
        state_appended = tunnel.appended,
        "Tunnel and wiki are up"
    );

    Ok(Services {
        daemon: tunnel.daemon,
        wiki,
        state_appended: tunnel.appended,
    })
}
