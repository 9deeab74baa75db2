// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wiki subprocess launcher

use tracing::info;

use crate::config::WikiSettings;
use crate::error::{Result, TailwikiError};
use crate::supervisor::{ProcessSpec, ProcessSupervisor, SpawnedProcess};

/// Command line for the wiki, with `PORT` pinned so tailnet peers know where it listens.
///
/// Without the override the wiki would pick up the platform's public `PORT`.
pub fn wiki_spec(settings: &WikiSettings) -> ProcessSpec {
    ProcessSpec::new("wiki", &settings.program)
        .args(&settings.args)
        .env("PORT", settings.port.to_string())
}

/// Start the wiki and hand back its handle. The caller decides whether to keep it.
pub async fn launch_wiki(
    settings: &WikiSettings,
    supervisor: &dyn ProcessSupervisor,
) -> Result<SpawnedProcess> {
    let process = supervisor
        .spawn(&wiki_spec(settings))
        .await
        .map_err(|e| TailwikiError::WikiStartError {
            message: e.to_string(),
        })?;

    info!(port = settings.port, pid = ?process.pid(), "Wiki server started");
    Ok(process)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::{CommandOutcome, TokioSupervisor};
    use async_trait::async_trait;
    use std::io;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSupervisor {
        fail: bool,
        spawned: Mutex<Vec<ProcessSpec>>,
    }

    #[async_trait]
    impl ProcessSupervisor for RecordingSupervisor {
        async fn spawn(&self, spec: &ProcessSpec) -> io::Result<SpawnedProcess> {
            if self.fail {
                return Err(io::Error::new(io::ErrorKind::NotFound, "node: not found"));
            }
            self.spawned.lock().unwrap().push(spec.clone());
            Ok(SpawnedProcess::simulated(spec.label.clone()))
        }

        async fn run(&self, _spec: &ProcessSpec) -> io::Result<CommandOutcome> {
            Ok(CommandOutcome::ok())
        }
    }

    #[test]
    fn test_wiki_spec_pins_port() {
        let spec = wiki_spec(&WikiSettings::default());
        assert_eq!(spec.program, "node");
        assert_eq!(spec.display_args(), vec!["/wiki/server"]);
        assert_eq!(spec.env, vec![("PORT".to_string(), "3000".to_string())]);
    }

    #[tokio::test]
    async fn test_launch_wiki_spawns_once() {
        let supervisor = RecordingSupervisor::default();
        let process = launch_wiki(&WikiSettings::default(), &supervisor)
            .await
            .unwrap();

        assert_eq!(process.label(), "wiki");
        assert_eq!(supervisor.spawned.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_launch_failure_is_wiki_start_error() {
        let supervisor = RecordingSupervisor {
            fail: true,
            ..Default::default()
        };
        let result = launch_wiki(&WikiSettings::default(), &supervisor).await;
        assert!(matches!(result, Err(TailwikiError::WikiStartError { .. })));
    }

    #[tokio::test]
    async fn test_launch_real_process_sees_port() {
        let settings = WikiSettings {
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "test \"$PORT\" = 4100".to_string()],
            port: 4100,
        };

        let mut process = launch_wiki(&settings, &TokioSupervisor::new()).await.unwrap();
        let status = process.wait().await.unwrap().unwrap();
        assert!(status.success());
    }
}
