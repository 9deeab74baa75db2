// SPDX-License-Identifier: AGPL-3.0-or-later
//! Subprocess management
//!
//! Every external binary goes through a [`ProcessSupervisor`], so the startup
//! sequence can be exercised without launching real processes.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tracing::{debug, info};

/// What to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    /// Short name used in logs
    pub label: String,
    /// Program to execute
    pub program: OsString,
    /// Arguments, in order
    pub args: Vec<OsString>,
    /// Variables added on top of the inherited environment
    pub env: Vec<(String, String)>,
}

impl ProcessSpec {
    /// Create a spec with no arguments
    pub fn new(label: impl Into<String>, program: impl Into<OsString>) -> Self {
        Self {
            label: label.into(),
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Arguments as lossy strings, for logs and assertions
    pub fn display_args(&self) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }
}

/// Outcome of a process that was run to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    /// Whether the process exited successfully
    pub success: bool,
    /// Exit code, if the process was not killed by a signal
    pub code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
}

impl CommandOutcome {
    /// A successful outcome with empty output
    pub fn ok() -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        }
    }

    /// A failed outcome with the given code and stderr
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Handle on a background process.
///
/// Dropping the handle leaves the process running.
pub struct SpawnedProcess {
    label: String,
    pid: Option<u32>,
    child: Option<Child>,
}

impl SpawnedProcess {
    fn from_child(label: String, child: Child) -> Self {
        Self {
            label,
            pid: child.id(),
            child: Some(child),
        }
    }

    /// A handle with no process behind it, for supervisors that only simulate spawning
    pub fn simulated(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            pid: None,
            child: None,
        }
    }

    /// Label of the spec this process was spawned from
    pub fn label(&self) -> &str {
        &self.label
    }

    /// OS process id, if known
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process to exit. Simulated handles return `None` immediately.
    pub async fn wait(&mut self) -> io::Result<Option<ExitStatus>> {
        match self.child.as_mut() {
            Some(child) => child.wait().await.map(Some),
            None => Ok(None),
        }
    }

    /// Kill the process and reap it
    pub async fn kill(&mut self) -> io::Result<()> {
        if let Some(child) = self.child.as_mut() {
            child.kill().await?;
        }
        Ok(())
    }

    /// Give up the handle; the process keeps running on its own
    pub fn detach(self) {
        debug!(process = %self.label, pid = ?self.pid, "Detached from process");
    }
}

impl fmt::Debug for SpawnedProcess {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("SpawnedProcess")
            .field("label", &self.label)
            .field("pid", &self.pid)
            .field("simulated", &self.child.is_none())
            .finish()
    }
}

/// Launches external binaries
#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    /// Start `spec` in the background and return without waiting
    async fn spawn(&self, spec: &ProcessSpec) -> io::Result<SpawnedProcess>;

    /// Run `spec` to completion, capturing its output
    async fn run(&self, spec: &ProcessSpec) -> io::Result<CommandOutcome>;
}

/// Supervisor backed by real OS processes
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSupervisor;

impl TokioSupervisor {
    /// Create a new supervisor
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessSupervisor for TokioSupervisor {
    async fn spawn(&self, spec: &ProcessSpec) -> io::Result<SpawnedProcess> {
        let mut command = spec.command();
        command.stdin(Stdio::null());

        let child = command.spawn()?;
        let process = SpawnedProcess::from_child(spec.label.clone(), child);
        info!(
            process = %spec.label,
            pid = ?process.pid(),
            args = ?spec.display_args(),
            "Spawned process"
        );
        Ok(process)
    }

    async fn run(&self, spec: &ProcessSpec) -> io::Result<CommandOutcome> {
        let mut command = spec.command();
        command.stdin(Stdio::null());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        info!(process = %spec.label, "Running process");
        let output = command.spawn()?.wait_with_output().await?;

        Ok(CommandOutcome {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
