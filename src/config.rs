// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration management for tailwiki
//!
//! Three sources feed one immutable [`Config`]: an optional TOML settings file,
//! a snapshot of the process environment, and the command line flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use crate::error::{Result, TailwikiError};

/// Name greeted by the public placeholder page when `--name` is not given
pub const DEFAULT_GREETING_NAME: &str = "visitor";

/// Public bind address when neither `--public` nor `PORT` is given
pub const DEFAULT_PUBLIC_ADDR: &str = ":80";

/// Accepted values of `logging.format`
pub const LOG_FORMATS: [&str; 2] = ["text", "json"];

/// File-backed settings. Every key has a default, so an empty file is valid.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Tunnel daemon and client settings
    #[serde(default)]
    pub tunnel: TunnelSettings,

    /// Wiki subprocess settings
    #[serde(default)]
    pub wiki: WikiSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the tunnel binaries live and how they are wired together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelSettings {
    /// Path to the `tailscaled` binary
    #[serde(default = "default_daemon_path")]
    pub daemon_path: PathBuf,

    /// Path to the `tailscale` binary
    #[serde(default = "default_client_path")]
    pub client_path: PathBuf,

    /// Local state file handed to the daemon
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// Control socket shared by daemon and client
    #[serde(default = "default_socket_path")]
    pub socket_path: PathBuf,

    /// Hostname the node registers under
    #[serde(default = "default_tunnel_hostname")]
    pub hostname: String,

    /// Value passed to the daemon's `--tun` flag
    #[serde(default = "default_tun_mode")]
    pub tun_mode: String,

    /// How to decide the daemon is ready for the client
    #[serde(default)]
    pub readiness: ReadinessSettings,
}

/// Strategy used between daemon spawn and client invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum ReadinessSettings {
    /// Sleep for a fixed interval
    FixedDelay {
        #[serde(default = "default_settle_ms")]
        delay_ms: u64,
    },

    /// Poll until the control socket exists, up to a deadline
    PollSocket {
        #[serde(default = "default_poll_interval_ms")]
        interval_ms: u64,
        #[serde(default = "default_poll_timeout_ms")]
        timeout_ms: u64,
    },
}

/// Wiki subprocess command line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WikiSettings {
    /// Program to execute
    #[serde(default = "default_wiki_program")]
    pub program: String,

    /// Arguments passed to the program
    #[serde(default = "default_wiki_args")]
    pub args: Vec<String>,

    /// Port forced through the `PORT` variable
    #[serde(default = "default_wiki_port")]
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `EnvFilter` directives, e.g. `info` or `tailwiki=debug,sqlx=warn`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            daemon_path: default_daemon_path(),
            client_path: default_client_path(),
            state_file: default_state_file(),
            socket_path: default_socket_path(),
            hostname: default_tunnel_hostname(),
            tun_mode: default_tun_mode(),
            readiness: ReadinessSettings::default(),
        }
    }
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        ReadinessSettings::FixedDelay {
            delay_ms: default_settle_ms(),
        }
    }
}

impl Default for WikiSettings {
    fn default() -> Self {
        Self {
            program: default_wiki_program(),
            args: default_wiki_args(),
            port: default_wiki_port(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the settings file
    ///
    /// # Returns
    ///
    /// The parsed and validated settings or an error
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(TailwikiError::ConfigNotFound {
                path: path.display().to_string(),
            });
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&contents)?;

        settings.validate()?;
        Ok(settings)
    }

    /// Load from `path` when one was given, otherwise use defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Validate the settings
    pub fn validate(&self) -> Result<()> {
        let tunnel = &self.tunnel;
        for (key, value) in [
            ("tunnel.daemon_path", &tunnel.daemon_path),
            ("tunnel.client_path", &tunnel.client_path),
            ("tunnel.state_file", &tunnel.state_file),
            ("tunnel.socket_path", &tunnel.socket_path),
        ] {
            if value.as_os_str().is_empty() {
                return Err(invalid(format!("{} cannot be empty", key)));
            }
        }

        if tunnel.hostname.trim().is_empty() {
            return Err(invalid("tunnel.hostname cannot be empty"));
        }

        if tunnel.tun_mode.trim().is_empty() {
            return Err(invalid("tunnel.tun_mode cannot be empty"));
        }

        if let ReadinessSettings::PollSocket { interval_ms, .. } = tunnel.readiness {
            if interval_ms == 0 {
                return Err(invalid("tunnel.readiness.interval_ms must be > 0"));
            }
        }

        if self.wiki.program.trim().is_empty() {
            return Err(invalid("wiki.program cannot be empty"));
        }

        if self.wiki.port == 0 {
            return Err(invalid("wiki.port must be > 0"));
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(invalid(format!(
                "logging.format must be one of {:?}, got {:?}",
                LOG_FORMATS, self.logging.format
            )));
        }

        if self.logging.level.trim().is_empty() {
            return Err(invalid("logging.level cannot be empty"));
        }
        EnvFilter::try_new(&self.logging.level)
            .map_err(|e| invalid(format!("logging.level is not a valid filter: {}", e)))?;

        Ok(())
    }
}

/// Snapshot of the environment variables tailwiki reads.
///
/// Empty values count as unset.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    /// `DATABASE_URL`
    pub database_url: Option<String>,
    /// `TAILSCALE_AUTHKEY`
    pub auth_key: Option<String>,
    /// `PORT`
    pub port: Option<String>,
}

impl Environment {
    /// Capture the current process environment
    pub fn from_process() -> Self {
        Self {
            database_url: non_empty_var("DATABASE_URL"),
            auth_key: non_empty_var("TAILSCALE_AUTHKEY"),
            port: non_empty_var("PORT"),
        }
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

/// Public placeholder server configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicConfig {
    /// Name greeted on the landing page
    pub greeting_name: String,
    /// Go-style bind address, e.g. `:80` or `127.0.0.1:8080`
    pub bind_addr: String,
}

/// Fully resolved, read-only configuration handed to every component
#[derive(Clone)]
pub struct Config {
    /// Connection string with `sslmode` applied
    pub database_url: String,
    /// Tailnet auth key, if supplied
    pub auth_key: Option<String>,
    /// Public placeholder server
    pub public: PublicConfig,
    /// Tunnel settings
    pub tunnel: TunnelSettings,
    /// Wiki settings
    pub wiki: WikiSettings,
}

impl Config {
    /// Combine the three configuration sources.
    ///
    /// Fails with [`TailwikiError::ConfigError`] when `DATABASE_URL` is missing or
    /// `PORT` is not a valid port number.
    pub fn resolve(
        settings: Settings,
        env: Environment,
        greeting_name: impl Into<String>,
        public_addr: impl Into<String>,
    ) -> Result<Self> {
        let database_url = env
            .database_url
            .filter(|url| !url.is_empty())
            .ok_or_else(|| invalid("DATABASE_URL is not set"))?;

        let public_addr: String = public_addr.into();
        let bind_addr = public_bind_addr(&public_addr, env.port.as_deref())?;

        Ok(Self {
            database_url: with_sslmode(&database_url),
            auth_key: env.auth_key.filter(|key| !key.is_empty()),
            public: PublicConfig {
                greeting_name: greeting_name.into(),
                bind_addr,
            },
            tunnel: settings.tunnel,
            wiki: settings.wiki,
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Config")
            .field("database_url", &"<redacted>")
            .field("auth_key", &self.auth_key.as_ref().map(|_| "<redacted>"))
            .field("public", &self.public)
            .field("tunnel", &self.tunnel)
            .field("wiki", &self.wiki)
            .finish()
    }
}

/// Require TLS on the database connection unless the URL already picks a mode
pub fn with_sslmode(database_url: &str) -> String {
    if database_url.contains("sslmode=") {
        return database_url.to_string();
    }
    let separator = if database_url.contains('?') { '&' } else { '?' };
    format!("{}{}sslmode=require", database_url, separator)
}

/// The platform-assigned `PORT` wins over the `--public` flag
pub fn public_bind_addr(flag: &str, port: Option<&str>) -> Result<String> {
    match port {
        Some(port) => {
            port.parse::<u16>()
                .map_err(|_| invalid(format!("PORT is not a valid port number: {:?}", port)))?;
            Ok(format!(":{}", port))
        }
        None => Ok(flag.to_string()),
    }
}

fn invalid(message: impl Into<String>) -> TailwikiError {
    TailwikiError::ConfigError {
        message: message.into(),
    }
}

// Default value functions

fn default_daemon_path() -> PathBuf {
    PathBuf::from("/app/tailscaled")
}

fn default_client_path() -> PathBuf {
    PathBuf::from("/app/tailscale")
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/wiki/ts.state")
}

fn default_socket_path() -> PathBuf {
    PathBuf::from("/wiki/ts.sock")
}

fn default_tunnel_hostname() -> String {
    "wiki-server".to_string()
}

fn default_tun_mode() -> String {
    "userspace-networking".to_string()
}

fn default_settle_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_poll_timeout_ms() -> u64 {
    10_000
}

fn default_wiki_program() -> String {
    "node".to_string()
}

fn default_wiki_args() -> Vec<String> {
    vec!["/wiki/server".to_string()]
}

fn default_wiki_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}
