// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for tailwiki

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for tailwiki operations
pub type Result<T> = std::result::Result<T, TailwikiError>;

/// Errors that can occur while bringing the deployment up.
///
/// Every variant is fatal at startup; nothing is retried.
#[derive(Error, Debug)]
pub enum TailwikiError {
    /// Required configuration missing or malformed
    #[error("Invalid configuration: {message}")]
    ConfigError { message: String },

    /// Settings file named on the command line does not exist
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// State table could not be created
    #[error("Failed to create tailscale_data table: {message}")]
    SchemaError { message: String },

    /// Latest state could not be read from the database
    #[error("Failed to read state from database: {message}")]
    ReadError { message: String },

    /// New state snapshot could not be inserted
    #[error("Failed to update state in database: {message}")]
    WriteError { message: String },

    /// Neither an auth key nor a persisted state is available
    #[error("TAILSCALE_AUTHKEY or a persisted state must be present")]
    MissingCredentialsError,

    /// Tunnel daemon could not be spawned
    #[error("Failed to start tunnel daemon: {message}")]
    DaemonStartError { message: String },

    /// Tunnel daemon never exposed its control socket
    #[error("Tunnel daemon not ready: {message}")]
    DaemonNotReadyError { message: String },

    /// Tunnel client failed to bring the node up
    #[error("Failed to join tailnet: {message}")]
    ClientJoinError { message: String },

    /// Local state file could not be read after joining
    #[error("Failed to read state file {}: {message}", .path.display())]
    StateReadError { path: PathBuf, message: String },

    /// Local state file could not be materialized
    #[error("Failed to write state file {}: {message}", .path.display())]
    StateWriteError { path: PathBuf, message: String },

    /// Wiki subprocess could not be spawned
    #[error("Failed to start wiki server: {message}")]
    WikiStartError { message: String },

    /// Public listener could not bind
    #[error("Failed to bind public listener on {addr}: {message}")]
    BindError { addr: String, message: String },

    /// Public listener stopped with an error
    #[error("Public server error: {message}")]
    ServeError { message: String },

    /// IO error wrapper
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),
}
