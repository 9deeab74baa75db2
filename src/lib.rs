// SPDX-License-Identifier: AGPL-3.0-or-later
//! Tailwiki: deployment shim for a tailnet-only wiki
//!
//! On a platform that only offers one public port and an ephemeral filesystem,
//! Tailwiki keeps the wiki private by fronting it with a Tailscale node.
//!
//! # Features
//!
//! * **Persistent node identity:** the daemon's state file is mirrored into PostgreSQL
//!   so a redeployed instance rejoins as the same node without a new auth key
//! * **Wiki launch:** the wiki runs on a fixed internal port reachable over the tailnet
//! * **Health check placeholder:** a one-route HTTP server keeps the public port busy

pub mod config;
pub mod error;
pub mod public;
pub mod readiness;
pub mod startup;
pub mod store;
pub mod supervisor;
pub mod tunnel;
pub mod wiki;

pub use config::{Config, Environment, Settings};
pub use error::{Result, TailwikiError};
pub use startup::{bring_up, Services};
pub use store::{MemoryStateStore, PostgresStateStore, StateStore};
pub use supervisor::{ProcessSupervisor, TokioSupervisor};
