//! MCP SSH module providing allowlisted command execution and file transfer on
//! configured hosts.
//!
//! This module is organized into the following submodules:
//!
//! - `registry`: Host configuration and lookup
//! - `policy`: Command allowlist validation
//! - `manager`: One reusable session per host, health checks and reconnects
//! - `executor`: Command execution with inactivity timeouts and output limits
//! - `transfer`: SFTP upload and atomic download
//! - `audit`: Structured audit records with secret redaction
//! - `service`: Request orchestration shared by every tool
//! - `client`: russh connection and authentication logic
//! - `commands`: MCP tool implementations

pub mod audit;
pub(crate) mod auth;
pub(crate) mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub(crate) mod handler;
pub(crate) mod known_hosts;
pub mod logging;
pub mod manager;
pub mod policy;
pub mod registry;
pub(crate) mod schema;
pub mod service;
#[cfg(test)]
pub(crate) mod testing;
pub mod transfer;
pub mod transport;
pub mod types;

pub use commands::McpSshCommands;
