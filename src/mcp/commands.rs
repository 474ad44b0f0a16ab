//! MCP SSH Commands implementation.
//!
//! This module exposes the configured hosts as MCP tools:
//!
//! - `list_hosts`: Configured hosts, their status and command restrictions
//! - `ssh_execute`: Run one command on a host
//! - `ssh_execute_batch`: Run several commands in order on a host
//! - `ssh_upload`: Copy a local file to a host
//! - `ssh_download`: Copy a file from a host
//! - `ssh_status`: Check (and establish) connectivity to a host
//! - `ssh_disconnect`: Close a host's session
//!
//! Errors are returned as `"[kind] reason"` strings, where `kind` is one of the
//! [`ErrorKind`](crate::mcp::error::ErrorKind) values.

use std::sync::Arc;

use poem_mcpserver::{Tools, content::Text, tool::StructuredContent};
use tracing::info;

use super::error::SshError;
use super::service::SshService;
use super::types::{BatchResult, CommandResult, HostListResponse, HostStatus, TransferResult};

fn tool_error(err: SshError) -> String {
    err.to_tool_message()
}

/// MCP SSH Commands tool implementation.
///
/// Cheap to clone; every MCP session gets its own instance over the same service.
#[derive(Clone)]
pub struct McpSshCommands {
    service: Arc<SshService>,
}

impl McpSshCommands {
    pub fn new(service: Arc<SshService>) -> Self {
        Self { service }
    }
}

#[Tools]
impl McpSshCommands {
    /// List all configured SSH hosts and their connection status.
    ///
    /// Returns name, hostname, port, username, connection status and any command
    /// restrictions for every host. Call this first to discover available hosts.
    async fn list_hosts(&self) -> StructuredContent<HostListResponse> {
        StructuredContent(self.service.list_hosts())
    }

    /// Execute a shell command on a configured SSH host.
    ///
    /// The session to the host is opened on first use and reused afterwards. The
    /// command times out after the host's `command_timeout` seconds without any
    /// output; commands that keep printing may run longer. Hosts with an allowlist
    /// reject pipes, chaining, redirection, quotes and unlisted programs.
    async fn ssh_execute(
        &self,
        /// Name of the configured SSH host (from list_hosts)
        host: String,
        /// The shell command to execute on the remote host
        command: String,
    ) -> Result<StructuredContent<CommandResult>, String> {
        self.service
            .execute(&host, &command)
            .await
            .map(StructuredContent)
            .map_err(tool_error)
    }

    /// Execute multiple commands sequentially on a configured SSH host.
    ///
    /// Every command is checked against the host's allowlist before the first one
    /// runs. With `stop_on_error` (default true) the batch stops at the first
    /// non-zero exit, timeout or error; `stopped` tells where and why.
    async fn ssh_execute_batch(
        &self,
        /// Name of the configured SSH host
        host: String,
        /// Commands to execute in order
        commands: Vec<String>,
        /// Stop after the first failing command (default: true)
        stop_on_error: Option<bool>,
    ) -> Result<StructuredContent<BatchResult>, String> {
        self.service
            .execute_batch(&host, &commands, stop_on_error.unwrap_or(true))
            .await
            .map(StructuredContent)
            .map_err(tool_error)
    }

    /// Upload a local file to a configured SSH host via SFTP.
    async fn ssh_upload(
        &self,
        /// Name of the configured SSH host
        host: String,
        /// Path of the local file to upload (`~` is expanded)
        local_path: String,
        /// Destination path on the remote host
        remote_path: String,
    ) -> Result<StructuredContent<TransferResult>, String> {
        self.service
            .upload(&host, &local_path, &remote_path)
            .await
            .map(StructuredContent)
            .map_err(tool_error)
    }

    /// Download a file from a configured SSH host via SFTP.
    ///
    /// The local file is only replaced once the whole file has arrived; a failed
    /// download leaves no partial file behind. Missing local directories are created.
    async fn ssh_download(
        &self,
        /// Name of the configured SSH host
        host: String,
        /// Path of the file on the remote host
        remote_path: String,
        /// Local destination path (`~` is expanded)
        local_path: String,
    ) -> Result<StructuredContent<TransferResult>, String> {
        self.service
            .download(&host, &remote_path, &local_path)
            .await
            .map(StructuredContent)
            .map_err(tool_error)
    }

    /// Check connectivity to a configured SSH host.
    ///
    /// Probes an open session, or connects if none is open. `healthy` reports the
    /// result; failures are described in `last_error`.
    async fn ssh_status(
        &self,
        /// Name of the configured SSH host
        host: String,
    ) -> Result<StructuredContent<HostStatus>, String> {
        self.service
            .status(&host)
            .await
            .map(StructuredContent)
            .map_err(tool_error)
    }

    /// Disconnect from a configured SSH host.
    ///
    /// Safe to call when no session is open. The next command reconnects.
    async fn ssh_disconnect(
        &self,
        /// Name of the configured SSH host
        host: String,
    ) -> Result<Text<String>, String> {
        info!("Disconnecting SSH host: {}", host);
        let response = self.service.disconnect(&host).await.map_err(tool_error)?;
        Ok(Text(response.message))
    }
}
