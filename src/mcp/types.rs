//! Serializable response types for MCP SSH tools.
//!
//! All types implement `Serialize`, `Deserialize`, and `JsonSchema` for proper
//! MCP protocol compatibility. Unsigned counters use [`crate::mcp::schema::uint`] so the
//! generated schemas carry no Rust-specific formats.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::mcp::error::ErrorKind;
use crate::mcp::manager::SessionStatus;

/// Outcome of one remote command.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct CommandResult {
    pub command: String,
    /// Remote exit status, -1 when the server reported none
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Wall-clock duration in milliseconds
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub duration_ms: u64,
    /// Whether stdout or stderr exceeded the capture limit and was cut short
    #[serde(default)]
    pub truncated: bool,
}

/// Why a batch stopped before its last command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BatchStopReason {
    NonZeroExit { exit_code: i32 },
    Timeout,
    Error { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BatchStop {
    /// Zero-based index of the command that stopped the batch
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub index: usize,
    #[serde(flatten)]
    pub reason: BatchStopReason,
}

/// Result of one batch entry: the command ran, or it failed before producing a result.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BatchEntry {
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<CommandResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct BatchResult {
    pub host: String,
    /// Entries for the commands that were attempted, in order
    pub results: Vec<BatchEntry>,
    /// True when every attempted command exited 0 and none failed
    pub success: bool,
    /// Where and why the batch stopped early
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped: Option<BatchStop>,
}

/// Response from ssh_upload and ssh_download
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransferResult {
    pub host: String,
    pub local_path: String,
    pub remote_path: String,
    /// Bytes copied
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub bytes: u64,
}

/// Response from ssh_status
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HostStatus {
    pub host: String,
    pub status: SessionStatus,
    /// Whether a liveness probe succeeded during this check
    pub healthy: bool,
    /// Transports opened for this host since startup
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub connects: u64,
    /// Seconds since the session was last used
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// One configured host as shown by list_hosts. Never includes credentials.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct HostSummary {
    pub name: String,
    pub hostname: String,
    pub username: String,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub port: u16,
    /// `key` or `password`
    pub auth_method: String,
    pub status: SessionStatus,
    /// Commands permitted on this host; absent when unrestricted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_commands: Option<Vec<String>>,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub command_timeout_secs: u64,
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub transfer_timeout_secs: u64,
}

/// Response from list_hosts
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HostListResponse {
    pub hosts: Vec<HostSummary>,
    /// Total number of configured hosts
    #[schemars(schema_with = "crate::mcp::schema::uint")]
    pub count: usize,
}

/// Response from ssh_disconnect
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DisconnectResponse {
    pub host: String,
    /// Whether an open session was closed
    pub closed: bool,
    pub message: String,
}
