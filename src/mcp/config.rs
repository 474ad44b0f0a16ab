//! Configuration for the SSH MCP server.
//!
//! Two sources feed the server:
//!
//! - **Host configuration file** (JSON): the host registry plus logging, audit and
//!   known-hosts settings. Located by [`find_config`] and read by [`load_config`].
//! - **Runtime knobs**: resolved with a three-tier priority system:
//!
//! 1. **Parameter** - Explicitly provided function parameter (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `MCP_SSH_CONFIG` | - | Path of the host configuration file |
//! | `MCP_SSH_CONNECT_TIMEOUT` | 15s | Connection and authentication timeout in seconds |
//! | `MCP_SSH_HEALTH_CHECK_TIMEOUT` | 5s | Liveness probe timeout for reused sessions |
//! | `MCP_SSH_RECONNECT_RETRIES` | 0 | Extra backoff attempts after a failed reconnect |
//! | `MCP_SSH_RETRY_DELAY_MS` | 1000ms | Initial reconnect backoff in milliseconds |
//! | `MCP_SSH_MAX_OUTPUT_BYTES` | 10 MiB | Captured bytes per output stream |
//! | `MCP_SSH_COMPRESSION` | true | Enable zlib compression |
//! | `MCP_PORT` | 8000 | HTTP listen port of the `mcp-ssh` binary |
//!
//! # Configuration File
//!
//! ```json
//! {
//!   "hosts": [
//!     { "name": "web", "hostname": "10.0.0.5", "username": "deploy",
//!       "identity_file": "~/.ssh/id_ed25519", "allowed_commands": ["uptime", "df"] }
//!   ],
//!   "log_level": "INFO",
//!   "audit_log_file": "/var/log/mcp-ssh/audit.jsonl",
//!   "known_hosts_file": null,
//!   "trust_on_first_use": false
//! }
//! ```
//!
//! The file is searched in order: `--config <path>`, `MCP_SSH_CONFIG`, `./hosts.json`,
//! `~/.ssh/mcp-hosts.json`.

use std::env;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::{Level, info, warn};

use crate::mcp::error::ConfigError;
use crate::mcp::registry::{HostEntry, HostRegistry, expand_home};

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default liveness probe timeout in seconds
pub(crate) const DEFAULT_HEALTH_CHECK_TIMEOUT_SECS: u64 = 5;

/// Default number of backoff attempts after a failed reconnect
pub(crate) const DEFAULT_RECONNECT_RETRIES: u32 = 0;

/// Default retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry delay cap in seconds (10 seconds)
pub(crate) const MAX_RETRY_DELAY_SECS: u64 = 10;

pub(crate) const MAX_RETRY_DELAY: Duration = Duration::from_secs(MAX_RETRY_DELAY_SECS);

/// Default capture limit per output stream (10 MiB)
pub(crate) const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Default HTTP port
pub(crate) const DEFAULT_HTTP_PORT: u16 = 8000;

pub(crate) const CONFIG_ENV_VAR: &str = "MCP_SSH_CONFIG";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "MCP_SSH_CONNECT_TIMEOUT";
pub(crate) const HEALTH_CHECK_TIMEOUT_ENV_VAR: &str = "MCP_SSH_HEALTH_CHECK_TIMEOUT";
pub(crate) const RECONNECT_RETRIES_ENV_VAR: &str = "MCP_SSH_RECONNECT_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "MCP_SSH_RETRY_DELAY_MS";
pub(crate) const MAX_OUTPUT_BYTES_ENV_VAR: &str = "MCP_SSH_MAX_OUTPUT_BYTES";
pub(crate) const COMPRESSION_ENV_VAR: &str = "MCP_SSH_COMPRESSION";
pub(crate) const PORT_ENV_VAR: &str = "MCP_PORT";

/// Config file names searched after the explicit path and the environment variable.
const LOCAL_CONFIG_FILE: &str = "hosts.json";
const HOME_CONFIG_FILE: &str = ".ssh/mcp-hosts.json";

fn env_value<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

/// Resolve the connection timeout value with priority: parameter -> env var -> default
pub(crate) fn resolve_connect_timeout(timeout_param: Option<u64>) -> u64 {
    // Priority 1: Use parameter if provided
    if let Some(timeout) = timeout_param {
        return timeout;
    }

    // Priority 2: Use environment variable if set
    if let Some(timeout) = env_value::<u64>(CONNECT_TIMEOUT_ENV_VAR)
        && timeout > 0
    {
        return timeout;
    }

    // Priority 3: Default value
    DEFAULT_CONNECT_TIMEOUT_SECS
}

/// Resolve the health check timeout with priority: parameter -> env var -> default
pub(crate) fn resolve_health_check_timeout(timeout_param: Option<u64>) -> u64 {
    if let Some(timeout) = timeout_param {
        return timeout;
    }

    if let Some(timeout) = env_value::<u64>(HEALTH_CHECK_TIMEOUT_ENV_VAR)
        && timeout > 0
    {
        return timeout;
    }

    DEFAULT_HEALTH_CHECK_TIMEOUT_SECS
}

/// Resolve the reconnect retries with priority: parameter -> env var -> default
pub(crate) fn resolve_reconnect_retries(retries_param: Option<u32>) -> u32 {
    retries_param
        .or_else(|| env_value(RECONNECT_RETRIES_ENV_VAR))
        .unwrap_or(DEFAULT_RECONNECT_RETRIES)
}

/// Resolve the retry delay value with priority: parameter -> env var -> default
pub(crate) fn resolve_retry_delay_ms(retry_delay_param: Option<u64>) -> u64 {
    retry_delay_param
        .or_else(|| env_value(RETRY_DELAY_MS_ENV_VAR))
        .unwrap_or(DEFAULT_RETRY_DELAY_MS)
}

/// Resolve the per-stream output limit with priority: parameter -> env var -> default
pub(crate) fn resolve_max_output_bytes(max_param: Option<usize>) -> usize {
    if let Some(max) = max_param {
        return max;
    }

    if let Some(max) = env_value::<usize>(MAX_OUTPUT_BYTES_ENV_VAR)
        && max > 0
    {
        return max;
    }

    DEFAULT_MAX_OUTPUT_BYTES
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub(crate) fn resolve_compression(compress_param: Option<bool>) -> bool {
    // Priority 1: Use parameter if provided
    if let Some(compress) = compress_param {
        return compress;
    }

    // Priority 2: Use environment variable if set
    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    // Priority 3: Default value (enabled)
    true
}

/// Resolve the HTTP port with priority: parameter -> env var -> default
pub fn resolve_port(port_param: Option<u16>) -> u16 {
    port_param
        .or_else(|| env_value(PORT_ENV_VAR))
        .unwrap_or(DEFAULT_HTTP_PORT)
}

/// Runtime knobs, resolved once at startup.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub connect_timeout: Duration,
    pub health_check_timeout: Duration,
    pub reconnect_retries: u32,
    pub retry_delay: Duration,
    pub max_output_bytes: usize,
    pub compression: bool,
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        Self {
            connect_timeout: Duration::from_secs(resolve_connect_timeout(None)),
            health_check_timeout: Duration::from_secs(resolve_health_check_timeout(None)),
            reconnect_retries: resolve_reconnect_retries(None),
            retry_delay: Duration::from_millis(resolve_retry_delay_ms(None)),
            max_output_bytes: resolve_max_output_bytes(None),
            compression: resolve_compression(None),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            health_check_timeout: Duration::from_secs(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS),
            reconnect_retries: DEFAULT_RECONNECT_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            compression: true,
        }
    }
}

/// The configuration file as written on disk.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    hosts: Vec<HostEntry>,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    audit_log_file: Option<String>,
    #[serde(default)]
    known_hosts_file: Option<String>,
    #[serde(default)]
    trust_on_first_use: bool,
}

/// Validated server configuration.
#[derive(Debug)]
pub struct ServerConfig {
    pub registry: HostRegistry,
    pub log_level: Level,
    pub audit_log_file: Option<PathBuf>,
    pub known_hosts_file: Option<PathBuf>,
    pub trust_on_first_use: bool,
}

impl ServerConfig {
    /// Parse and validate configuration JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_json::from_str(json)?;
        let log_level = match file.log_level.as_deref() {
            Some(level) => parse_log_level(level)?,
            None => Level::INFO,
        };
        let registry = HostRegistry::from_entries(file.hosts)?;

        Ok(Self {
            registry,
            log_level,
            audit_log_file: file.audit_log_file.as_deref().map(expand_home),
            known_hosts_file: file.known_hosts_file.as_deref().map(expand_home),
            trust_on_first_use: file.trust_on_first_use,
        })
    }
}

/// Map a configured level name to a tracing level. `CRITICAL` maps to `ERROR`.
pub fn parse_log_level(level: &str) -> Result<Level, ConfigError> {
    match level.trim().to_ascii_uppercase().as_str() {
        "DEBUG" => Ok(Level::DEBUG),
        "INFO" => Ok(Level::INFO),
        "WARNING" | "WARN" => Ok(Level::WARN),
        "ERROR" | "CRITICAL" => Ok(Level::ERROR),
        other => Err(ConfigError::Invalid(format!(
            "log_level must be one of DEBUG, INFO, WARNING, ERROR, CRITICAL (got '{}')",
            other
        ))),
    }
}

/// Locate the configuration file.
///
/// An explicit path or `MCP_SSH_CONFIG` must exist; the fallback locations are only
/// used when neither is given.
pub fn find_config(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return existing(path.to_path_buf());
    }

    if let Ok(path) = env::var(CONFIG_ENV_VAR)
        && !path.trim().is_empty()
    {
        return existing(expand_home(path.trim()));
    }

    let mut candidates = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(HOME_CONFIG_FILE));
    }

    candidates
        .iter()
        .find(|p| p.is_file())
        .cloned()
        .ok_or_else(|| {
            ConfigError::NotFound(format!(
                "none of {} exist; pass --config or set {}",
                candidates
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect::<Vec<_>>()
                    .join(", "),
                CONFIG_ENV_VAR
            ))
        })
}

/// Value of `--config <path>` or `--config=<path>` in the process arguments.
pub fn config_path_from_args(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            return iter.next().map(|p| expand_home(p));
        }
        if let Some(path) = arg.strip_prefix("--config=") {
            return Some(expand_home(path));
        }
    }
    None
}

fn existing(path: PathBuf) -> Result<PathBuf, ConfigError> {
    if path.is_file() {
        Ok(path)
    } else {
        Err(ConfigError::NotFound(path.display().to_string()))
    }
}

/// Read, permission-check and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<ServerConfig, ConfigError> {
    warn_if_exposed(path);
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let config = ServerConfig::from_json(&json)?;
    info!(
        "Loaded {} host(s) from {}",
        config.registry.len(),
        path.display()
    );
    Ok(config)
}

/// The file may hold passwords; warn when anyone but the owner can read it.
#[cfg(unix)]
fn warn_if_exposed(path: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if readable_by_others(mode) {
            warn!(
                "Config file {} is readable by group or others (mode {:o}); consider chmod 600",
                path.display(),
                mode & 0o777
            );
        }
    }
}

#[cfg(not(unix))]
fn warn_if_exposed(_path: &Path) {}

/// Group or other read bit set.
#[cfg_attr(not(unix), allow(dead_code))]
fn readable_by_others(mode: u32) -> bool {
    mode & 0o044 != 0
}
