//! Host registry: the immutable, validated set of hosts the server may reach.
//!
//! Raw entries come from the configuration file as [`HostEntry`] values. They are
//! validated exactly once by [`HostRegistry::from_entries`]; afterwards every
//! [`HostConfig`] is shared read-only behind an `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::mcp::auth::{AuthStrategy, KeyAuth, PasswordAuth};
use crate::mcp::error::{ConfigError, SshError};

/// Default SSH port
pub const DEFAULT_PORT: u16 = 22;

/// Default inactivity timeout for commands, in seconds
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 30;

/// Default inactivity timeout for file transfers, in seconds
pub const DEFAULT_TRANSFER_TIMEOUT_SECS: u64 = 120;

/// A credential that must never be printed.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// How a host authenticates. Exactly one method per host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostAuth {
    IdentityFile(PathBuf),
    Password(Secret),
}

impl HostAuth {
    /// Build the russh authentication strategy for this method.
    pub(crate) fn strategy(&self) -> Box<dyn AuthStrategy> {
        match self {
            HostAuth::IdentityFile(path) => Box::new(KeyAuth::new(path.clone())),
            HostAuth::Password(secret) => Box::new(PasswordAuth::new(secret.clone())),
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            HostAuth::IdentityFile(_) => "key",
            HostAuth::Password(_) => "password",
        }
    }
}

/// Validated configuration for a single host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub name: String,
    pub hostname: String,
    pub username: String,
    pub port: u16,
    pub auth: HostAuth,
    pub auto_accept_host_key: bool,
    pub command_timeout: Duration,
    pub transfer_timeout: Duration,
    /// `None` means every command is allowed.
    pub allowed_commands: Option<Vec<String>>,
}

impl HostConfig {
    /// `hostname:port` for log lines.
    pub fn address(&self) -> String {
        format!("{}:{}", self.hostname, self.port)
    }

    pub fn password(&self) -> Option<&Secret> {
        match &self.auth {
            HostAuth::Password(secret) => Some(secret),
            HostAuth::IdentityFile(_) => None,
        }
    }
}

/// Host entry as written in the configuration file.
///
/// Keys this server does not know are kept aside and logged, not treated as errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostEntry {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub username: String,
    pub port: Option<i64>,
    pub identity_file: Option<String>,
    pub password: Option<Secret>,
    #[serde(default)]
    pub auto_accept_host_key: bool,
    pub command_timeout: Option<i64>,
    pub transfer_timeout: Option<i64>,
    pub allowed_commands: Option<Vec<String>>,
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

impl HostEntry {
    fn validate(self, index: usize) -> Result<HostConfig, ConfigError> {
        let ctx = format!("hosts[{}]", index);
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{}: missing or invalid 'name'", ctx)));
        }
        let ctx = format!("host '{}'", self.name);
        if !self.unknown.is_empty() {
            let keys: Vec<&str> = self.unknown.keys().map(String::as_str).collect();
            warn!("{}: ignoring unknown keys: {}", ctx, keys.join(", "));
        }
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{}: missing or invalid 'hostname'",
                ctx
            )));
        }
        if self.username.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "{}: missing or invalid 'username'",
                ctx
            )));
        }

        let port = self.port.unwrap_or(i64::from(DEFAULT_PORT));
        let port = u16::try_from(port)
            .ok()
            .filter(|p| *p >= 1)
            .ok_or_else(|| ConfigError::Invalid(format!("{}: invalid port {}", ctx, port)))?;

        let command_timeout = positive_secs(
            &ctx,
            "command_timeout",
            self.command_timeout,
            DEFAULT_COMMAND_TIMEOUT_SECS,
        )?;
        let transfer_timeout = positive_secs(
            &ctx,
            "transfer_timeout",
            self.transfer_timeout,
            DEFAULT_TRANSFER_TIMEOUT_SECS,
        )?;

        let identity_file = self.identity_file.filter(|p| !p.is_empty());
        let password = self.password.filter(|p| !p.expose().is_empty());
        let auth = match (identity_file, password) {
            (Some(path), None) => {
                let expanded = expand_home(&path);
                if !expanded.is_file() {
                    warn!(
                        "Identity file not found: {} (host: {})",
                        expanded.display(),
                        self.name
                    );
                }
                HostAuth::IdentityFile(expanded)
            }
            (None, Some(password)) => HostAuth::Password(password),
            (Some(_), Some(_)) => {
                return Err(ConfigError::Invalid(format!(
                    "{}: specify exactly one of 'identity_file' or 'password', not both",
                    ctx
                )));
            }
            (None, None) => {
                return Err(ConfigError::Invalid(format!(
                    "{}: must specify either 'identity_file' or 'password'",
                    ctx
                )));
            }
        };

        if let Some(allowed) = &self.allowed_commands {
            if allowed.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{}: allowed_commands is empty (blocks all commands). \
                     Omit it to allow all commands, or list specific commands.",
                    ctx
                )));
            }
            if let Some(j) = allowed.iter().position(|c| c.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!(
                    "{}: allowed_commands[{}] must be a non-empty string",
                    ctx, j
                )));
            }
        }

        Ok(HostConfig {
            name: self.name,
            hostname: self.hostname,
            username: self.username,
            port,
            auth,
            auto_accept_host_key: self.auto_accept_host_key,
            command_timeout,
            transfer_timeout,
            allowed_commands: self.allowed_commands,
        })
    }
}

fn positive_secs(
    ctx: &str,
    field: &str,
    value: Option<i64>,
    default: u64,
) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(Duration::from_secs(default)),
        Some(secs) if secs >= 1 => Ok(Duration::from_secs(secs as u64)),
        Some(_) => Err(ConfigError::Invalid(format!(
            "{}: {} must be >= 1",
            ctx, field
        ))),
    }
}

/// Expand a leading `~` to the current user's home directory.
pub(crate) fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        return dirs::home_dir().unwrap_or_else(|| PathBuf::from(path));
    }
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    Path::new(path).to_path_buf()
}

/// Immutable registry of validated hosts keyed by name.
#[derive(Debug, Default)]
pub struct HostRegistry {
    hosts: HashMap<String, Arc<HostConfig>>,
    order: Vec<String>,
}

impl HostRegistry {
    /// Validate raw entries and build the registry. Fails on the first invalid entry.
    pub fn from_entries(entries: Vec<HostEntry>) -> Result<Self, ConfigError> {
        let mut registry = HostRegistry::default();
        for (index, entry) in entries.into_iter().enumerate() {
            let host = entry.validate(index)?;
            if registry.hosts.contains_key(&host.name) {
                return Err(ConfigError::Invalid(format!(
                    "hosts[{}]: duplicate host name '{}'",
                    index, host.name
                )));
            }
            registry.order.push(host.name.clone());
            registry.hosts.insert(host.name.clone(), Arc::new(host));
        }
        Ok(registry)
    }

    /// Build a registry from already validated configurations.
    pub fn from_hosts(hosts: Vec<HostConfig>) -> Result<Self, ConfigError> {
        let mut registry = HostRegistry::default();
        for host in hosts {
            if registry.hosts.contains_key(&host.name) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate host name '{}'",
                    host.name
                )));
            }
            registry.order.push(host.name.clone());
            registry.hosts.insert(host.name.clone(), Arc::new(host));
        }
        Ok(registry)
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<HostConfig>, SshError> {
        self.hosts
            .get(name)
            .cloned()
            .ok_or_else(|| SshError::NotFound {
                name: name.to_string(),
                available: if self.order.is_empty() {
                    "(none)".to_string()
                } else {
                    self.order.join(", ")
                },
            })
    }

    /// Host names in configuration order.
    #[cfg(test)]
    pub(crate) fn names(&self) -> &[String] {
        &self.order
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<HostConfig>> {
        self.order.iter().filter_map(|name| self.hosts.get(name))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every configured password, for redaction.
    pub fn secrets(&self) -> Vec<Secret> {
        self.iter().filter_map(|h| h.password().cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str) -> HostEntry {
        HostEntry {
            name: name.to_string(),
            hostname: "10.0.0.5".to_string(),
            username: "deploy".to_string(),
            password: Some(Secret::new("hunter2")),
            ..Default::default()
        }
    }

    fn invalid_message(entries: Vec<HostEntry>) -> String {
        match HostRegistry::from_entries(entries) {
            Err(ConfigError::Invalid(msg)) => msg,
            other => panic!("expected invalid config, got {:?}", other.map(|r| r.len())),
        }
    }

    mod defaults {
        use super::*;

        #[test]
        fn test_defaults_applied() {
            let registry = HostRegistry::from_entries(vec![entry("web")]).unwrap();
            let host = registry.resolve("web").unwrap();
            assert_eq!(host.port, 22);
            assert_eq!(host.command_timeout, Duration::from_secs(30));
            assert_eq!(host.transfer_timeout, Duration::from_secs(120));
            assert!(!host.auto_accept_host_key);
            assert!(host.allowed_commands.is_none());
            assert_eq!(host.auth.method_name(), "password");
        }

        #[test]
        fn test_from_json() {
            let entries: Vec<HostEntry> = serde_json::from_str(
                r#"[{"name":"db","hostname":"db.internal","username":"ops",
                     "identity_file":"/nonexistent/key","port":2222,
                     "command_timeout":5,"allowed_commands":["uptime","df"]}]"#,
            )
            .unwrap();
            let registry = HostRegistry::from_entries(entries).unwrap();
            let host = registry.resolve("db").unwrap();
            assert_eq!(host.port, 2222);
            assert_eq!(host.address(), "db.internal:2222");
            assert_eq!(host.command_timeout, Duration::from_secs(5));
            assert_eq!(
                host.auth,
                HostAuth::IdentityFile(PathBuf::from("/nonexistent/key"))
            );
            assert_eq!(
                host.allowed_commands.as_deref(),
                Some(&["uptime".to_string(), "df".to_string()][..])
            );
        }

        #[test]
        fn test_unknown_keys_are_ignored() {
            let entries: Vec<HostEntry> = serde_json::from_str(
                r#"[{"name":"x","hostname":"h","username":"u","password":"pw",
                    "description":"build box","tags":["ci"]}]"#,
            )
            .unwrap();
            assert_eq!(
                entries[0].unknown.keys().collect::<Vec<_>>(),
                ["description", "tags"]
            );

            let registry = HostRegistry::from_entries(entries).unwrap();
            assert_eq!(registry.resolve("x").unwrap().hostname, "h");
        }
    }

    mod validation {
        use super::*;

        #[test]
        fn test_duplicate_names() {
            let msg = invalid_message(vec![entry("web"), entry("web")]);
            assert!(msg.contains("duplicate host name 'web'"));
        }

        #[test]
        fn test_missing_name() {
            let msg = invalid_message(vec![entry("")]);
            assert!(msg.contains("hosts[0]"));
        }

        #[test]
        fn test_port_out_of_range() {
            let mut e = entry("web");
            e.port = Some(70000);
            assert!(invalid_message(vec![e]).contains("invalid port 70000"));

            let mut e = entry("web");
            e.port = Some(0);
            assert!(invalid_message(vec![e]).contains("invalid port 0"));
        }

        #[test]
        fn test_zero_timeouts() {
            let mut e = entry("web");
            e.command_timeout = Some(0);
            assert!(invalid_message(vec![e]).contains("command_timeout"));

            let mut e = entry("web");
            e.transfer_timeout = Some(-1);
            assert!(invalid_message(vec![e]).contains("transfer_timeout"));
        }

        #[test]
        fn test_no_auth_method() {
            let mut e = entry("web");
            e.password = None;
            assert!(invalid_message(vec![e]).contains("either 'identity_file' or 'password'"));
        }

        #[test]
        fn test_both_auth_methods() {
            let mut e = entry("web");
            e.identity_file = Some("/keys/id".into());
            assert!(invalid_message(vec![e]).contains("exactly one"));
        }

        #[test]
        fn test_empty_allowlist() {
            let mut e = entry("web");
            e.allowed_commands = Some(vec![]);
            assert!(invalid_message(vec![e]).contains("allowed_commands is empty"));
        }

        #[test]
        fn test_blank_allowlist_entry() {
            let mut e = entry("web");
            e.allowed_commands = Some(vec!["ls".into(), " ".into()]);
            assert!(invalid_message(vec![e]).contains("allowed_commands[1]"));
        }

        #[test]
        fn test_error_never_contains_password() {
            let mut e = entry("web");
            e.port = Some(-5);
            assert!(!invalid_message(vec![e]).contains("hunter2"));
        }
    }

    mod lookup {
        use super::*;

        #[test]
        fn test_resolve_unknown_host() {
            let registry =
                HostRegistry::from_entries(vec![entry("web"), entry("db")]).unwrap();
            let err = registry.resolve("cache").unwrap_err();
            assert!(matches!(err, SshError::NotFound { .. }));
            assert!(err.to_string().contains("web, db"));
        }

        #[test]
        fn test_resolve_on_empty_registry() {
            let err = HostRegistry::default().resolve("x").unwrap_err();
            assert!(err.to_string().contains("(none)"));
        }

        #[test]
        fn test_names_keep_config_order() {
            let registry =
                HostRegistry::from_entries(vec![entry("b"), entry("a"), entry("c")]).unwrap();
            assert_eq!(registry.names(), &["b", "a", "c"]);
        }

        #[test]
        fn test_secrets_collects_passwords() {
            let mut keyed = entry("key-host");
            keyed.password = None;
            keyed.identity_file = Some("/keys/id".into());
            let registry = HostRegistry::from_entries(vec![entry("web"), keyed]).unwrap();
            assert_eq!(registry.secrets(), vec![Secret::new("hunter2")]);
        }

        #[test]
        fn test_secret_debug_is_redacted() {
            let host = HostRegistry::from_entries(vec![entry("web")])
                .unwrap()
                .resolve("web")
                .unwrap();
            let printed = format!("{:?}", host);
            assert!(!printed.contains("hunter2"));
            assert!(printed.contains("***"));
        }
    }

    mod home_expansion {
        use super::*;

        #[test]
        fn test_absolute_path_untouched() {
            assert_eq!(expand_home("/etc/key"), PathBuf::from("/etc/key"));
        }

        #[test]
        fn test_tilde_expanded() {
            if let Some(home) = dirs::home_dir() {
                assert_eq!(expand_home("~/.ssh/id"), home.join(".ssh/id"));
            }
        }
    }
}
