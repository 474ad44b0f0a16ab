//! Error types and error classification for SSH sessions.
//!
//! Two families of errors exist:
//!
//! - [`ConfigError`]: raised while loading the host configuration. These are fatal at
//!   startup and never produced while serving a request.
//! - [`SshError`]: every failure of a live request (unknown host, policy rejection,
//!   connect failures, timeouts, transport failures). Each variant maps to a stable
//!   [`ErrorKind`] that the tool layer reports alongside the human-readable reason.
//!
//! # Connect Failure Classification
//!
//! russh reports most connect-time failures as plain messages. They are classified into
//! two categories:
//!
//! 1. **Authentication Failures (NOT retryable)**: credential or permission problems that
//!    will not resolve by retrying. Examples include wrong passwords, rejected keys, or
//!    denied access.
//!
//! 2. **Connection Errors (retryable)**: transient network issues that may resolve on
//!    retry, such as connection refused, timeouts, or temporary DNS failures.
//!
//! Authentication patterns take precedence: a message that contains both authentication
//! and connection keywords is classified as an authentication failure so that bad
//! credentials are never retried.
//!
//! ```rust,ignore
//! assert!(!is_retryable_error("Permission denied"));
//! assert!(is_retryable_error("Connection refused"));
//! assert!(!is_retryable_error("SSH protocol error"));
//! assert!(is_retryable_error("SSH connection timeout"));
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Authentication error patterns that indicate permanent failures.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "password authentication failed",
    "key authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
    "failed to load private key",
];

/// Connection error patterns that indicate transient failures.
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timeout",
    "timed out",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "handshake failed",
    "failed to connect",
    "broken pipe",
    "would block",
];

/// Errors raised while loading or validating the host configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration file could be located.
    #[error("config file not found: {0}")]
    NotFound(String),

    /// The configuration file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON or has the wrong shape.
    #[error("invalid JSON in config file: {0}")]
    Json(#[from] serde_json::Error),

    /// A value in the configuration violates an invariant.
    #[error("{0}")]
    Invalid(String),
}

/// Stable error category reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AuthError,
    HostKeyError,
    ValidationRejected,
    TimeoutError,
    IoError,
    RemoteError,
    LocalError,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::HostKeyError => "host_key_error",
            ErrorKind::ValidationRejected => "validation_rejected",
            ErrorKind::TimeoutError => "timeout_error",
            ErrorKind::IoError => "io_error",
            ErrorKind::RemoteError => "remote_error",
            ErrorKind::LocalError => "local_error",
        };
        f.write_str(label)
    }
}

/// Failure of a request against a configured host.
///
/// Messages name the host and the reason. Credentials never appear in them: the
/// password is only ever handed to russh and key files are read by path.
#[derive(Debug, Clone, Error)]
pub enum SshError {
    /// The host name is not part of the registry.
    #[error("host '{name}' is not configured. Available: {available}")]
    NotFound { name: String, available: String },

    /// The server rejected the configured credentials.
    #[error("authentication to '{host}' failed: {reason}")]
    Auth { host: String, reason: String },

    /// The server key is unknown or does not match the known-hosts store.
    #[error("host key verification for '{host}' failed: {reason}")]
    HostKey { host: String, reason: String },

    /// The command allowlist rejected the command before any remote I/O.
    #[error("command rejected for '{host}': {reason}")]
    Rejected { host: String, reason: String },

    /// No data moved on the channel for the configured number of seconds.
    #[error("no activity on '{host}' for {seconds}s during {operation}")]
    Timeout {
        host: String,
        operation: &'static str,
        seconds: u64,
    },

    /// The transport failed; the session has been torn down.
    #[error("I/O failure on '{host}': {reason}")]
    Io { host: String, reason: String },

    /// The remote side reported an error while the transport stayed usable.
    #[error("remote error on '{host}': {reason}")]
    Remote { host: String, reason: String },

    /// A local filesystem operation failed.
    #[error("local file error: {0}")]
    Local(String),
}

impl SshError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SshError::NotFound { .. } => ErrorKind::NotFound,
            SshError::Auth { .. } => ErrorKind::AuthError,
            SshError::HostKey { .. } => ErrorKind::HostKeyError,
            SshError::Rejected { .. } => ErrorKind::ValidationRejected,
            SshError::Timeout { .. } => ErrorKind::TimeoutError,
            SshError::Io { .. } => ErrorKind::IoError,
            SshError::Remote { .. } => ErrorKind::RemoteError,
            SshError::Local(_) => ErrorKind::LocalError,
        }
    }

    /// Whether a connect attempt that failed with this error may be retried.
    ///
    /// Only transport-level failures qualify; credential and host-key failures
    /// are permanent for the lifetime of the configuration.
    pub fn is_retryable(&self) -> bool {
        match self {
            SshError::Io { reason, .. } => is_retryable_error(reason),
            SshError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Render as `[kind] message` for the tool layer.
    pub fn to_tool_message(&self) -> String {
        format!("[{}] {}", self.kind(), self)
    }
}

/// Determines if an error message describes a transient failure.
///
/// 1. **Authentication failures are NOT retryable**: messages containing patterns like
///    "authentication failed", "permission denied", or "publickey".
///
/// 2. **Connection errors ARE retryable**: messages containing patterns like
///    "connection refused", "timeout", or "network is unreachable".
///
/// 3. **Unknown errors**: if the message mentions "ssh" it is NOT retried unless it
///    also mentions "timeout" or "connect"; anything else is retried.
pub(crate) fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    // Authentication failures are NOT retryable (checked first for priority)
    if is_auth_failure(&error_lower) {
        return false;
    }

    for retryable_err in RETRYABLE_ERRORS {
        if error_lower.contains(retryable_err) {
            return true;
        }
    }

    !error_lower.contains("ssh") || error_lower.contains("timeout") || error_lower.contains("connect")
}

fn is_auth_failure(error_lower: &str) -> bool {
    AUTH_ERRORS.iter().any(|pattern| error_lower.contains(pattern))
}

/// Map a connect-time failure message to the matching [`SshError`] variant.
pub(crate) fn classify_connect_failure(host: &str, message: impl Into<String>) -> SshError {
    let reason = message.into();
    if is_auth_failure(&reason.to_lowercase()) {
        SshError::Auth {
            host: host.to_string(),
            reason,
        }
    } else {
        SshError::Io {
            host: host.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod auth_errors_not_retryable {
        use super::*;

        #[test]
        fn test_authentication_failed() {
            assert!(!is_retryable_error("Authentication failed"));
            assert!(!is_retryable_error("AUTHENTICATION FAILED"));
        }

        #[test]
        fn test_permission_denied() {
            assert!(!is_retryable_error("Permission denied"));
            assert!(!is_retryable_error("permission denied (publickey)"));
        }

        #[test]
        fn test_unreadable_key() {
            assert!(!is_retryable_error(
                "Failed to load private key from \"/keys/id\": bad format"
            ));
        }

        #[test]
        fn test_auth_takes_priority_over_timeout() {
            assert!(!is_retryable_error(
                "Connection timeout during authentication failed"
            ));
        }
    }

    mod connection_errors_retryable {
        use super::*;

        #[test]
        fn test_connection_refused() {
            assert!(is_retryable_error("Connection refused"));
        }

        #[test]
        fn test_connection_timed_out() {
            assert!(is_retryable_error("Connection timed out after 15s"));
        }

        #[test]
        fn test_network_unreachable() {
            assert!(is_retryable_error("Network is unreachable"));
        }

        #[test]
        fn test_ssh_errors_need_connect_keyword() {
            assert!(!is_retryable_error("SSH protocol error"));
            assert!(is_retryable_error("SSH connection timeout"));
        }

        #[test]
        fn test_unknown_non_ssh_error_is_retryable() {
            assert!(is_retryable_error("something odd happened"));
        }
    }

    mod classification {
        use super::*;

        #[test]
        fn test_auth_message_becomes_auth_error() {
            let err = classify_connect_failure("web", "Password authentication failed: denied");
            assert_eq!(err.kind(), ErrorKind::AuthError);
            assert!(!err.is_retryable());
        }

        #[test]
        fn test_network_message_becomes_io_error() {
            let err = classify_connect_failure("web", "Failed to connect: Connection refused");
            assert_eq!(err.kind(), ErrorKind::IoError);
            assert!(err.is_retryable());
        }

        #[test]
        fn test_host_key_error_not_retryable() {
            let err = SshError::HostKey {
                host: "web".into(),
                reason: "key changed".into(),
            };
            assert!(!err.is_retryable());
        }
    }

    mod messages {
        use super::*;

        #[test]
        fn test_tool_message_includes_kind() {
            let err = SshError::Timeout {
                host: "db".into(),
                operation: "execute",
                seconds: 10,
            };
            assert_eq!(
                err.to_tool_message(),
                "[timeout_error] no activity on 'db' for 10s during execute"
            );
        }

        #[test]
        fn test_not_found_lists_available_hosts() {
            let err = SshError::NotFound {
                name: "nope".into(),
                available: "web, db".into(),
            };
            assert!(err.to_string().contains("Available: web, db"));
            assert_eq!(err.kind(), ErrorKind::NotFound);
        }

        #[test]
        fn test_kind_serializes_snake_case() {
            let json = serde_json::to_string(&ErrorKind::ValidationRejected).unwrap();
            assert_eq!(json, "\"validation_rejected\"");
        }
    }
}
