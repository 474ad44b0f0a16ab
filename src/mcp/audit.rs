//! Append-only audit trail.
//!
//! Every action against a host produces exactly one [`AuditRecord`]. Records go to the
//! `audit` tracing target and, when an audit file is configured, are appended to it as
//! JSON lines. Recording never fails the caller: write errors are logged and dropped.
//!
//! All configured passwords are scrubbed from the reason and detail text before a record
//! leaves this module.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::mcp::error::{ErrorKind, SshError};

/// Longest detail string kept in a record, in characters.
pub(crate) const MAX_DETAIL_CHARS: usize = 500;

const REDACTED: &str = "***";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Connect,
    Reconnect,
    Execute,
    ExecuteBatch,
    Upload,
    Download,
    Status,
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
}

/// An action to be recorded, before timestamping and redaction.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    host: String,
    action: AuditAction,
    outcome: AuditOutcome,
    error_kind: Option<ErrorKind>,
    reason: Option<String>,
    detail: Option<String>,
}

impl AuditEvent {
    pub fn success(host: &str, action: AuditAction) -> Self {
        Self {
            host: host.to_string(),
            action,
            outcome: AuditOutcome::Success,
            error_kind: None,
            reason: None,
            detail: None,
        }
    }

    pub fn failure(host: &str, action: AuditAction, err: &SshError) -> Self {
        Self {
            host: host.to_string(),
            action,
            outcome: AuditOutcome::Failure,
            error_kind: Some(err.kind()),
            reason: Some(err.to_string()),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// One line of the audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// RFC 3339, UTC.
    pub timestamp: String,
    pub host: String,
    pub action: AuditAction,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

pub struct AuditLogger {
    file: Option<PathBuf>,
    secrets: Vec<String>,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    /// `secrets` are scrubbed from every record; empty strings are ignored.
    pub fn new(file: Option<PathBuf>, secrets: Vec<String>) -> Self {
        let mut secrets: Vec<String> = secrets.into_iter().filter(|s| !s.is_empty()).collect();
        // Longest first so a password containing another is fully masked
        secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        Self {
            file,
            secrets,
            write_lock: Mutex::new(()),
        }
    }

    /// Logger that only emits tracing events.
    pub fn disabled() -> Self {
        Self::new(None, Vec::new())
    }

    pub fn record(&self, event: AuditEvent) {
        let record = AuditRecord {
            timestamp: chrono::Utc::now().to_rfc3339(),
            host: event.host,
            action: event.action,
            outcome: event.outcome,
            error_kind: event.error_kind,
            reason: event.reason.map(|r| self.redact(&r)),
            detail: event.detail.map(|d| truncate_chars(&self.redact(&d), MAX_DETAIL_CHARS)),
        };

        info!(
            target: "audit",
            host = %record.host,
            action = ?record.action,
            outcome = ?record.outcome,
            reason = record.reason.as_deref().unwrap_or(""),
            detail = record.detail.as_deref().unwrap_or(""),
            "audit record"
        );

        if let Some(path) = &self.file {
            self.append(path, &record);
        }
    }

    fn append(&self, path: &PathBuf, record: &AuditRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize audit record: {}", e);
                return;
            }
        };

        // A poisoned lock only means another writer panicked; the file is still usable
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let written = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut file| writeln!(file, "{}", line));
        if let Err(e) = written {
            warn!("Failed to write audit log {}: {}", path.display(), e);
        }
    }

    fn redact(&self, text: &str) -> String {
        self.secrets
            .iter()
            .fold(text.to_string(), |acc, secret| acc.replace(secret.as_str(), REDACTED))
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => text[..end].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
pub(crate) fn read_records(path: &std::path::Path) -> Vec<AuditRecord> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}
