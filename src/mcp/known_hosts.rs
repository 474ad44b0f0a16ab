//! OpenSSH-format known_hosts store.
//!
//! Hosts that do not set `auto_accept_host_key` must present a key that is already
//! recorded here. With `trust_on_first_use` enabled, a host that has no entry at all
//! is recorded on first contact; a host whose recorded key differs is always refused.

use std::path::PathBuf;

use russh::keys::{self, PublicKey};

/// Result of looking a server key up in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyCheck {
    /// The key matches a recorded entry.
    Trusted,
    /// No entry exists for this host and port.
    Unknown,
    /// An entry exists with a different key.
    Changed { line: usize },
    /// The store could not be read.
    Unreadable(String),
}

#[derive(Debug, Clone, Default)]
pub struct KnownHostsStore {
    /// `None` uses `~/.ssh/known_hosts`.
    path: Option<PathBuf>,
    trust_on_first_use: bool,
}

impl KnownHostsStore {
    pub fn new(path: Option<PathBuf>, trust_on_first_use: bool) -> Self {
        Self {
            path,
            trust_on_first_use,
        }
    }

    pub fn trust_on_first_use(&self) -> bool {
        self.trust_on_first_use
    }

    pub fn check(&self, host: &str, port: u16, key: &PublicKey) -> HostKeyCheck {
        let result = match &self.path {
            Some(path) => keys::check_known_hosts_path(host, port, key, path),
            None => keys::check_known_hosts(host, port, key),
        };
        classify(result)
    }

    pub fn learn(&self, host: &str, port: u16, key: &PublicKey) -> Result<(), String> {
        let result = match &self.path {
            Some(path) => keys::known_hosts::learn_known_hosts_path(host, port, key, path),
            None => keys::known_hosts::learn_known_hosts(host, port, key),
        };
        result.map_err(|e| format!("Failed to record host key: {}", e))
    }
}

fn classify(result: Result<bool, keys::Error>) -> HostKeyCheck {
    match result {
        Ok(true) => HostKeyCheck::Trusted,
        Ok(false) => HostKeyCheck::Unknown,
        Err(keys::Error::KeyChanged { line }) => HostKeyCheck::Changed { line },
        Err(e) => HostKeyCheck::Unreadable(e.to_string()),
    }
}
