//! russh client handler with host key verification.
//!
//! The handler is created per connect attempt. When it refuses a server key it
//! stores the reason in a shared slot; russh itself only reports an opaque
//! "unknown key" error, so the connector reads the slot to build a
//! [`SshError::HostKey`](crate::mcp::error::SshError::HostKey).

use std::sync::{Arc, Mutex};

use russh::keys::ssh_key::HashAlg;
use russh::{client, keys};
use tracing::{info, warn};

use crate::mcp::known_hosts::{HostKeyCheck, KnownHostsStore};

/// How server keys are checked for one host.
#[derive(Debug, Clone)]
pub enum HostKeyPolicy {
    /// Trust whatever key is presented, for this connection only.
    AcceptAny,
    /// Require a matching entry in the known-hosts store.
    Verify(Arc<KnownHostsStore>),
}

/// Shared slot carrying the reason a server key was refused.
pub type RejectionSlot = Arc<Mutex<Option<String>>>;

pub struct SshClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
    rejection: RejectionSlot,
}

impl SshClientHandler {
    pub fn new(host: impl Into<String>, port: u16, policy: HostKeyPolicy) -> Self {
        Self {
            host: host.into(),
            port,
            policy,
            rejection: Arc::new(Mutex::new(None)),
        }
    }

    pub fn rejection_slot(&self) -> RejectionSlot {
        self.rejection.clone()
    }

    fn refuse(&self, reason: String) -> bool {
        warn!("Refusing host key for {}:{}: {}", self.host, self.port, reason);
        if let Ok(mut slot) = self.rejection.lock() {
            *slot = Some(reason);
        }
        false
    }

    fn verify(&self, key: &keys::PublicKey) -> bool {
        let fingerprint = key.fingerprint(HashAlg::Sha256);
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                warn!(
                    "Auto-accepting host key {} for {}:{} (MITM risk)",
                    fingerprint, self.host, self.port
                );
                true
            }
            HostKeyPolicy::Verify(store) => match store.check(&self.host, self.port, key) {
                HostKeyCheck::Trusted => true,
                HostKeyCheck::Unknown if store.trust_on_first_use() => {
                    match store.learn(&self.host, self.port, key) {
                        Ok(()) => {
                            info!(
                                "Recorded new host key {} for {}:{}",
                                fingerprint, self.host, self.port
                            );
                            true
                        }
                        Err(e) => self.refuse(e),
                    }
                }
                HostKeyCheck::Unknown => self.refuse(format!(
                    "no known_hosts entry (server key {}); add it with ssh-keyscan \
                     or set auto_accept_host_key",
                    fingerprint
                )),
                HostKeyCheck::Changed { line } => self.refuse(format!(
                    "server key {} does not match known_hosts line {}; possible man-in-the-middle",
                    fingerprint, line
                )),
                HostKeyCheck::Unreadable(e) => {
                    self.refuse(format!("known_hosts could not be read: {}", e))
                }
            },
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(self.verify(server_public_key))
    }
}
