//! russh implementation of the transport traits.
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: keepalive every 30 seconds (3 missed replies close the
//!    connection) and no inactivity timeout, so idle sessions stay open for reuse.
//!
//! 2. **Connection Establishment**: TCP connect and key exchange, bounded by the
//!    connect timeout. The server key is checked by [`SshClientHandler`].
//!
//! 3. **Authentication**: the host's single [`AuthStrategy`](crate::mcp::auth::AuthStrategy), also bounded by the
//!    connect timeout.
//!
//! 4. **Channels**: each command runs on its own session channel; transfers use an
//!    SFTP subsystem channel opened per transfer.
//!
//! Connect failures are classified into [`SshError::Auth`], [`SshError::HostKey`] or
//! [`SshError::Io`]. Nothing here retries; that decision belongs to the session manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use tracing::{debug, info, warn};

use crate::mcp::error::{SshError, classify_connect_failure};
use crate::mcp::handler::{HostKeyPolicy, SshClientHandler};
use crate::mcp::known_hosts::KnownHostsStore;
use crate::mcp::registry::HostConfig;
use crate::mcp::transport::{
    Connector, ExecChannel, ExecEvent, RemoteFiles, RemoteReader, RemoteWriter, Transport,
};

/// Build russh client configuration.
///
/// Sessions are long-lived, so the inactivity timeout is disabled and liveness is
/// tracked with keepalives instead.
pub(crate) fn build_client_config(compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: None,
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Opens russh sessions for configured hosts.
pub struct RusshConnector {
    connect_timeout: Duration,
    compress: bool,
    known_hosts: Arc<KnownHostsStore>,
}

impl RusshConnector {
    pub fn new(connect_timeout: Duration, compress: bool, known_hosts: KnownHostsStore) -> Self {
        Self {
            connect_timeout,
            compress,
            known_hosts: Arc::new(known_hosts),
        }
    }

    fn policy_for(&self, host: &HostConfig) -> HostKeyPolicy {
        if host.auto_accept_host_key {
            HostKeyPolicy::AcceptAny
        } else {
            HostKeyPolicy::Verify(self.known_hosts.clone())
        }
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(&self, host: &HostConfig) -> Result<Box<dyn Transport>, SshError> {
        let config = build_client_config(self.compress);
        let handler = SshClientHandler::new(&host.hostname, host.port, self.policy_for(host));
        let rejection = handler.rejection_slot();

        info!(
            "Connecting to {} ({}@{})",
            host.name,
            host.username,
            host.address()
        );

        let connect_future = client::connect(config, (host.hostname.as_str(), host.port), handler);
        let connected = tokio::time::timeout(self.connect_timeout, connect_future)
            .await
            .map_err(|_| SshError::Io {
                host: host.name.clone(),
                reason: format!("Connection timed out after {:?}", self.connect_timeout),
            })?;

        let mut handle = match connected {
            Ok(handle) => handle,
            Err(e) => {
                let refused = rejection.lock().ok().and_then(|mut slot| slot.take());
                return Err(match refused {
                    Some(reason) => SshError::HostKey {
                        host: host.name.clone(),
                        reason,
                    },
                    None => classify_connect_failure(&host.name, format!("Failed to connect: {}", e)),
                });
            }
        };

        let strategy = host.auth.strategy();
        debug!("Authenticating to {} with {} strategy", host.name, strategy.name());
        let authenticated = tokio::time::timeout(
            self.connect_timeout,
            strategy.authenticate(&mut handle, &host.username),
        )
        .await
        .map_err(|_| SshError::Io {
            host: host.name.clone(),
            reason: format!("Authentication timed out after {:?}", self.connect_timeout),
        })?
        .map_err(|e| classify_connect_failure(&host.name, e))?;

        if !authenticated {
            return Err(SshError::Auth {
                host: host.name.clone(),
                reason: format!("server rejected {} credentials", strategy.name()),
            });
        }

        info!("Connected to {}", host.name);
        Ok(Box::new(RusshTransport { handle }))
    }
}

/// An authenticated russh session.
pub struct RusshTransport {
    handle: client::Handle<SshClientHandler>,
}

#[async_trait]
impl Transport for RusshTransport {
    async fn probe(&mut self) -> Result<(), String> {
        if self.handle.is_closed() {
            return Err("connection closed".to_string());
        }
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| format!("Failed to open channel: {}", e))?;
        let _ = channel.close().await;
        Ok(())
    }

    async fn open_exec(&mut self, command: &str) -> Result<Box<dyn ExecChannel>, String> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| format!("Failed to open channel: {}", e))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| format!("Failed to execute command: {}", e))?;

        Ok(Box::new(RusshExecChannel { channel }))
    }

    async fn open_files(&mut self) -> Result<Box<dyn RemoteFiles>, String> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| format!("Failed to open channel: {}", e))?;

        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| format!("Failed to request sftp subsystem: {}", e))?;

        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| format!("Failed to create SFTP session: {}", e))?;

        Ok(Box::new(SftpFiles { sftp }))
    }

    fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }

    async fn close(&mut self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "Session closed", "en")
            .await
        {
            warn!("Error during disconnect: {}", e);
        }
    }
}

/// A command running on a russh session channel.
struct RusshExecChannel {
    channel: russh::Channel<client::Msg>,
}

#[async_trait]
impl ExecChannel for RusshExecChannel {
    async fn next_event(&mut self) -> Option<Result<ExecEvent, String>> {
        loop {
            match self.channel.wait().await {
                Some(ChannelMsg::Data { data }) => {
                    return Some(Ok(ExecEvent::Stdout(data.to_vec())));
                }
                // ext == 1 is stderr in SSH protocol
                Some(ChannelMsg::ExtendedData { data, ext }) if ext == 1 => {
                    return Some(Ok(ExecEvent::Stderr(data.to_vec())));
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    return Some(Ok(ExecEvent::Exit(exit_status as i32)));
                }
                Some(ChannelMsg::Eof) => return Some(Ok(ExecEvent::Eof)),
                Some(ChannelMsg::Close) | None => return None,
                // Window adjustments and the like are not output
                Some(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.channel.close().await;
    }
}

/// SFTP sub-channel.
struct SftpFiles {
    sftp: SftpSession,
}

#[async_trait]
impl RemoteFiles for SftpFiles {
    async fn open_read(&mut self, path: &str) -> Result<RemoteReader, String> {
        let file = self
            .sftp
            .open(path)
            .await
            .map_err(|e| format!("Failed to open remote file {}: {}", path, e))?;
        Ok(Box::pin(file))
    }

    async fn create(&mut self, path: &str) -> Result<RemoteWriter, String> {
        let file = self
            .sftp
            .create(path)
            .await
            .map_err(|e| format!("Failed to create remote file {}: {}", path, e))?;
        Ok(Box::pin(file))
    }
}
