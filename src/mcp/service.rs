//! Request orchestration.
//!
//! Every operation follows the same path: resolve the host in the registry, check the
//! command allowlist (before any remote I/O), acquire the host's session, run the
//! executor or transfer, then write one audit record for the action. Connects and
//! reconnects triggered on the way are audited separately by the session manager.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::mcp::audit::{AuditAction, AuditEvent, AuditLogger};
use crate::mcp::client::RusshConnector;
use crate::mcp::config::{
    RuntimeConfig, ServerConfig, config_path_from_args, find_config, load_config,
};
use crate::mcp::error::{ConfigError, SshError};
use crate::mcp::executor;
use crate::mcp::known_hosts::KnownHostsStore;
use crate::mcp::logging::LogControl;
use crate::mcp::manager::{SessionManager, SessionSettings};
use crate::mcp::policy::{self, Verdict};
use crate::mcp::registry::{HostConfig, HostRegistry, expand_home};
use crate::mcp::transfer;
use crate::mcp::transport::Connector;
use crate::mcp::types::{
    BatchResult, CommandResult, DisconnectResponse, HostListResponse, HostStatus, HostSummary,
    TransferResult,
};

pub struct SshService {
    registry: HostRegistry,
    sessions: SessionManager,
    audit: Arc<AuditLogger>,
    max_output_bytes: usize,
}

impl SshService {
    pub fn new(
        registry: HostRegistry,
        connector: Arc<dyn Connector>,
        audit: Arc<AuditLogger>,
        runtime: &RuntimeConfig,
    ) -> Self {
        let settings = SessionSettings {
            health_check_timeout: runtime.health_check_timeout,
            reconnect_retries: runtime.reconnect_retries,
            retry_delay: runtime.retry_delay,
        };
        Self {
            registry,
            sessions: SessionManager::new(connector, audit.clone(), settings),
            audit,
            max_output_bytes: runtime.max_output_bytes,
        }
    }

    /// Build the service with the russh transport.
    pub fn from_config(config: ServerConfig, runtime: &RuntimeConfig) -> Self {
        let secrets = config
            .registry
            .secrets()
            .iter()
            .map(|s| s.expose().to_string())
            .collect();
        let audit = Arc::new(AuditLogger::new(config.audit_log_file.clone(), secrets));
        let known_hosts =
            KnownHostsStore::new(config.known_hosts_file.clone(), config.trust_on_first_use);
        let connector = Arc::new(RusshConnector::new(
            runtime.connect_timeout,
            runtime.compression,
            known_hosts,
        ));
        Self::new(config.registry, connector, audit, runtime)
    }

    /// Locate and load the host configuration named by `args`, apply its log level and
    /// build the service. Shared by both binaries.
    pub fn bootstrap(args: &[String], logging: &LogControl) -> Result<Self, ConfigError> {
        let explicit = config_path_from_args(args);
        let path = find_config(explicit.as_deref())?;
        info!("Loading host configuration from {}", path.display());
        let config = load_config(&path)?;
        logging.apply_config_level(config.log_level);

        let runtime = RuntimeConfig::from_env();
        info!(
            "{} hosts configured (connect timeout {:?}, reconnect retries {})",
            config.registry.len(),
            runtime.connect_timeout,
            runtime.reconnect_retries
        );
        Ok(Self::from_config(config, &runtime))
    }

    pub fn registry(&self) -> &HostRegistry {
        &self.registry
    }

    fn resolve(&self, name: &str, action: AuditAction) -> Result<Arc<HostConfig>, SshError> {
        self.registry.resolve(name).inspect_err(|e| {
            self.audit.record(AuditEvent::failure(name, action, e));
        })
    }

    fn check_command(&self, host: &HostConfig, command: &str) -> Result<(), SshError> {
        match policy::validate(host, command) {
            Verdict::Allowed => Ok(()),
            Verdict::Rejected(reason) => Err(SshError::Rejected {
                host: host.name.clone(),
                reason,
            }),
        }
    }

    pub fn list_hosts(&self) -> HostListResponse {
        let hosts: Vec<HostSummary> = self
            .registry
            .iter()
            .map(|host| HostSummary {
                name: host.name.clone(),
                hostname: host.hostname.clone(),
                username: host.username.clone(),
                port: host.port,
                auth_method: host.auth.method_name().to_string(),
                status: self.sessions.snapshot(&host.name).status,
                allowed_commands: host.allowed_commands.clone(),
                command_timeout_secs: host.command_timeout.as_secs(),
                transfer_timeout_secs: host.transfer_timeout.as_secs(),
            })
            .collect();
        let count = hosts.len();
        HostListResponse { hosts, count }
    }

    pub async fn execute(&self, host: &str, command: &str) -> Result<CommandResult, SshError> {
        let config = self.resolve(host, AuditAction::Execute)?;
        let result = self.run_command(&config, command).await;

        let event = match &result {
            Ok(r) => AuditEvent::success(host, AuditAction::Execute)
                .with_detail(format!("{} (exit {})", command, r.exit_code)),
            Err(e) => AuditEvent::failure(host, AuditAction::Execute, e).with_detail(command),
        };
        self.audit.record(event);
        result
    }

    async fn run_command(
        &self,
        config: &Arc<HostConfig>,
        command: &str,
    ) -> Result<CommandResult, SshError> {
        self.check_command(config, command)?;
        let mut session = self.sessions.acquire(config.clone()).await?;
        executor::execute(
            &mut session,
            command,
            config.command_timeout,
            self.max_output_bytes,
        )
        .await
    }

    pub async fn execute_batch(
        &self,
        host: &str,
        commands: &[String],
        stop_on_error: bool,
    ) -> Result<BatchResult, SshError> {
        let config = self.resolve(host, AuditAction::ExecuteBatch)?;
        let detail = format!("{} command(s): {}", commands.len(), commands.join(" ; "));
        let result = self.run_batch(&config, commands, stop_on_error).await;

        let event = match &result {
            Ok(batch) => {
                let mut detail = detail;
                if let Some(stop) = &batch.stopped {
                    detail = format!("{} [stopped at {}]", detail, stop.index);
                }
                AuditEvent::success(host, AuditAction::ExecuteBatch).with_detail(detail)
            }
            Err(e) => AuditEvent::failure(host, AuditAction::ExecuteBatch, e).with_detail(detail),
        };
        self.audit.record(event);
        result
    }

    async fn run_batch(
        &self,
        config: &Arc<HostConfig>,
        commands: &[String],
        stop_on_error: bool,
    ) -> Result<BatchResult, SshError> {
        if commands.is_empty() {
            return Err(SshError::Rejected {
                host: config.name.clone(),
                reason: "batch contains no commands".to_string(),
            });
        }
        // Nothing runs unless every command passes
        for command in commands {
            self.check_command(config, command)?;
        }

        let mut session = self.sessions.acquire(config.clone()).await?;
        Ok(executor::execute_batch(
            &mut session,
            commands,
            config.command_timeout,
            self.max_output_bytes,
            stop_on_error,
        )
        .await)
    }

    pub async fn upload(
        &self,
        host: &str,
        local_path: &str,
        remote_path: &str,
    ) -> Result<TransferResult, SshError> {
        let config = self.resolve(host, AuditAction::Upload)?;
        let local = expand_home(local_path);
        let result = self.run_upload(&config, &local, remote_path).await;

        self.record_transfer(
            host,
            AuditAction::Upload,
            &result,
            format!("{} -> {}", local_path, remote_path),
        );
        result
    }

    async fn run_upload(
        &self,
        config: &Arc<HostConfig>,
        local: &Path,
        remote_path: &str,
    ) -> Result<TransferResult, SshError> {
        let mut session = self.sessions.acquire(config.clone()).await?;
        transfer::upload(&mut session, local, remote_path, config.transfer_timeout).await
    }

    pub async fn download(
        &self,
        host: &str,
        remote_path: &str,
        local_path: &str,
    ) -> Result<TransferResult, SshError> {
        let config = self.resolve(host, AuditAction::Download)?;
        let local = expand_home(local_path);
        let result = self.run_download(&config, remote_path, &local).await;

        self.record_transfer(
            host,
            AuditAction::Download,
            &result,
            format!("{} -> {}", remote_path, local_path),
        );
        result
    }

    async fn run_download(
        &self,
        config: &Arc<HostConfig>,
        remote_path: &str,
        local: &Path,
    ) -> Result<TransferResult, SshError> {
        let mut session = self.sessions.acquire(config.clone()).await?;
        transfer::download(&mut session, remote_path, local, config.transfer_timeout).await
    }

    fn record_transfer(
        &self,
        host: &str,
        action: AuditAction,
        result: &Result<TransferResult, SshError>,
        detail: String,
    ) {
        let event = match result {
            Ok(t) => AuditEvent::success(host, action)
                .with_detail(format!("{} ({} bytes)", detail, t.bytes)),
            Err(e) => AuditEvent::failure(host, action, e).with_detail(detail),
        };
        self.audit.record(event);
    }

    /// Check connectivity, connecting first if no session is open.
    pub async fn status(&self, host: &str) -> Result<HostStatus, SshError> {
        let config = self.resolve(host, AuditAction::Status)?;

        let checked = self.sessions.acquire(config).await.map(drop);
        let snapshot = self.sessions.snapshot(host);

        let event = match &checked {
            Ok(()) => AuditEvent::success(host, AuditAction::Status),
            Err(e) => AuditEvent::failure(host, AuditAction::Status, e),
        };
        self.audit.record(event.with_detail(snapshot.status.to_string()));

        Ok(HostStatus {
            host: host.to_string(),
            status: snapshot.status,
            healthy: checked.is_ok(),
            connects: snapshot.connects,
            idle_seconds: snapshot.idle_seconds(),
            last_error: checked.err().map(|e| e.to_string()).or(snapshot.last_error),
        })
    }

    pub async fn disconnect(&self, host: &str) -> Result<DisconnectResponse, SshError> {
        let config = self.resolve(host, AuditAction::Disconnect)?;
        let closed = self.sessions.disconnect(&config.name).await;
        let message = if closed {
            format!("Disconnected from {}", config.name)
        } else {
            format!("{} had no open session", config.name)
        };
        self.audit
            .record(AuditEvent::success(host, AuditAction::Disconnect).with_detail(message.clone()));
        Ok(DisconnectResponse {
            host: config.name.clone(),
            closed,
            message,
        })
    }

    /// Close every session. Called once on process exit.
    pub async fn shutdown(&self) {
        info!("Shutting down, closing all connections");
        self.sessions.disconnect_all().await;
    }
}
