//! Per-host session lifecycle.
//!
//! # State Machine
//!
//! ```text
//! Disconnected ──acquire──▶ Connecting ──ok──▶ Connected
//!      ▲                        │                 │
//!      │                      error               ├─ probe fails / I/O error ─▶ Disconnected
//!      │                        ▼                 └─ disconnect ──────────────▶ Disconnected
//!      └────── retry ────────  Failed
//! ```
//!
//! # Locking
//!
//! Every host has its own slot in a `DashMap`, and each slot owns a FIFO
//! `tokio::sync::Mutex`. [`SessionManager::acquire`] takes that lock before looking at
//! the session and hands it to the returned [`LiveSession`], so the connect or probe
//! and the operation that follows form one critical section. Waiters are served in
//! arrival order. Slots for different hosts share nothing, so hosts never wait on each
//! other.
//!
//! Status is published on a `watch` channel per slot, which lets listings read it
//! without queueing behind a long-running command.

use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use dashmap::DashMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tracing::{error, info, warn};

use crate::mcp::audit::{AuditAction, AuditEvent, AuditLogger};
use crate::mcp::config::{
    DEFAULT_HEALTH_CHECK_TIMEOUT_SECS, DEFAULT_RECONNECT_RETRIES, DEFAULT_RETRY_DELAY_MS,
    MAX_RETRY_DELAY,
};
use crate::mcp::error::SshError;
use crate::mcp::registry::HostConfig;
use crate::mcp::transport::{Connector, Transport};

/// Connection status of one host.
///
/// `Failed` means the last connect attempt failed and no session is held. It stays
/// visible until the next attempt, which starts from it exactly as from
/// `Disconnected`. `Connecting` is only ever observed while an attempt is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Disconnected => write!(f, "disconnected"),
            SessionStatus::Connecting => write!(f, "connecting"),
            SessionStatus::Connected => write!(f, "connected"),
            SessionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Lock-free view of a host's session.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    /// Transports opened for this host since startup.
    pub connects: u64,
    pub last_activity: Option<Instant>,
    pub last_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            status: SessionStatus::Disconnected,
            connects: 0,
            last_activity: None,
            last_error: None,
        }
    }
}

impl SessionSnapshot {
    pub fn idle_seconds(&self) -> Option<f64> {
        self.last_activity
            .map(|t| (t.elapsed().as_secs_f64() * 10.0).round() / 10.0)
    }
}

/// Mutable session state, only reachable through the slot lock.
struct SessionState {
    transport: Option<Box<dyn Transport>>,
    snapshot: SessionSnapshot,
    publisher: watch::Sender<SessionSnapshot>,
}

impl SessionState {
    fn set_status(&mut self, status: SessionStatus) {
        self.snapshot.status = status;
        self.publish();
    }

    fn publish(&self) {
        self.publisher.send_replace(self.snapshot.clone());
    }

    async fn teardown(&mut self) -> bool {
        let had_transport = match self.transport.take() {
            Some(mut transport) => {
                transport.close().await;
                true
            }
            None => false,
        };
        self.set_status(SessionStatus::Disconnected);
        had_transport
    }
}

/// Puts a slot back to `Disconnected` if a connect attempt is abandoned midway, e.g.
/// when the caller's future is dropped while the connector is pending.
struct ConnectAttempt<'a> {
    state: &'a mut SessionState,
}

impl<'a> ConnectAttempt<'a> {
    fn start(state: &'a mut SessionState) -> Self {
        state.set_status(SessionStatus::Connecting);
        Self { state }
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if self.state.snapshot.status == SessionStatus::Connecting {
            self.state.set_status(SessionStatus::Disconnected);
        }
    }
}

struct HostSlot {
    state: Arc<Mutex<SessionState>>,
    status: watch::Receiver<SessionSnapshot>,
}

impl HostSlot {
    fn new() -> Self {
        let (publisher, status) = watch::channel(SessionSnapshot::default());
        Self {
            state: Arc::new(Mutex::new(SessionState {
                transport: None,
                snapshot: SessionSnapshot::default(),
                publisher,
            })),
            status,
        }
    }
}

/// Tunables for the session manager.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Upper bound for the liveness probe of a reused session.
    pub health_check_timeout: Duration,
    /// Extra attempts after the single reconnect that follows a failed probe.
    pub reconnect_retries: u32,
    /// Initial backoff between those extra attempts.
    pub retry_delay: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            health_check_timeout: Duration::from_secs(DEFAULT_HEALTH_CHECK_TIMEOUT_SECS),
            reconnect_retries: DEFAULT_RECONNECT_RETRIES,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
        }
    }
}

/// Owns one session per host.
pub struct SessionManager {
    connector: Arc<dyn Connector>,
    slots: DashMap<String, Arc<HostSlot>>,
    audit: Arc<AuditLogger>,
    settings: SessionSettings,
}

impl SessionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        audit: Arc<AuditLogger>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            connector,
            slots: DashMap::new(),
            audit,
            settings,
        }
    }

    fn slot(&self, name: &str) -> Arc<HostSlot> {
        // DashMap: the shard lock is released as soon as the Arc is cloned
        self.slots
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(HostSlot::new()))
            .clone()
    }

    /// Obtain a healthy session for `host`, connecting or reconnecting as needed.
    ///
    /// The returned [`LiveSession`] holds the host lock until dropped.
    pub async fn acquire(&self, host: Arc<HostConfig>) -> Result<LiveSession, SshError> {
        let slot = self.slot(&host.name);
        let mut state = slot.state.clone().lock_owned().await;

        let mut reconnect = false;
        if state.snapshot.status == SessionStatus::Connected {
            match self.probe(&host, &mut state).await {
                Ok(()) => {
                    return Ok(LiveSession::new(host, state));
                }
                Err(reason) => {
                    warn!(
                        "Health check failed for {}: {}. Reconnecting",
                        host.name, reason
                    );
                    state.teardown().await;
                    reconnect = true;
                }
            }
        }

        self.connect(&host, &mut state, reconnect).await?;
        Ok(LiveSession::new(host, state))
    }

    async fn probe(&self, host: &HostConfig, state: &mut SessionState) -> Result<(), String> {
        let Some(transport) = state.transport.as_mut() else {
            return Err("no transport".to_string());
        };
        if transport.is_closed() {
            return Err("connection closed".to_string());
        }
        match tokio::time::timeout(self.settings.health_check_timeout, transport.probe()).await {
            Ok(result) => result,
            Err(_) => Err(format!(
                "no reply from {} within {:?}",
                host.name, self.settings.health_check_timeout
            )),
        }
    }

    async fn connect(
        &self,
        host: &HostConfig,
        state: &mut SessionState,
        reconnect: bool,
    ) -> Result<(), SshError> {
        let mut attempt = ConnectAttempt::start(state);

        let result = if reconnect && self.settings.reconnect_retries > 0 {
            self.connect_with_backoff(host).await
        } else {
            self.connector.connect(host).await
        };

        let action = if reconnect {
            AuditAction::Reconnect
        } else {
            AuditAction::Connect
        };

        let state = &mut *attempt.state;
        match result {
            Ok(transport) => {
                state.transport = Some(transport);
                state.snapshot.connects += 1;
                state.snapshot.last_activity = Some(Instant::now());
                state.snapshot.last_error = None;
                state.set_status(SessionStatus::Connected);
                self.audit.record(AuditEvent::success(&host.name, action).with_detail(
                    format!("{}@{} via {}", host.username, host.address(), host.auth.method_name()),
                ));
                Ok(())
            }
            Err(e) => {
                error!("Failed to connect to {}: {}", host.name, e);
                state.snapshot.last_error = Some(e.to_string());
                state.set_status(SessionStatus::Failed);
                self.audit
                    .record(AuditEvent::failure(&host.name, action, &e));
                Err(e)
            }
        }
    }

    /// Reconnect with exponential backoff, retrying only transient failures.
    async fn connect_with_backoff(&self, host: &HostConfig) -> Result<Box<dyn Transport>, SshError> {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.settings.retry_delay)
            .with_max_delay(MAX_RETRY_DELAY)
            .with_max_times(self.settings.reconnect_retries as usize)
            .with_jitter();

        (|| async { self.connector.connect(host).await })
            .retry(backoff)
            .when(|e: &SshError| e.is_retryable())
            .notify(|err, dur| {
                warn!("Reconnect to {} failed: {}. Retrying in {:?}", host.name, err, dur);
            })
            .await
    }

    /// Tear down the session for `name` if one is open. Idempotent.
    ///
    /// Returns whether a live transport was closed.
    pub async fn disconnect(&self, name: &str) -> bool {
        let Some(slot) = self.slots.get(name).map(|s| s.clone()) else {
            return false;
        };
        let mut state = slot.state.lock().await;
        let closed = state.teardown().await;
        if closed {
            info!("Disconnected from {}", name);
        }
        closed
    }

    /// Close every open session.
    pub async fn disconnect_all(&self) {
        let names: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        let closes = names.iter().map(|name| self.disconnect(name));
        futures::future::join_all(closes).await;
        info!("All connections closed");
    }

    /// Current status of a host without waiting for its lock.
    pub fn snapshot(&self, name: &str) -> SessionSnapshot {
        self.slots
            .get(name)
            .map(|slot| slot.status.borrow().clone())
            .unwrap_or_default()
    }
}

/// Exclusive use of one host's connected session.
///
/// Dropping it releases the host lock; the transport stays open for reuse unless
/// [`LiveSession::invalidate`] was called.
pub struct LiveSession {
    host: Arc<HostConfig>,
    state: OwnedMutexGuard<SessionState>,
}

impl LiveSession {
    fn new(host: Arc<HostConfig>, state: OwnedMutexGuard<SessionState>) -> Self {
        Self { host, state }
    }

    pub fn host(&self) -> &HostConfig {
        &self.host
    }

    /// The connected transport.
    pub fn transport(&mut self) -> Result<&mut (dyn Transport + 'static), SshError> {
        let host = self.host.name.clone();
        self.state
            .transport
            .as_deref_mut()
            .ok_or(SshError::Io {
                host,
                reason: "session is not connected".to_string(),
            })
    }

    /// Record activity on the session.
    pub fn touch(&mut self) {
        self.state.snapshot.last_activity = Some(Instant::now());
        self.state.publish();
    }

    /// Tear the session down after a transport failure; the next acquire reconnects.
    pub async fn invalidate(&mut self, reason: &str) {
        warn!("Tearing down session for {}: {}", self.host.name, reason);
        self.state.snapshot.last_error = Some(reason.to_string());
        self.state.teardown().await;
    }

    /// Tear the session down if the transport reports itself closed.
    ///
    /// Returns whether the session was torn down.
    pub async fn reconcile(&mut self) -> bool {
        let closed = self
            .state
            .transport
            .as_ref()
            .is_none_or(|transport| transport.is_closed());
        if closed {
            self.invalidate("transport closed").await;
        }
        closed
    }

    pub fn status(&self) -> SessionStatus {
        self.state.snapshot.status
    }
}
