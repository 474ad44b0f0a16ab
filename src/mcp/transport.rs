//! Transport abstraction between the session layer and the SSH library.
//!
//! The session manager, executor and transfer service only talk to these traits.
//! [`crate::mcp::client`] implements them on top of russh and russh-sftp; tests
//! implement them in memory.
//!
//! Command output is modelled as a stream of [`ExecEvent`]s pulled one at a time with
//! [`ExecChannel::next_event`]. Callers wrap each pull in their own deadline, which is
//! what makes the timeout an inactivity timeout: the deadline restarts with every
//! event instead of running for the whole command.

use std::pin::Pin;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::mcp::error::SshError;
use crate::mcp::registry::HostConfig;

/// One unit of activity on an exec channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    Exit(i32),
    /// The remote side will send no more output.
    Eof,
}

pub type RemoteReader = Pin<Box<dyn AsyncRead + Send>>;
pub type RemoteWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// A running remote command.
#[async_trait]
pub trait ExecChannel: Send {
    /// Wait for the next event. `None` once the channel has closed.
    async fn next_event(&mut self) -> Option<Result<ExecEvent, String>>;

    /// Close the channel. Errors are ignored; the channel is gone either way.
    async fn close(&mut self);
}

/// The file-transfer sub-channel of a session.
#[async_trait]
pub trait RemoteFiles: Send {
    async fn open_read(&mut self, path: &str) -> Result<RemoteReader, String>;

    /// Create or truncate a remote file for writing.
    async fn create(&mut self, path: &str) -> Result<RemoteWriter, String>;
}

/// An authenticated connection to one host.
#[async_trait]
pub trait Transport: Send {
    /// Cheap round trip proving the connection still answers.
    async fn probe(&mut self) -> Result<(), String>;

    async fn open_exec(&mut self, command: &str) -> Result<Box<dyn ExecChannel>, String>;

    async fn open_files(&mut self) -> Result<Box<dyn RemoteFiles>, String>;

    /// Whether the underlying connection is known to be gone.
    fn is_closed(&self) -> bool;

    async fn close(&mut self);
}

/// Opens transports for configured hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, host: &HostConfig) -> Result<Box<dyn Transport>, SshError>;
}
