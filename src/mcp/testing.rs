//! In-memory transport for tests.
//!
//! [`MockConnector`] hands out [`MockTransport`]s that share counters, scripted command
//! output and a fake remote filesystem. Delays are expressed with `tokio::time::sleep`,
//! so tests running under a paused clock finish instantly.

use std::collections::{HashMap, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use crate::mcp::error::SshError;
use crate::mcp::registry::{HostAuth, HostConfig, Secret};
use crate::mcp::transport::{
    Connector, ExecChannel, ExecEvent, RemoteFiles, RemoteReader, RemoteWriter, Transport,
};

pub(crate) const TEST_PASSWORD: &str = "s3cret-pw";

pub(crate) fn password_host(name: &str) -> HostConfig {
    HostConfig {
        name: name.to_string(),
        hostname: format!("{}.internal", name),
        username: "deploy".to_string(),
        port: 22,
        auth: HostAuth::Password(Secret::new(TEST_PASSWORD)),
        auto_accept_host_key: false,
        command_timeout: Duration::from_secs(10),
        transfer_timeout: Duration::from_secs(10),
        allowed_commands: None,
    }
}

pub(crate) fn allowlisted_host(name: &str, allowed: &[&str]) -> HostConfig {
    HostConfig {
        allowed_commands: Some(allowed.iter().map(|s| s.to_string()).collect()),
        ..password_host(name)
    }
}

/// One scripted step of a command: wait, then emit.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    Event(Duration, ExecEvent),
    /// Emit a stream error.
    Fail(Duration, String),
    /// Drop the whole connection and emit a stream error.
    Disconnect(Duration),
    /// Never emit anything again.
    Hang,
}

/// Steps for a command that prints `stdout` and exits with `code`.
pub(crate) fn exits_with(stdout: &str, code: i32) -> Vec<Step> {
    vec![
        Step::Event(Duration::ZERO, ExecEvent::Stdout(stdout.as_bytes().to_vec())),
        Step::Event(Duration::ZERO, ExecEvent::Eof),
        Step::Event(Duration::ZERO, ExecEvent::Exit(code)),
    ]
}

/// Contents of a fake remote path.
#[derive(Debug, Clone)]
pub(crate) enum RemoteFile {
    Bytes(Vec<u8>),
    /// Yields the prefix, then fails.
    Broken(Vec<u8>),
    /// Yields the prefix, then never produces data again.
    Stalled(Vec<u8>),
    /// Yields `chunks` chunks of `chunk_len` bytes, `gap` apart.
    Trickle {
        chunks: usize,
        chunk_len: usize,
        gap: Duration,
    },
    /// Accepts no writes.
    StalledSink,
}

#[derive(Default)]
struct Shared {
    attempts: Arc<AtomicUsize>,
    connects: Arc<AtomicUsize>,
    probes: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    channel_closes: Arc<AtomicUsize>,
    executed: Mutex<Vec<String>>,
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    open_failures: Mutex<HashMap<String, String>>,
    files: Arc<Mutex<HashMap<String, RemoteFile>>>,
    alive: Mutex<Vec<Arc<AtomicBool>>>,
    failures: Mutex<VecDeque<SshError>>,
    files_unavailable: AtomicBool,
}

pub(crate) struct MockConnector {
    shared: Arc<Shared>,
    connect_delay: Duration,
    pub attempts: Arc<AtomicUsize>,
    pub connects: Arc<AtomicUsize>,
    pub probes: Arc<AtomicUsize>,
    pub closes: Arc<AtomicUsize>,
    pub channel_closes: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::with_connect_delay(Duration::ZERO)
    }

    pub fn with_connect_delay(connect_delay: Duration) -> Self {
        let shared = Arc::new(Shared::default());
        Self {
            attempts: shared.attempts.clone(),
            connects: shared.connects.clone(),
            probes: shared.probes.clone(),
            closes: shared.closes.clone(),
            channel_closes: shared.channel_closes.clone(),
            shared,
            connect_delay,
        }
    }

    /// Make every transport opened so far report itself closed.
    pub fn make_stale(&self) {
        for alive in self.shared.alive.lock().unwrap().iter() {
            alive.store(false, Ordering::SeqCst);
        }
    }

    /// Fail the next connect attempt with `err`.
    pub fn fail_next(&self, err: SshError) {
        self.shared.failures.lock().unwrap().push_back(err);
    }

    pub fn script(&self, command: &str, steps: Vec<Step>) {
        self.shared
            .scripts
            .lock()
            .unwrap()
            .insert(command.to_string(), steps);
    }

    /// Make opening an exec channel for `command` fail.
    pub fn fail_open(&self, command: &str, reason: &str) {
        self.shared
            .open_failures
            .lock()
            .unwrap()
            .insert(command.to_string(), reason.to_string());
    }

    pub fn put_file(&self, path: &str, file: RemoteFile) {
        self.shared
            .files
            .lock()
            .unwrap()
            .insert(path.to_string(), file);
    }

    pub fn remote_bytes(&self, path: &str) -> Option<Vec<u8>> {
        match self.shared.files.lock().unwrap().get(path) {
            Some(RemoteFile::Bytes(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn refuse_file_channel(&self) {
        self.shared.files_unavailable.store(true, Ordering::SeqCst);
    }

    /// Commands that reached an exec channel, in order.
    pub fn executed(&self) -> Vec<String> {
        self.shared.executed.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, _host: &HostConfig) -> Result<Box<dyn Transport>, SshError> {
        self.shared.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        if let Some(err) = self.shared.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.shared.connects.fetch_add(1, Ordering::SeqCst);
        let alive = Arc::new(AtomicBool::new(true));
        self.shared.alive.lock().unwrap().push(alive.clone());
        Ok(Box::new(MockTransport {
            shared: self.shared.clone(),
            alive,
        }))
    }
}

pub(crate) struct MockTransport {
    shared: Arc<Shared>,
    alive: Arc<AtomicBool>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn probe(&mut self) -> Result<(), String> {
        self.shared.probes.fetch_add(1, Ordering::SeqCst);
        if self.alive.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err("connection closed".to_string())
        }
    }

    async fn open_exec(&mut self, command: &str) -> Result<Box<dyn ExecChannel>, String> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err("connection closed".to_string());
        }
        if let Some(reason) = self.shared.open_failures.lock().unwrap().get(command) {
            return Err(reason.clone());
        }
        self.shared
            .executed
            .lock()
            .unwrap()
            .push(command.to_string());
        let steps = self
            .shared
            .scripts
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_else(|| exits_with(&format!("{}\n", command), 0));
        Ok(Box::new(MockExecChannel {
            steps: steps.into(),
            alive: self.alive.clone(),
            closes: self.shared.channel_closes.clone(),
        }))
    }

    async fn open_files(&mut self) -> Result<Box<dyn RemoteFiles>, String> {
        if !self.alive.load(Ordering::SeqCst) || self.shared.files_unavailable.load(Ordering::SeqCst)
        {
            return Err("Failed to request sftp subsystem: channel refused".to_string());
        }
        Ok(Box::new(MockFiles {
            files: self.shared.files.clone(),
        }))
    }

    fn is_closed(&self) -> bool {
        !self.alive.load(Ordering::SeqCst)
    }

    async fn close(&mut self) {
        self.shared.closes.fetch_add(1, Ordering::SeqCst);
        self.alive.store(false, Ordering::SeqCst);
    }
}

struct MockExecChannel {
    steps: VecDeque<Step>,
    alive: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl ExecChannel for MockExecChannel {
    async fn next_event(&mut self) -> Option<Result<ExecEvent, String>> {
        match self.steps.pop_front()? {
            Step::Event(delay, event) => {
                tokio::time::sleep(delay).await;
                Some(Ok(event))
            }
            Step::Fail(delay, reason) => {
                tokio::time::sleep(delay).await;
                Some(Err(reason))
            }
            Step::Disconnect(delay) => {
                tokio::time::sleep(delay).await;
                self.alive.store(false, Ordering::SeqCst);
                Some(Err("connection reset by peer".to_string()))
            }
            Step::Hang => futures::future::pending().await,
        }
    }

    async fn close(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.steps.clear();
    }
}

struct MockFiles {
    files: Arc<Mutex<HashMap<String, RemoteFile>>>,
}

#[async_trait]
impl RemoteFiles for MockFiles {
    async fn open_read(&mut self, path: &str) -> Result<RemoteReader, String> {
        let file = self.files.lock().unwrap().get(path).cloned();
        match file {
            None | Some(RemoteFile::StalledSink) => Err(format!("No such file: {}", path)),
            Some(RemoteFile::Bytes(data)) => Ok(Box::pin(io::Cursor::new(data))),
            Some(RemoteFile::Broken(prefix)) => Ok(Box::pin(PrefixReader::new(prefix, false))),
            Some(RemoteFile::Stalled(prefix)) => Ok(Box::pin(PrefixReader::new(prefix, true))),
            Some(RemoteFile::Trickle {
                chunks,
                chunk_len,
                gap,
            }) => {
                let (mut tx, rx) = tokio::io::duplex(chunk_len.max(1));
                tokio::spawn(async move {
                    for _ in 0..chunks {
                        tokio::time::sleep(gap).await;
                        if tx.write_all(&vec![b'x'; chunk_len]).await.is_err() {
                            return;
                        }
                    }
                });
                Ok(Box::pin(rx))
            }
        }
    }

    async fn create(&mut self, path: &str) -> Result<RemoteWriter, String> {
        if path.starts_with("/readonly/") {
            return Err(format!("Permission denied: {}", path));
        }
        if let Some(RemoteFile::StalledSink) = self.files.lock().unwrap().get(path) {
            return Ok(Box::pin(StalledWriter));
        }
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), RemoteFile::Bytes(Vec::new()));
        Ok(Box::pin(CaptureWriter {
            path: path.to_string(),
            files: self.files.clone(),
        }))
    }
}

/// Reader that yields a prefix and then either fails or stalls forever.
struct PrefixReader {
    data: Vec<u8>,
    pos: usize,
    stall: bool,
}

impl PrefixReader {
    fn new(data: Vec<u8>, stall: bool) -> Self {
        Self {
            data,
            pos: 0,
            stall,
        }
    }
}

impl AsyncRead for PrefixReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.pos < self.data.len() {
            let n = buf.remaining().min(self.data.len() - self.pos);
            let start = self.pos;
            buf.put_slice(&self.data[start..start + n]);
            self.pos += n;
            return Poll::Ready(Ok(()));
        }
        if self.stall {
            Poll::Pending
        } else {
            Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "sftp stream reset",
            )))
        }
    }
}

struct CaptureWriter {
    path: String,
    files: Arc<Mutex<HashMap<String, RemoteFile>>>,
}

impl AsyncWrite for CaptureWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut files = self.files.lock().unwrap();
        if let Some(RemoteFile::Bytes(data)) = files.get_mut(&self.path) {
            data.extend_from_slice(buf);
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

struct StalledWriter;

impl AsyncWrite for StalledWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Poll::Pending
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Pending
    }
}
