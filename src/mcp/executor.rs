//! Remote command execution with an inactivity timeout.
//!
//! # Timeout Semantics
//!
//! The timeout bounds the silence between two channel events, not the total runtime.
//! Each call to [`ExecChannel::next_event`] gets a fresh deadline, so a build that prints
//! a line every few seconds runs for as long as it needs, while a command that goes quiet
//! for longer than the timeout has its channel closed and yields [`SshError::Timeout`].
//!
//! # Session Handling After Failures
//!
//! | Failure | Session |
//! |---------|---------|
//! | channel cannot be opened | torn down |
//! | stream error | torn down |
//! | inactivity timeout | kept unless the transport reports itself closed |
//! | non-zero exit | kept |
//!
//! [`ExecChannel::next_event`]: crate::mcp::transport::ExecChannel::next_event

use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::mcp::error::SshError;
use crate::mcp::manager::LiveSession;
use crate::mcp::transport::ExecEvent;
use crate::mcp::types::{BatchEntry, BatchResult, BatchStop, BatchStopReason, CommandResult};

/// Captured output of one stream, bounded to `limit` bytes.
struct OutputBuffer {
    data: Vec<u8>,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    fn new(limit: usize) -> Self {
        Self {
            data: Vec::new(),
            limit,
            truncated: false,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let room = self.limit.saturating_sub(self.data.len());
        if chunk.len() > room {
            self.truncated = true;
        }
        self.data.extend_from_slice(&chunk[..chunk.len().min(room)]);
    }

    fn into_string(self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }
}

/// Run one command on the session.
pub async fn execute(
    session: &mut LiveSession,
    command: &str,
    timeout: Duration,
    max_output: usize,
) -> Result<CommandResult, SshError> {
    let host = session.host().name.clone();
    let started = Instant::now();

    let opened = session.transport()?.open_exec(command).await;
    let mut channel = match opened {
        Ok(channel) => channel,
        Err(reason) => {
            session.invalidate(&reason).await;
            return Err(SshError::Io { host, reason });
        }
    };
    session.touch();

    let mut stdout = OutputBuffer::new(max_output);
    let mut stderr = OutputBuffer::new(max_output);
    let mut exit_code: Option<i32> = None;
    let mut eof = false;

    loop {
        let event = match tokio::time::timeout(timeout, channel.next_event()).await {
            Ok(event) => event,
            Err(_) => {
                warn!("Command on {} idle for {:?}, closing channel", host, timeout);
                channel.close().await;
                session.reconcile().await;
                return Err(SshError::Timeout {
                    host,
                    operation: "execute",
                    seconds: timeout.as_secs(),
                });
            }
        };

        match event {
            None => break,
            Some(Err(reason)) => {
                session.invalidate(&reason).await;
                return Err(SshError::Io { host, reason });
            }
            Some(Ok(event)) => {
                session.touch();
                match event {
                    ExecEvent::Stdout(data) => stdout.push(&data),
                    ExecEvent::Stderr(data) => stderr.push(&data),
                    ExecEvent::Exit(code) => {
                        exit_code = Some(code);
                        if eof {
                            break;
                        }
                    }
                    ExecEvent::Eof => {
                        eof = true;
                        if exit_code.is_some() {
                            break;
                        }
                    }
                }
            }
        }
    }
    channel.close().await;

    // A channel that vanished without an exit status may have taken the connection with it
    if exit_code.is_none() && session.reconcile().await {
        return Err(SshError::Io {
            host,
            reason: "connection lost while the command was running".to_string(),
        });
    }

    let truncated = stdout.truncated || stderr.truncated;
    if truncated {
        warn!("Output of '{}' on {} truncated to {} bytes", command, host, max_output);
    }

    let result = CommandResult {
        command: command.to_string(),
        exit_code: exit_code.unwrap_or(-1),
        stdout: stdout.into_string(),
        stderr: stderr.into_string(),
        duration_ms: started.elapsed().as_millis() as u64,
        truncated,
    };
    debug!(
        "'{}' on {} exited {} after {}ms",
        command, host, result.exit_code, result.duration_ms
    );
    Ok(result)
}

/// Run `commands` in order on one session.
///
/// With `stop_on_error`, the first non-zero exit or error ends the batch. Without it,
/// non-zero exits and timeouts are recorded and the batch moves on; a transport failure
/// always ends it.
pub async fn execute_batch(
    session: &mut LiveSession,
    commands: &[String],
    timeout: Duration,
    max_output: usize,
    stop_on_error: bool,
) -> BatchResult {
    let host = session.host().name.clone();
    let mut results = Vec::with_capacity(commands.len());
    let mut success = true;
    let mut stopped = None;

    for (index, command) in commands.iter().enumerate() {
        match execute(session, command, timeout, max_output).await {
            Ok(result) => {
                let exit_code = result.exit_code;
                results.push(BatchEntry {
                    command: command.clone(),
                    result: Some(result),
                    error_kind: None,
                    error: None,
                });
                if exit_code != 0 {
                    success = false;
                    if stop_on_error {
                        stopped = Some(BatchStop {
                            index,
                            reason: BatchStopReason::NonZeroExit { exit_code },
                        });
                        break;
                    }
                }
            }
            Err(e) => {
                success = false;
                let is_timeout = matches!(e, SshError::Timeout { .. });
                results.push(BatchEntry {
                    command: command.clone(),
                    result: None,
                    error_kind: Some(e.kind()),
                    error: Some(e.to_string()),
                });
                // The session may be gone; nothing after this point can run reliably
                let transport_lost = !is_timeout || session.transport().is_err();
                if stop_on_error || transport_lost {
                    let reason = if is_timeout {
                        BatchStopReason::Timeout
                    } else {
                        BatchStopReason::Error {
                            kind: e.kind(),
                            message: e.to_string(),
                        }
                    };
                    stopped = Some(BatchStop { index, reason });
                    break;
                }
            }
        }
    }

    BatchResult {
        host,
        results,
        success,
        stopped,
    }
}
