//! File transfer over the session's SFTP channel.
//!
//! Data moves in [`CHUNK_SIZE`] chunks and every chunk gets its own deadline, so the
//! transfer timeout is an inactivity timeout like the command timeout.
//!
//! Downloads never expose a partial file at the destination. Bytes land in a hidden
//! sibling `.<name>.<uuid>.part`, which is synced and renamed over the destination only
//! after the last chunk. Any failure removes the temporary file; an existing
//! destination is left as it was.
//!
//! Uploads write the remote path directly. A failed upload may leave a partial remote
//! file behind.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};

use crate::mcp::error::SshError;
use crate::mcp::manager::LiveSession;
use crate::mcp::transport::RemoteFiles;
use crate::mcp::types::TransferResult;

pub(crate) const CHUNK_SIZE: usize = 64 * 1024;

/// Await `fut` under the inactivity deadline.
async fn within<T>(
    session: &mut LiveSession,
    timeout: Duration,
    operation: &'static str,
    fut: impl Future<Output = T>,
) -> Result<T, SshError> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(value) => Ok(value),
        Err(_) => {
            session.reconcile().await;
            Err(SshError::Timeout {
                host: session.host().name.clone(),
                operation,
                seconds: timeout.as_secs(),
            })
        }
    }
}

/// Classify a remote-side failure by whether the connection survived it.
async fn remote_failure(session: &mut LiveSession, reason: String) -> SshError {
    let host = session.host().name.clone();
    if session.reconcile().await {
        SshError::Io { host, reason }
    } else {
        SshError::Remote { host, reason }
    }
}

async fn open_files(session: &mut LiveSession) -> Result<Box<dyn RemoteFiles>, SshError> {
    let host = session.host().name.clone();
    let opened = session.transport()?.open_files().await;
    match opened {
        Ok(files) => Ok(files),
        Err(reason) => {
            session.invalidate(&reason).await;
            Err(SshError::Io { host, reason })
        }
    }
}

fn local_error(action: &str, path: &Path, e: impl std::fmt::Display) -> SshError {
    SshError::Local(format!("Failed to {} {}: {}", action, path.display(), e))
}

/// Copy a local regular file to `remote_path`.
pub async fn upload(
    session: &mut LiveSession,
    local_path: &Path,
    remote_path: &str,
    timeout: Duration,
) -> Result<TransferResult, SshError> {
    let metadata = tokio::fs::metadata(local_path)
        .await
        .map_err(|e| local_error("read", local_path, e))?;
    if !metadata.is_file() {
        return Err(SshError::Local(format!(
            "{} is not a regular file",
            local_path.display()
        )));
    }
    let mut source = tokio::fs::File::open(local_path)
        .await
        .map_err(|e| local_error("open", local_path, e))?;

    let mut files = open_files(session).await?;
    let created = within(session, timeout, "upload", files.create(remote_path)).await?;
    let mut sink = match created {
        Ok(sink) => sink,
        Err(reason) => return Err(remote_failure(session, reason).await),
    };

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;
    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| local_error("read", local_path, e))?;
        if n == 0 {
            break;
        }
        let written = within(session, timeout, "upload", sink.write_all(&buf[..n])).await?;
        if let Err(e) = written {
            let reason = format!("Failed to write {}: {}", remote_path, e);
            return Err(remote_failure(session, reason).await);
        }
        bytes += n as u64;
        session.touch();
    }

    let closed = within(session, timeout, "upload", sink.shutdown()).await?;
    if let Err(e) = closed {
        let reason = format!("Failed to close {}: {}", remote_path, e);
        return Err(remote_failure(session, reason).await);
    }

    info!(
        "Uploaded {} bytes to {}:{}",
        bytes,
        session.host().name,
        remote_path
    );
    Ok(TransferResult {
        host: session.host().name.clone(),
        local_path: local_path.display().to_string(),
        remote_path: remote_path.to_string(),
        bytes,
    })
}

/// Hidden sibling path used while a download is in flight.
fn temp_path_for(local_path: &Path) -> Result<PathBuf, SshError> {
    let name = local_path
        .file_name()
        .ok_or_else(|| SshError::Local(format!("{} has no file name", local_path.display())))?;
    let temp_name = format!(
        ".{}.{}.part",
        name.to_string_lossy(),
        uuid::Uuid::new_v4()
    );
    Ok(local_path.with_file_name(temp_name))
}

/// Copy `remote_path` to `local_path`, replacing it only once the copy is complete.
pub async fn download(
    session: &mut LiveSession,
    remote_path: &str,
    local_path: &Path,
    timeout: Duration,
) -> Result<TransferResult, SshError> {
    let temp_path = temp_path_for(local_path)?;
    if let Some(parent) = local_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| local_error("create directory", parent, e))?;
    }

    let result = download_to(session, remote_path, &temp_path, timeout).await;
    let bytes = match result {
        Ok(bytes) => bytes,
        Err(e) => {
            if let Err(remove_err) = tokio::fs::remove_file(&temp_path).await
                && remove_err.kind() != std::io::ErrorKind::NotFound
            {
                warn!(
                    "Failed to remove partial download {}: {}",
                    temp_path.display(),
                    remove_err
                );
            }
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&temp_path, local_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(local_error("move download into", local_path, e));
    }

    info!(
        "Downloaded {} bytes from {}:{}",
        bytes,
        session.host().name,
        remote_path
    );
    Ok(TransferResult {
        host: session.host().name.clone(),
        local_path: local_path.display().to_string(),
        remote_path: remote_path.to_string(),
        bytes,
    })
}

async fn download_to(
    session: &mut LiveSession,
    remote_path: &str,
    temp_path: &Path,
    timeout: Duration,
) -> Result<u64, SshError> {
    let mut files = open_files(session).await?;
    let opened = within(session, timeout, "download", files.open_read(remote_path)).await?;
    let mut source = match opened {
        Ok(source) => source,
        Err(reason) => return Err(remote_failure(session, reason).await),
    };

    let mut sink = tokio::fs::File::create(temp_path)
        .await
        .map_err(|e| local_error("create", temp_path, e))?;

    let mut buf = vec![0u8; CHUNK_SIZE];
    let mut bytes = 0u64;
    loop {
        let read = within(session, timeout, "download", source.read(&mut buf)).await?;
        let n = match read {
            Ok(n) => n,
            Err(e) => {
                let reason = format!("Failed to read {}: {}", remote_path, e);
                return Err(remote_failure(session, reason).await);
            }
        };
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n])
            .await
            .map_err(|e| local_error("write", temp_path, e))?;
        bytes += n as u64;
        session.touch();
    }

    sink.sync_all()
        .await
        .map_err(|e| local_error("sync", temp_path, e))?;
    Ok(bytes)
}
