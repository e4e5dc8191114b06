//! Control socket: server (during `fetchq run`) and client (every other command).
//! Protocol: one JSON `Command` per line in, one JSON `Reply` per line out.

use anyhow::{Context, Result};
use fetchq_core::scheduler::{Command, OrchestratorHandle, Reply};
use std::io::ErrorKind;
use std::path::Path;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;

/// True if something is accepting connections on `path`.
pub async fn is_live(path: &Path) -> bool {
    UnixStream::connect(path).await.is_ok()
}

/// Bind `path` (replacing a stale socket file) and serve commands against
/// `handle` until the returned task is aborted.
pub fn spawn_control_listener(handle: OrchestratorHandle, path: &Path) -> Result<JoinHandle<()>> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }
    let _ = std::fs::remove_file(path);
    let listener = UnixListener::bind(path)
        .with_context(|| format!("bind control socket {}", path.display()))?;
    tracing::debug!(path = %path.display(), "control socket listening");

    Ok(tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let handle = handle.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(handle, stream).await {
                            tracing::debug!("control connection: {:#}", e);
                        }
                    });
                }
                Err(e) => tracing::debug!("control socket accept: {}", e),
            }
        }
    }))
}

async fn serve_connection(handle: OrchestratorHandle, stream: UnixStream) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match serde_json::from_str::<Command>(line) {
            Ok(command) => Reply::from_result(handle.execute(command).await),
            Err(e) => Reply::Err {
                message: format!("bad request: {}", e),
            },
        };
        let mut out = serde_json::to_vec(&reply)?;
        out.push(b'\n');
        write.write_all(&out).await?;
    }
    Ok(())
}

/// Send one command and wait for its reply. `Ok(None)` when no orchestrator
/// is listening (socket missing or stale).
pub async fn send_request(socket_path: &Path, command: &Command) -> Result<Option<Reply>> {
    let stream = match UnixStream::connect(socket_path).await {
        Ok(s) => s,
        Err(e) if matches!(e.kind(), ErrorKind::NotFound | ErrorKind::ConnectionRefused) => {
            return Ok(None)
        }
        Err(e) => {
            return Err(e).with_context(|| format!("connect {}", socket_path.display()));
        }
    };
    let (read, mut write) = stream.into_split();
    let mut request = serde_json::to_vec(command)?;
    request.push(b'\n');
    write.write_all(&request).await?;

    let mut lines = BufReader::new(read).lines();
    let line = lines
        .next_line()
        .await?
        .context("orchestrator closed the connection without replying")?;
    let reply = serde_json::from_str(&line).context("parse reply")?;
    Ok(Some(reply))
}
