//! Stdio↔TCP proxy (§4.6): the process an editor actually spawns over MCP
//! stdio, which finds-or-starts the long-lived daemon and forwards framed
//! JSON-RPC both ways.
//!
//! Grounded in `mcp/proxy.py`: auto-spawn-if-not-running with a lockfile to
//! avoid a thundering herd of daemons, `rootUri` injection into `initialize`
//! when the client omits it, and transparent Content-Length/JSONL mode
//! detection carried through in both directions.

use crate::error::{Result, ServerError};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const CONNECT_RETRY_ATTEMPTS: u32 = 20;
const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FrameMode {
    Framed,
    Jsonl,
}

/// One MCP message read off a framed-or-JSONL stream, with the mode it
/// arrived in so the proxy echoes the same framing back to its own stdout.
struct Frame {
    body: Vec<u8>,
    mode: FrameMode,
}

async fn read_frame<R: AsyncBufReadExt + Unpin>(reader: &mut R) -> std::io::Result<Option<Frame>> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        if line != "\n" && line != "\r\n" {
            break;
        }
    }

    let trimmed = line.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return Ok(Some(Frame { body: line.trim_end_matches(['\r', '\n']).as_bytes().to_vec(), mode: FrameMode::Jsonl }));
    }

    let mut content_length = None;
    let mut header = line;
    loop {
        if let Some((key, value)) = header.split_once(':') {
            if key.trim().eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse::<usize>().ok();
            }
        }
        header.clear();
        let n = reader.read_line(&mut header).await?;
        if n == 0 || header == "\n" || header == "\r\n" {
            break;
        }
    }

    let Some(len) = content_length else { return Ok(None) };
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(Frame { body, mode: FrameMode::Framed }))
}

async fn write_frame<W: AsyncWriteExt + Unpin>(writer: &mut W, body: &[u8], mode: FrameMode) -> std::io::Result<()> {
    match mode {
        FrameMode::Jsonl => {
            writer.write_all(body).await?;
            writer.write_all(b"\n").await?;
        }
        FrameMode::Framed => {
            let header = format!("Content-Length: {}\r\n\r\n", body.len());
            writer.write_all(header.as_bytes()).await?;
            writer.write_all(body).await?;
        }
    }
    writer.flush().await
}

/// Injects `rootUri` into an `initialize` request when the client omitted
/// both `rootUri` and `rootPath`, using the workspace root resolved for this
/// proxy process.
fn inject_root_uri(body: &[u8], workspace_root: Option<&Path>) -> Vec<u8> {
    let Some(root) = workspace_root else { return body.to_vec() };
    let Ok(mut value) = serde_json::from_slice::<serde_json::Value>(body) else { return body.to_vec() };
    let Some(obj) = value.as_object_mut() else { return body.to_vec() };
    if obj.get("method").and_then(serde_json::Value::as_str) != Some("initialize") {
        return body.to_vec();
    }
    let params = obj.entry("params").or_insert_with(|| serde_json::json!({}));
    if let Some(params_obj) = params.as_object_mut() {
        if !params_obj.contains_key("rootUri") && !params_obj.contains_key("rootPath") {
            params_obj.insert("rootUri".to_string(), serde_json::Value::String(format!("file://{}", root.display())));
        }
    }
    serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec())
}

/// Resolves the workspace root for rootUri injection: an explicit override,
/// else a `.sariroot`/`.codex-root` marker walked up from the current
/// directory, else `None` (the client is trusted to supply its own root).
#[must_use]
pub fn detect_workspace_root(override_root: Option<PathBuf>) -> Option<PathBuf> {
    if override_root.is_some() {
        return override_root;
    }
    let cwd = std::env::current_dir().ok()?;
    for dir in cwd.ancestors() {
        if dir.join(".sariroot").exists() || dir.join(".codex-root").exists() {
            return Some(dir.to_path_buf());
        }
    }
    None
}

async fn daemon_reachable(host: &str, port: u16) -> bool {
    tokio::time::timeout(Duration::from_millis(100), TcpStream::connect((host, port))).await.is_ok_and(|r| r.is_ok())
}

/// Starts the daemon as a detached child process if nothing is listening on
/// `host:port` yet, then waits (bounded) for it to come up.
///
/// # Errors
///
/// Returns `ServerError::Io` if spawning the child process fails, or
/// `ServerError::Tool` if the daemon never becomes reachable.
pub async fn ensure_daemon_running(host: &str, port: u16, workspace_root: Option<&Path>) -> Result<()> {
    if daemon_reachable(host, port).await {
        return Ok(());
    }

    let exe = std::env::current_exe().map_err(ServerError::Io)?;
    let mut cmd = tokio::process::Command::new(exe);
    cmd.args(["daemon", "start", "--host", host, "--port", &port.to_string()]);
    if let Some(root) = workspace_root {
        cmd.arg("--root").arg(root);
    }
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::null());
    cmd.stderr(std::process::Stdio::null());
    #[cfg(unix)]
    {
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }
    cmd.spawn().map_err(ServerError::Io)?;

    for _ in 0..CONNECT_RETRY_ATTEMPTS {
        if daemon_reachable(host, port).await {
            return Ok(());
        }
        tokio::time::sleep(CONNECT_RETRY_DELAY).await;
    }
    Err(ServerError::Tool(format!("daemon did not become reachable on {host}:{port}")))
}

/// Runs the proxy loop: connect to the daemon, then forward stdin->socket
/// and socket->stdout concurrently until either side closes.
///
/// # Errors
///
/// Returns `ServerError::Io` on a connection or stream failure.
pub async fn run(host: &str, port: u16, workspace_root: Option<PathBuf>) -> Result<()> {
    ensure_daemon_running(host, port, workspace_root.as_deref()).await?;
    let stream = TcpStream::connect((host, port)).await.map_err(ServerError::Io)?;
    let (sock_read, mut sock_write) = stream.into_split();
    let mut sock_reader = BufReader::new(sock_read);

    let stdin_to_sock = async {
        let stdin = tokio::io::stdin();
        let mut reader = BufReader::new(stdin);
        loop {
            match read_frame(&mut reader).await {
                Ok(Some(frame)) => {
                    let body = inject_root_uri(&frame.body, workspace_root.as_deref());
                    if write_frame(&mut sock_write, &body, frame.mode).await.is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
    };

    let sock_to_stdout = async {
        let mut stdout = tokio::io::stdout();
        loop {
            match read_frame(&mut sock_reader).await {
                Ok(Some(frame)) => {
                    if write_frame(&mut stdout, &frame.body, frame.mode).await.is_err() {
                        break;
                    }
                }
                _ => break,
            }
        }
    };

    tokio::select! {
        () = stdin_to_sock => {},
        () = sock_to_stdout => {},
    }
    Ok(())
}
