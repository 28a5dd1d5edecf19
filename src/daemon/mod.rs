//! TCP daemon (§4.6): the long-lived process the proxy connects to. Accepts
//! one MCP session per connection, registers itself in the cross-process
//! `ServerRegistry` so other proxy processes can find it, and shuts down on
//! `SIGTERM`/`SIGINT` after draining in-flight sessions.

use crate::error::{Result, ServerError};
use crate::mcp::SariServer;
use crate::registry::{ServerRegistry, WorkspaceRegistry};
use crate::types::BootId;
use rmcp::ServiceExt;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Notify;

/// Runs the daemon until `SIGTERM`/`SIGINT` (or, on non-Unix, Ctrl-C).
///
/// `root` preloads a single workspace for every connection (the common
/// case: one project, one daemon); when `None`, each session must call
/// `add_workspace` itself, sharing the same in-process registry.
///
/// # Errors
///
/// Returns `ServerError::Io` if binding the listener fails, or
/// `ServerError::Registry` if registering with `ServerRegistry` fails.
pub async fn run(host: &str, port: u16, root: Option<PathBuf>) -> Result<()> {
    let listener = TcpListener::bind((host, port)).await.map_err(ServerError::Io)?;
    let bound_port = listener.local_addr().map_err(ServerError::Io)?.port();
    let pid = process::id();
    let boot_id = BootId::generate(pid, bound_port);

    let server_registry = Arc::new(ServerRegistry::new(ServerRegistry::default_path()));
    server_registry.register_daemon(&boot_id, host, bound_port, pid, env!("CARGO_PKG_VERSION"))?;
    if let Some(ref root) = root {
        server_registry.set_workspace(root, &boot_id)?;
    }

    let workspace_registry = Arc::new(WorkspaceRegistry::new());
    let shutdown = Arc::new(Notify::new());

    tracing::info!(host, port = bound_port, pid, "sari daemon listening");

    let shutdown_signal = {
        let shutdown = Arc::clone(&shutdown);
        async move {
            wait_for_shutdown_signal().await;
            shutdown.notify_waiters();
        }
    };

    let accept_loop = {
        let workspace_registry = Arc::clone(&workspace_registry);
        let server_registry = Arc::clone(&server_registry);
        let boot_id = boot_id.clone();
        let root = root.clone();
        let shutdown = Arc::clone(&shutdown);
        async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, peer)) = accepted else { continue };
                        let registry = Arc::clone(&workspace_registry);
                        let server_registry = Arc::clone(&server_registry);
                        let boot_id = boot_id.clone();
                        let root = root.clone();
                        tokio::spawn(async move {
                            let _ = server_registry.touch_daemon(&boot_id);
                            if let Err(e) = handle_connection(stream, registry, root).await {
                                tracing::warn!(%peer, error = %e, "session ended with error");
                            }
                        });
                    }
                    () = shutdown.notified() => break,
                }
            }
        }
    };

    tokio::select! {
        () = accept_loop => {},
        () = shutdown_signal => {},
    }

    tracing::info!("sari daemon shutting down");
    if let Some(ref root) = root {
        let _ = server_registry.unregister_workspace(root);
    }
    let _ = server_registry.unregister_daemon(&boot_id);
    Ok(())
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    registry: Arc<WorkspaceRegistry>,
    root: Option<PathBuf>,
) -> Result<()> {
    let (read_half, write_half) = tokio::io::split(stream);
    let server = match root {
        Some(root) => SariServer::new(Arc::clone(&registry), root)?,
        None => SariServer::new_empty(Arc::clone(&registry)),
    };
    let serve_result = server.serve((read_half, write_half)).await.map_err(|e| ServerError::Tool(e.to_string()));
    let (active_root, wait_result) = match serve_result {
        Ok(running) => {
            let active_root = running.service().active_root();
            let wait_result = running.waiting().await.map_err(|e| ServerError::Tool(e.to_string())).map(|_| ());
            (active_root, wait_result)
        }
        Err(e) => (None, Err(e)),
    };
    if let Some(root) = active_root {
        registry.release(&root);
    }
    wait_result
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {},
        _ = sigint.recv() => {},
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
