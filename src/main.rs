//! sari: local code-intelligence daemon.
//!
//! Usage:
//!   sari daemon start [-d]   Start the daemon (foreground or background)
//!   sari daemon stop         Stop a running daemon
//!   sari daemon status      Check daemon status
//!   sari proxy               Run in proxy mode (stdio <-> daemon), for editors
//!   sari --mcp               Run a single-shot MCP server directly on stdio
//!   sari search <query>      One-shot search, no daemon required
//!   sari rescan              One-shot index build/refresh
//!   sari status              One-shot index status
//!   sari doctor              One-shot health checks

use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use rmcp::ServiceExt;
use sari::registry::{ServerRegistry, WorkspaceRegistry};
use sari::tools;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 47779;

#[derive(Parser)]
#[command(name = "sari")]
#[command(about = "Local code-intelligence daemon: search-first MCP tool surface")]
#[command(version)]
struct Cli {
    /// Run a single-shot MCP server directly on stdin/stdout (no daemon/proxy split)
    #[arg(long)]
    mcp: bool,

    /// Workspace root directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Database path override (default: derived from the workspace root)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Daemon management
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },

    /// Run in proxy mode: stdio <-> daemon, auto-starting the daemon if needed
    Proxy {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },

    /// One-shot hybrid search against the workspace (no daemon required)
    Search {
        query: String,
        #[arg(short, long)]
        repo: Option<String>,
        #[arg(short, long, default_value = "20")]
        limit: usize,
        #[arg(long)]
        json: bool,
    },

    /// One-shot full incremental rescan
    Rescan,

    /// One-shot index status
    Status {
        #[arg(short, long)]
        details: bool,
    },

    /// One-shot health checks
    Doctor,
}

#[derive(Subcommand)]
enum DaemonAction {
    /// Start the daemon
    Start {
        /// Run detached in the background instead of blocking the terminal
        #[arg(short, long)]
        daemonize: bool,
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Stop a running daemon
    Stop {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
    /// Check daemon status
    Status {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // CRITICAL: log to stderr only. Both stdio and TCP transports carry
    // JSON-RPC on stdout/the socket; anything else on those streams corrupts
    // the wire protocol.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sari=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let root = dunce::canonicalize(&cli.root).unwrap_or(cli.root);

    if cli.mcp {
        return run_mcp_stdio(root).await;
    }

    match cli.command {
        Some(Commands::Daemon { action }) => run_daemon_action(action, root).await,
        Some(Commands::Proxy { host, port }) => {
            sari::proxy::run(&host, port, Some(root)).await.map_err(|e| anyhow::anyhow!(e))
        }
        Some(Commands::Search { query, repo, limit, json }) => {
            run_search(root, cli.db, query, repo, limit, json).await
        }
        Some(Commands::Rescan) => run_rescan(root, cli.db).await,
        Some(Commands::Status { details }) => run_status(root, cli.db, details).await,
        Some(Commands::Doctor) => run_doctor(root, cli.db).await,
        None => {
            eprintln!("Use --mcp to run a single-shot MCP server, or a subcommand. See --help.");
            std::process::exit(1);
        }
    }
}

async fn run_mcp_stdio(root: PathBuf) -> anyhow::Result<()> {
    tracing::info!(root = %root.display(), "starting stdio MCP server");
    let registry = std::sync::Arc::new(WorkspaceRegistry::new());
    let server = sari::mcp::SariServer::new(registry, root)?;
    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;
    Ok(())
}

async fn run_daemon_action(action: DaemonAction, root: PathBuf) -> anyhow::Result<()> {
    match action {
        DaemonAction::Start { daemonize, host, port } => {
            if daemonize {
                sari::proxy::ensure_daemon_running(&host, port, Some(&root))
                    .await
                    .map_err(|e| anyhow::anyhow!(e))?;
                println!("{} daemon listening on {host}:{port}", "started".green());
                Ok(())
            } else {
                println!("Starting daemon on {host}:{port} (foreground, Ctrl+C to stop)...");
                sari::daemon::run(&host, port, Some(root)).await.map_err(|e| anyhow::anyhow!(e))
            }
        }
        DaemonAction::Stop { host, port } => {
            let registry = ServerRegistry::new(ServerRegistry::default_path());
            let Some(entry) = registry.resolve_workspace_daemon(&root).map_err(|e| anyhow::anyhow!(e))? else {
                println!("No daemon registered for this workspace.");
                return Ok(());
            };
            if entry.host != host || entry.port != port {
                tracing::warn!(registered_port = entry.port, requested_port = port, "daemon port mismatch; stopping the registered one");
            }
            stop_pid(entry.pid, &entry.host, entry.port).await
        }
        DaemonAction::Status { host, port } => {
            let reachable = tokio::time::timeout(std::time::Duration::from_millis(300), tokio::net::TcpStream::connect((host.as_str(), port)))
                .await
                .is_ok_and(|r| r.is_ok());
            println!("Host: {host}");
            println!("Port: {port}");
            println!("Status: {}", if reachable { "running".green().to_string() } else { "stopped".red().to_string() });

            let registry = ServerRegistry::new(ServerRegistry::default_path());
            if let Some(entry) = registry.resolve_workspace_daemon(&root).map_err(|e| anyhow::anyhow!(e))? {
                println!("PID: {}", entry.pid);
                println!("Version: {}", entry.version);
                println!("Draining: {}", entry.draining);
            }
            Ok(())
        }
    }
}

#[cfg(unix)]
async fn stop_pid(pid: u32, host: &str, port: u16) -> anyhow::Result<()> {
    // SAFETY: pid comes from our own registry entry for a process we expect to own.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    for _ in 0..30 {
        let reachable = tokio::time::timeout(std::time::Duration::from_millis(100), tokio::net::TcpStream::connect((host, port)))
            .await
            .is_ok_and(|r| r.is_ok());
        if !reachable {
            println!("{}", "daemon stopped".green());
            return Ok(());
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    tracing::warn!(pid, "daemon not responding to SIGTERM, sending SIGKILL");
    // SAFETY: same pid as above, escalating after a graceful-shutdown timeout.
    unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    println!("{}", "daemon killed".yellow());
    Ok(())
}

#[cfg(not(unix))]
async fn stop_pid(_pid: u32, _host: &str, _port: u16) -> anyhow::Result<()> {
    anyhow::bail!("stopping a daemon by PID is only supported on unix; send it Ctrl+C directly")
}

async fn run_search(root: PathBuf, db: Option<PathBuf>, query: String, repo: Option<String>, limit: usize, json: bool) -> anyhow::Result<()> {
    use sari::config::Config;
    use sari::db::Database;
    use sari::services::SearchService;
    use std::sync::Arc;

    let config = Config::load(&root)?;
    let db_path = db.or(config.db_path.clone()).unwrap_or_else(|| sari::default_db_path(&root));
    let database = Arc::new(Database::open(&db_path)?);
    let search = Arc::new(SearchService::new(Arc::clone(&database)));

    let input = tools::SearchInput {
        query,
        repo,
        repo_name: None,
        limit: Some(limit),
        offset: None,
        snippet_lines: None,
        recency_boost: None,
        case_sensitive: None,
        path_pattern: None,
        file_types: None,
        exclude_patterns: None,
        use_regex: None,
    };
    let result = tools::execute_search(&search, input).map_err(|e| anyhow::anyhow!(e))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }
    for hit in &result.hits {
        println!("{} {} ({:.2})", hit.path.bold(), hit.repo.dimmed(), hit.score);
        if !hit.snippet.is_empty() {
            println!("  {}", hit.snippet.dimmed());
        }
    }
    println!("\n{} hits ({} total, {})", result.hits.len(), result.total, result.total_mode);
    Ok(())
}

async fn run_rescan(root: PathBuf, db: Option<PathBuf>) -> anyhow::Result<()> {
    use sari::config::Config;
    use sari::db::Database;
    use sari::services::Indexer;
    use std::sync::Arc;

    let config = Config::load(&root)?;
    let db_path = db.or(config.db_path.clone()).unwrap_or_else(|| sari::default_db_path(&root));
    let database = Arc::new(Database::open(&db_path)?);
    let indexer = Arc::new(Indexer::new(Arc::clone(&database), root.clone(), config));

    let result = tools::execute_rescan(&indexer, tools::RescanInput {}).map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_status(root: PathBuf, db: Option<PathBuf>, details: bool) -> anyhow::Result<()> {
    use sari::config::Config;
    use sari::db::Database;
    use std::sync::Arc;

    let config = Config::load(&root)?;
    let db_path = db.or(config.db_path.clone()).unwrap_or_else(|| sari::default_db_path(&root));
    let database = Arc::new(Database::open(&db_path)?);

    let input = tools::StatusInput { details: Some(details) };
    let result = tools::execute_status(&database, &config, &root, env!("CARGO_PKG_VERSION"), input)
        .map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn run_doctor(root: PathBuf, db: Option<PathBuf>) -> anyhow::Result<()> {
    use sari::config::Config;
    use sari::db::Database;
    use std::collections::HashMap;
    use std::sync::Arc;

    let config = Config::load(&root)?;
    let db_path = db.or(config.db_path.clone()).unwrap_or_else(|| sari::default_db_path(&root));
    let database = Arc::new(Database::open(&db_path)?);

    let mode = config.resolve_search_first_mode();
    let result = tools::execute_doctor(&database, &root, HashMap::new(), &mode, tools::DoctorInput {
        include_network: None,
        include_port: None,
        include_db: None,
        include_disk: None,
        include_daemon: None,
        port: Some(DEFAULT_PORT),
        min_disk_gb: None,
    })
    .map_err(|e| anyhow::anyhow!(e))?;

    for check in &result.checks {
        let mark = if check.ok { "ok".green().to_string() } else { "FAIL".red().to_string() };
        println!("[{mark}] {}: {}", check.name, check.detail);
    }
    if !result.ok {
        std::process::exit(1);
    }
    Ok(())
}
