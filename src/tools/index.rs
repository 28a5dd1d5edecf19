//! `rescan`, `index_file`, `doctor`, and `deckard_guide` tool bodies
//! (§4.1, §4.3, §4.10).

use crate::db::Database;
use crate::error::{Result, ServerError};
use crate::registry::ServerRegistry;
use crate::security;
use crate::services::Indexer;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, JsonSchema, Default)]
pub struct RescanInput {}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RescanOutput {
    pub files_seen: usize,
    pub files_indexed: usize,
    pub files_unchanged: usize,
    pub files_deleted: usize,
    pub files_failed: usize,
}

/// Triggers a full incremental rescan of the workspace (§4.3).
///
/// # Errors
///
/// Returns `ServerError::Index` if the scan itself fails (individual file
/// failures are recorded in the returned counters, not this `Result`).
pub fn execute_rescan(indexer: &Arc<Indexer>, _input: RescanInput) -> Result<RescanOutput> {
    let summary = indexer.scan(None)?;
    Ok(RescanOutput {
        files_seen: summary.files_seen,
        files_indexed: summary.files_indexed,
        files_unchanged: summary.files_unchanged,
        files_deleted: summary.files_deleted,
        files_failed: summary.files_failed,
    })
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct IndexFileInput {
    /// Absolute or relative path to the file to re-index
    pub path: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct IndexFileOutput {
    pub path: String,
    pub indexed: bool,
}

/// Forces immediate re-indexing of one file, synthesizing a single watcher
/// event rather than waiting for the next full rescan.
///
/// # Errors
///
/// Returns `ServerError::Tool` for a traversal/sensitive-file rejection, or
/// `ServerError::Index` if the file can't be read/hashed.
pub fn execute_index_file(root: &Path, indexer: &Arc<Indexer>, input: IndexFileInput) -> Result<IndexFileOutput> {
    let resolved = security::validate_read_access(root, &input.path).map_err(|e| ServerError::Tool(e.to_string()))?;
    let indexed = indexer.index_file(&resolved)?;
    Ok(IndexFileOutput { path: input.path, indexed })
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DoctorInput {
    /// Check TCP port availability (default: true)
    pub include_network: Option<bool>,
    /// Check the daemon's claimed port specifically (default: true)
    pub include_port: Option<bool>,
    /// Check database schema and FTS5 availability (default: true)
    pub include_db: Option<bool>,
    /// Check free disk space at the database path (default: true)
    pub include_disk: Option<bool>,
    /// Check whether a daemon is registered and live for this workspace (default: true)
    pub include_daemon: Option<bool>,
    /// Port to probe for `include_port` (default: 47779)
    pub port: Option<u16>,
    /// Minimum free disk space, in GiB, before flagging low-disk (default: 1.0)
    pub min_disk_gb: Option<f64>,
}

#[derive(Debug, Clone, Serialize, JsonSchema, Default)]
pub struct DoctorOutput {
    pub ok: bool,
    pub checks: Vec<DoctorCheck>,
    pub search_usage: HashMap<String, u64>,
    pub search_first_mode: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DoctorCheck {
    pub name: String,
    pub ok: bool,
    pub detail: String,
}

/// Runs structured health checks (§4.10): DB schema/FTS presence, port
/// availability, disk space, daemon liveness. Orchestration beyond this
/// JSON contract (auto-fix actions, OS-specific probes) is a CLI concern.
///
/// # Errors
///
/// Returns `ServerError::Database` if the DB-health query itself fails.
pub fn execute_doctor(
    db: &Arc<Database>,
    root: &Path,
    search_usage: HashMap<String, u64>,
    search_first_mode: &str,
    input: DoctorInput,
) -> Result<DoctorOutput> {
    let mut checks = Vec::new();

    if input.include_db.unwrap_or(true) {
        let status = db.get_index_status()?;
        checks.push(DoctorCheck {
            name: "db_schema".to_string(),
            ok: true,
            detail: format!("{} files indexed, {} bytes on disk", status.total_files, status.db_size_bytes),
        });
        checks.push(DoctorCheck {
            name: "fts5".to_string(),
            ok: db.fts_enabled(),
            detail: if db.fts_enabled() { "FTS5 available".to_string() } else { "falling back to LIKE search".to_string() },
        });
    }

    if input.include_disk.unwrap_or(true) {
        let min_gb = input.min_disk_gb.unwrap_or(1.0);
        let (ok, detail) = match disk_free_gb(root) {
            Some(free_gb) => (free_gb >= min_gb, format!("{free_gb:.2} GiB free")),
            None => (true, "disk space unavailable on this platform".to_string()),
        };
        checks.push(DoctorCheck { name: "disk_space".to_string(), ok, detail });
    }

    if input.include_network.unwrap_or(true) || input.include_port.unwrap_or(true) {
        let port = input.port.unwrap_or(47800);
        let ok = TcpListener::bind(("127.0.0.1", port)).is_ok();
        checks.push(DoctorCheck {
            name: "port_available".to_string(),
            ok,
            detail: if ok { format!("port {port} is free") } else { format!("port {port} is in use") },
        });
    }

    if input.include_daemon.unwrap_or(true) {
        let registry = ServerRegistry::new(ServerRegistry::default_path());
        let (ok, detail) = match registry.resolve_workspace_daemon(root) {
            Ok(Some(entry)) => (true, format!("daemon pid {} on {}:{}", entry.pid, entry.host, entry.port)),
            Ok(None) => (true, "no daemon registered for this workspace (stdio mode is fine)".to_string()),
            Err(e) => (false, e.to_string()),
        };
        checks.push(DoctorCheck { name: "daemon".to_string(), ok, detail });
    }

    let ok = checks.iter().all(|c| c.ok);
    Ok(DoctorOutput { ok, checks, search_usage, search_first_mode: search_first_mode.to_string() })
}

#[cfg(unix)]
fn disk_free_gb(path: &Path) -> Option<f64> {
    let c_path = std::ffi::CString::new(path.to_string_lossy().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    let bytes = stat.f_bavail as f64 * stat.f_frsize as f64;
    Some(bytes / (1024.0 * 1024.0 * 1024.0))
}

#[cfg(not(unix))]
fn disk_free_gb(_path: &Path) -> Option<f64> {
    None
}

#[derive(Debug, Clone, Deserialize, JsonSchema, Default)]
pub struct DeckardGuideInput {}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct DeckardGuideOutput {
    pub guide: String,
}

/// Returns the short usage preamble LLM clients call on self-orientation,
/// before making their first tool call.
#[must_use]
pub fn execute_deckard_guide(_input: DeckardGuideInput) -> DeckardGuideOutput {
    DeckardGuideOutput {
        guide: "sari indexes this workspace for code search. Call 'search' or \
            'search_symbols' before 'read_file'/'read_symbol' so results stay \
            grounded in what the index actually contains, rather than guessing \
            paths. 'repo_candidates' narrows which repo to search first in a \
            multi-repo workspace. 'status' and 'doctor' report index health; \
            'rescan' and 'index_file' force a refresh if content looks stale."
            .to_string(),
    }
}
