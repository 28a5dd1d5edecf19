//! `get_callers`, `get_implementations`, and `status` tool bodies (§4.1, §4.10).

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RelationEntry {
    pub from_path: String,
    pub from_symbol: String,
    pub to_path: String,
    pub to_symbol: String,
    pub rel_type: String,
    pub line: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetCallersInput {
    /// Name of the symbol to find callers for
    pub name: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct GetCallersOutput {
    pub callers: Vec<RelationEntry>,
}

/// Finds call sites of `name`, extracted alongside symbols during indexing.
///
/// # Errors
///
/// Returns `ServerError::Database` on a storage failure.
pub fn execute_get_callers(db: &Arc<Database>, input: GetCallersInput) -> Result<GetCallersOutput> {
    let hits = db.get_callers(&input.name)?;
    Ok(GetCallersOutput { callers: hits.into_iter().map(map_relation).collect() })
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetImplementationsInput {
    /// Name of the symbol (interface/class) to find implementations for
    pub name: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct GetImplementationsOutput {
    pub implementations: Vec<RelationEntry>,
}

/// Finds `impl`/`extends` relations targeting `name`.
///
/// # Errors
///
/// Returns `ServerError::Database` on a storage failure.
pub fn execute_get_implementations(
    db: &Arc<Database>,
    input: GetImplementationsInput,
) -> Result<GetImplementationsOutput> {
    let hits = db.get_implementations(&input.name)?;
    Ok(GetImplementationsOutput { implementations: hits.into_iter().map(map_relation).collect() })
}

fn map_relation(hit: crate::db::RelationHit) -> RelationEntry {
    RelationEntry {
        from_path: hit.from_path,
        from_symbol: hit.from_symbol,
        to_path: hit.to_path,
        to_symbol: hit.to_symbol,
        rel_type: hit.rel_type.as_str().to_string(),
        line: hit.line,
    }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct StatusInput {
    /// Include detailed repo stats (default: false)
    pub details: Option<bool>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RepoStat {
    pub repo: String,
    pub files: i64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct StatusOutput {
    pub version: String,
    pub workspace_root: String,
    pub fts_enabled: bool,
    pub total_files: i64,
    pub last_scan_time: i64,
    pub db_size_bytes: i64,
    pub failed_task_count: i64,
    pub search_first_mode: String,
    pub repos: Option<Vec<RepoStat>>,
}

/// Reports indexer/database health for a workspace; `details=true` adds a
/// per-repo file-count breakdown.
///
/// # Errors
///
/// Returns `ServerError::Database` on a storage failure.
pub fn execute_status(
    db: &Arc<Database>,
    config: &Config,
    root: &Path,
    version: &str,
    input: StatusInput,
) -> Result<StatusOutput> {
    let index_status = db.get_index_status()?;
    let failed = db.failed_task_count()?;
    let repos = if input.details.unwrap_or(false) {
        Some(db.repo_file_counts()?.into_iter().map(|(repo, files)| RepoStat { repo, files }).collect())
    } else {
        None
    };
    Ok(StatusOutput {
        version: version.to_string(),
        workspace_root: root.display().to_string(),
        fts_enabled: db.fts_enabled(),
        total_files: index_status.total_files,
        last_scan_time: index_status.last_scan_time,
        db_size_bytes: index_status.db_size_bytes,
        failed_task_count: failed,
        search_first_mode: config.resolve_search_first_mode(),
        repos,
    })
}
