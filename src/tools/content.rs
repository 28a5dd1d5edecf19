//! `read_file`, `read_symbol`, and `list_files` tool bodies (§4.1, §4.10).
//!
//! # Security
//!
//! Every path argument is resolved against the workspace root through
//! `security::validate_read_access` before touching storage, rejecting
//! traversal out of the root and known-sensitive files (`.env`, keys, …).

use crate::db::Database;
use crate::error::{Result, ServerError};
use crate::security;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

fn resolve(root: &Path, user_path: &str) -> Result<String> {
    let resolved = security::validate_read_access(root, user_path).map_err(|e| ServerError::Tool(e.to_string()))?;
    Ok(resolved.to_string_lossy().into_owned())
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReadFileInput {
    /// Absolute path or relative path (if unique) to the file
    pub path: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReadFileOutput {
    pub path: String,
    pub repo: String,
    pub mtime: i64,
    pub size: i64,
    pub content: String,
}

/// Reads the full, currently-indexed content of one file.
///
/// # Errors
///
/// Returns `ServerError::Tool` for a traversal/sensitive-file rejection, or
/// `ServerError::Database(DbError::FileNotFound)` if the path isn't indexed.
pub fn execute_read_file(root: &Path, db: &Arc<Database>, input: ReadFileInput) -> Result<ReadFileOutput> {
    let resolved = resolve(root, &input.path)?;
    let (repo, mtime, size, content) = db
        .get_file(&resolved)?
        .ok_or_else(|| ServerError::Database(crate::error::DbError::FileNotFound { path: std::path::PathBuf::from(&input.path) }))?;
    Ok(ReadFileOutput { path: input.path, repo, mtime, size, content })
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ReadSymbolInput {
    /// File path containing the symbol
    pub path: String,
    /// Name of the symbol (function/class name)
    pub name: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ReadSymbolOutput {
    pub path: String,
    pub name: String,
    pub start_line: i64,
    pub end_line: i64,
    pub content: String,
    pub docstring: String,
}

/// Reads one symbol's definition block (§4.1: falls back to ten lines past
/// the start when extraction couldn't determine an end line).
///
/// # Errors
///
/// Returns `ServerError::Tool` for a traversal/sensitive-file rejection, or
/// `ServerError::Tool` if the symbol isn't found at that path.
pub fn execute_read_symbol(root: &Path, db: &Arc<Database>, input: ReadSymbolInput) -> Result<ReadSymbolOutput> {
    let resolved = resolve(root, &input.path)?;
    let block = db
        .get_symbol_block(&resolved, &input.name)?
        .ok_or_else(|| ServerError::Tool(format!("symbol '{}' not found in {}", input.name, input.path)))?;
    Ok(ReadSymbolOutput {
        path: input.path,
        name: block.name,
        start_line: block.start_line,
        end_line: block.end_line,
        content: block.content,
        docstring: block.docstring,
    })
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ListFilesInput {
    /// Filter by repository name
    pub repo: Option<String>,
    /// Glob pattern for path matching
    pub path_pattern: Option<String>,
    /// Filter by file extensions
    pub file_types: Option<Vec<String>>,
    /// Include hidden directories (default: false)
    pub include_hidden: Option<bool>,
    /// Return repo summary only (default: true when repo not specified)
    pub summary: Option<bool>,
    /// Maximum results (default: 100)
    pub limit: Option<usize>,
    /// Pagination offset (default: 0)
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct FileListEntry {
    pub repo: String,
    pub path: String,
    pub mtime: i64,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ListFilesOutput {
    pub files: Vec<FileListEntry>,
    pub total: i64,
    pub repo_summary: Vec<(String, i64)>,
}

/// Lists indexed files, or (when `repo` is omitted and `summary` isn't
/// explicitly `false`) just the per-repo file counts.
///
/// # Errors
///
/// Returns `ServerError::Database` on a storage failure.
pub fn execute_list_files(db: &Arc<Database>, input: ListFilesInput) -> Result<ListFilesOutput> {
    let repo_summary = db.repo_file_counts()?;
    let want_summary = input.summary.unwrap_or(input.repo.is_none());
    if want_summary && input.repo.is_none() {
        return Ok(ListFilesOutput { files: Vec::new(), total: repo_summary.iter().map(|(_, c)| c).sum(), repo_summary });
    }

    let like_pattern = input.path_pattern.as_deref().map(|p| p.replace('*', "%"));
    let (rows, total) = db.list_files(
        input.repo.as_deref(),
        like_pattern.as_deref(),
        input.include_hidden.unwrap_or(false),
        input.limit.unwrap_or(100).min(5000),
        input.offset.unwrap_or(0),
    )?;

    let types_filter = input.file_types.as_ref();
    let files = rows
        .into_iter()
        .filter(|row| {
            types_filter.is_none_or(|types| {
                let ext = Path::new(&row.path).extension().and_then(|e| e.to_str()).unwrap_or("");
                types.iter().any(|t| t.trim_start_matches('.') == ext)
            })
        })
        .map(|row| FileListEntry { repo: row.repo, path: row.path, mtime: row.mtime, size: row.size })
        .collect();

    Ok(ListFilesOutput { files, total, repo_summary })
}
