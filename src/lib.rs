//! sari: a local code-intelligence daemon exposing a search-first MCP tool
//! surface over an indexed workspace.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │     stdio proxy (per-editor-session)         │
//! │  frames JSON-RPC, auto-spawns/finds daemon    │
//! └─────────────────┬───────────────────────────┘
//!                   │ TCP, Content-Length framed
//! ┌─────────────────▼───────────────────────────┐
//! │         daemon: MCP session + dispatch       │
//! │   tools/list, tools/call, search-first gate  │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │   workspace registry (in-process refcount +  │
//! │       cross-process file-locked JSON)        │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │        indexer (ignore-walk + symbols)       │
//! └─────────────────┬───────────────────────────┘
//!                   │
//! ┌─────────────────▼───────────────────────────┐
//! │     SQLite (r2d2 pool, WAL, FTS5 mirror)     │
//! └───────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod mcp;
pub mod proxy;
pub mod redaction;
pub mod registry;
pub mod security;
pub mod services;
pub mod tools;
pub mod types;

pub use error::{Result, ServerError};
pub use types::{FileId, Score};

use std::path::{Path, PathBuf};
use xxhash_rust::xxh3::xxh3_64;

/// Computes the default database path for a given workspace root.
///
/// The path is `~/.cache/sari/<hash>.db` where `<hash>` is the xxh3_64 hash
/// of the canonical root path, hex-encoded. This decouples index storage
/// from the indexed directory, avoiding `.gitignore` churn and write
/// permission requirements in the workspace itself.
#[must_use]
pub fn default_db_path(root: &Path) -> PathBuf {
    let hash = xxh3_64(root.to_string_lossy().as_bytes());

    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("sari");

    cache_dir.join(format!("{hash:016x}.db"))
}
