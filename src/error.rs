//! Error types for sari.
//!
//! Uses thiserror for ergonomic error handling with proper error chain
//! propagation. Every leaf enum carries a machine-readable `code()` and an
//! `is_client_fixable()` classification so the MCP tool dispatcher (see
//! `mcp::tools::dispatch`) can decide whether to surface the failure as a
//! `CallToolResult::error` the calling model can act on, or collapse it into
//! an opaque JSON-RPC `-32000` that only a human operator should see.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level server error.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tool error: {0}")]
    Tool(String),
}

/// Database-specific errors (§7 "Transient storage" / "Corrupted state").
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Schema migration failed: {0}")]
    Migration(String),

    #[error("File not found in database: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Database is locked")]
    Locked,
}

/// Search operation errors.
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(String),

    #[error("Search timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("No results found")]
    NoResults,

    #[error("Search cancelled")]
    Cancelled,
}

/// Indexing errors (§7 "Indexer failures" — never propagate across a tool
/// boundary, they land in the `failed_tasks` dead-letter queue instead).
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Failed to index file {path}: {reason}")]
    FileIndex { path: PathBuf, reason: String },

    #[error("Hash computation failed: {0}")]
    Hash(String),

    #[error("Symbol extraction failed for {path}: {reason}")]
    SymbolExtraction { path: PathBuf, reason: String },

    #[error("Index is stale and needs rebuild")]
    Stale,

    #[error("Index corruption detected: {0}")]
    Corruption(String),
}

/// Cross-process server registry errors (§4.5).
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("registry file lock could not be acquired: {0}")]
    LockFailed(String),

    #[error("registry file is corrupt and could not be parsed: {0}")]
    CorruptFile(String),

    #[error("no live daemon is registered for workspace {0}")]
    NoDaemonForWorkspace(PathBuf),

    #[error("no free port available starting from {0}")]
    NoFreePort(u16),

    #[error("io error accessing registry file: {0}")]
    Io(#[from] std::io::Error),
}

/// Wire-protocol / JSON-RPC framing errors (§4.8, §7 "Protocol").
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("method not found: {0}")]
    MethodNotFound(String),

    #[error("invalid params: {0}")]
    InvalidParams(String),

    #[error("message body of {0} bytes exceeds the 10MiB limit")]
    BodyTooLarge(usize),

    #[error("method {method} is not permitted in session state {state}")]
    InvalidState { method: String, state: String },

    #[error("unsupported protocol version: {requested}")]
    UnsupportedVersion { requested: String },

    #[error("request queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },
}

impl ProtocolError {
    /// JSON-RPC 2.0 numeric error code for this failure.
    #[must_use]
    pub const fn rpc_code(&self) -> i64 {
        match self {
            Self::Parse(_) | Self::BodyTooLarge(_) => -32700,
            Self::InvalidRequest(_) => -32600,
            Self::MethodNotFound(_) => -32601,
            Self::InvalidParams(_) | Self::UnsupportedVersion { .. } => -32602,
            Self::InvalidState { .. } => -32000,
            Self::QueueFull { .. } => -32003,
        }
    }
}

/// Search-first policy violations (§4.9).
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("search-first policy active: call search/search_symbols before {tool}")]
    SearchFirstRequired { tool: String },
}

/// Result type alias for server operations.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Result type alias for database operations.
pub type DbResult<T> = std::result::Result<T, DbError>;

/// Result type alias for search operations.
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Result type alias for index operations.
pub type IndexResult<T> = std::result::Result<T, IndexError>;

impl ServerError {
    /// Machine-readable error code, stable across releases.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(e) => e.code(),
            Self::Search(e) => e.code(),
            Self::Index(e) => e.code(),
            Self::Registry(e) => e.code(),
            Self::Protocol(e) => e.code(),
            Self::Policy(e) => e.code(),
            Self::Io(_) => "IO_ERROR",
            Self::Json(_) => "JSON_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Tool(_) => "TOOL_ERROR",
        }
    }

    /// Whether the caller (an LLM driving the tool) can plausibly fix this by
    /// changing its next call — e.g. a bad regex or an unknown path — versus
    /// a server-side condition it has no lever over (DB corruption, IO
    /// failure). Tool handlers use this to choose between a `CallToolResult`
    /// error (visible, actionable) and letting the dispatcher collapse it
    /// into an opaque protocol-level error.
    #[must_use]
    pub fn is_client_fixable(&self) -> bool {
        match self {
            Self::Search(e) => e.is_client_fixable(),
            Self::Policy(_) => true,
            Self::Database(DbError::FileNotFound { .. }) => true,
            Self::Config(_) | Self::Tool(_) => true,
            _ => false,
        }
    }
}

impl DbError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "SQLITE_ERROR",
            Self::Pool(_) => "POOL_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::FileNotFound { .. } => "FILE_NOT_FOUND",
            Self::Locked => "DB_LOCKED",
        }
    }
}

impl SearchError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPattern(_) => "INVALID_PATTERN",
            Self::Timeout { .. } => "TIMEOUT",
            Self::NoResults => "NO_RESULTS",
            Self::Cancelled => "CANCELLED",
        }
    }

    #[must_use]
    pub const fn is_client_fixable(&self) -> bool {
        matches!(self, Self::InvalidPattern(_) | Self::NoResults)
    }
}

impl IndexError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::FileIndex { .. } => "FILE_INDEX_ERROR",
            Self::Hash(_) => "HASH_ERROR",
            Self::SymbolExtraction { .. } => "SYMBOL_EXTRACTION_ERROR",
            Self::Stale => "INDEX_STALE",
            Self::Corruption(_) => "INDEX_CORRUPT",
        }
    }
}

impl RegistryError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LockFailed(_) => "REGISTRY_LOCK_FAILED",
            Self::CorruptFile(_) => "REGISTRY_CORRUPT",
            Self::NoDaemonForWorkspace(_) => "NO_DAEMON_FOR_WORKSPACE",
            Self::NoFreePort(_) => "NO_FREE_PORT",
            Self::Io(_) => "REGISTRY_IO_ERROR",
        }
    }
}

impl ProtocolError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => "PARSE_ERROR",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::MethodNotFound(_) => "METHOD_NOT_FOUND",
            Self::InvalidParams(_) => "INVALID_PARAMS",
            Self::BodyTooLarge(_) => "BODY_TOO_LARGE",
            Self::InvalidState { .. } => "INVALID_SESSION_STATE",
            Self::UnsupportedVersion { .. } => "UNSUPPORTED_PROTOCOL_VERSION",
            Self::QueueFull { .. } => "QUEUE_FULL",
        }
    }
}

impl PolicyError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::SearchFirstRequired { .. } => "SEARCH_FIRST_REQUIRED",
        }
    }
}

// Conversion to rmcp tool errors for the small number of call sites that
// propagate straight through `?` instead of building a `CallToolResult`.
impl From<ServerError> for rmcp::Error {
    fn from(err: ServerError) -> Self {
        rmcp::Error::internal_error(err.to_string(), None)
    }
}
