//! Type-safe newtypes for sari.
//!
//! These newtypes provide compile-time safety and semantic clarity
//! for core domain concepts.

use crate::db::rows::FileRow;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Database identifier for indexed files.
///
/// Using u32 supports ~4 billion files which is sufficient for any codebase.
/// The newtype prevents accidental mixing with other integer values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(pub u32);

impl FileId {
    #[must_use]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let id = self.0;
        write!(f, "file:{id}")
    }
}

impl From<u32> for FileId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<FileId> for u32 {
    fn from(id: FileId) -> Self {
        id.0
    }
}

/// Relevance score, unbounded above (the hybrid ranker adds boosts like +1000
/// for an exact filename match on top of a base FTS/LIKE score).
///
/// Kept as a newtype so ordering and `Display` formatting live in one place
/// rather than being re-derived at every call site that sorts hits.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Score(f64);

impl Score {
    pub const ZERO: Self = Self(0.0);

    #[must_use]
    pub fn new(value: f64) -> Self {
        Self(value.max(0.0))
    }

    #[must_use]
    pub const fn new_unchecked(value: f64) -> Self {
        Self(value)
    }

    #[must_use]
    pub const fn as_f64(self) -> f64 {
        self.0
    }

    #[must_use]
    pub fn add(self, boost: f64) -> Self {
        Self::new(self.0 + boost)
    }
}

impl Default for Score {
    fn default() -> Self {
        Self::ZERO
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// Content-addressed symbol identifier: `xxh3(path || '\0' || qualname || '\0' || kind)`.
///
/// Stable across re-indexes as long as the symbol's path/qualname/kind don't
/// change, which is what lets `get_callers`/`get_implementations` join across
/// scans without re-resolving names each time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SymbolId(pub u64);

impl SymbolId {
    #[must_use]
    pub fn new(path: &str, qualname: &str, kind: &str) -> Self {
        let mut buf = Vec::with_capacity(path.len() + qualname.len() + kind.len() + 2);
        buf.extend_from_slice(path.as_bytes());
        buf.push(0);
        buf.extend_from_slice(qualname.as_bytes());
        buf.push(0);
        buf.extend_from_slice(kind.as_bytes());
        Self(xxhash_rust::xxh3::xxh3_64(&buf))
    }

    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SymbolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Opaque per-process identifier a daemon stamps into the server registry on
/// every boot, so stale entries left by a killed daemon never get confused
/// with the daemon currently listening on the same host/port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BootId(pub String);

impl BootId {
    #[must_use]
    pub fn generate(pid: u32, port: u16) -> Self {
        let nonce: u64 = xxhash_rust::xxh3::xxh3_64(format!("{pid}-{port}-{:p}", &pid).as_bytes());
        Self(format!("{pid:x}-{port:x}-{nonce:x}"))
    }

    #[must_use]
    pub fn legacy(pid: u32, port: u16) -> Self {
        Self(format!("legacy-{pid}-{port}"))
    }
}

impl fmt::Display for BootId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of symbol-to-symbol relation, stored as TEXT in `symbol_relations`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelType {
    Calls,
    Implements,
    Extends,
}

impl RelType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Calls => "calls",
            Self::Implements => "implements",
            Self::Extends => "extends",
        }
    }
}

impl fmt::Display for RelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "calls" => Ok(Self::Calls),
            "implements" => Ok(Self::Implements),
            "extends" => Ok(Self::Extends),
            other => Err(format!("unknown rel_type: {other}")),
        }
    }
}

/// Whether a search's reported `total` is an exact count or a heuristic
/// estimate (see `SearchEngine::total_mode` for the threshold).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TotalMode {
    Exact,
    Approx,
}

impl std::fmt::Display for TotalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Approx => write!(f, "approx"),
        }
    }
}

/// A just-scanned file awaiting a batched `upsert_files` call.
#[derive(Debug, Clone)]
pub struct PendingFile {
    pub path: String,
    pub repo: String,
    pub mtime: i64,
    pub size: i64,
    pub content: String,
}

impl From<PendingFile> for FileRow {
    fn from(p: PendingFile) -> Self {
        FileRow {
            path: p.path,
            repo: p.repo,
            mtime: p.mtime,
            size: p.size,
            content: p.content,
        }
    }
}

// Compile-time assertions for thread safety.
#[cfg(test)]
const _: () = {
    const fn assert_send_sync<T: Send + Sync>() {}

    assert_send_sync::<FileId>();
    assert_send_sync::<Score>();
    assert_send_sync::<SymbolId>();
    assert_send_sync::<BootId>();
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn score_never_negative() {
        assert_eq!(Score::new(-0.5).as_f64(), 0.0);
        assert_eq!(Score::new(0.5).as_f64(), 0.5);
    }

    #[test]
    fn score_add_accumulates() {
        let s = Score::new(10.0).add(1000.0);
        assert_eq!(s.as_f64(), 1010.0);
    }

    #[test]
    fn symbol_id_stable_for_same_inputs() {
        let a = SymbolId::new("src/lib.rs", "Foo::bar", "fn");
        let b = SymbolId::new("src/lib.rs", "Foo::bar", "fn");
        assert_eq!(a, b);
    }

    #[test]
    fn symbol_id_differs_by_kind() {
        let a = SymbolId::new("src/lib.rs", "Foo", "struct");
        let b = SymbolId::new("src/lib.rs", "Foo", "fn");
        assert_ne!(a, b);
    }

    #[test]
    fn rel_type_roundtrips_through_str() {
        for r in [RelType::Calls, RelType::Implements, RelType::Extends] {
            let parsed: RelType = r.as_str().parse().unwrap();
            assert_eq!(parsed.as_str(), r.as_str());
        }
    }

    #[test]
    fn file_id_roundtrip() {
        let id = FileId::new(42);
        assert_eq!(id.as_u32(), 42);
        assert_eq!(u32::from(id), 42);
    }
}
