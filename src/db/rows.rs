//! Plain row structs passed between the indexer and the storage layer.
//!
//! Kept separate from `services::search`'s DTOs (`SearchOptions`/`SearchHit`)
//! because these mirror table columns 1:1, while the search DTOs are a
//! public API shape that happens to be backed by these tables.

use crate::types::{RelType, SymbolId};

/// One row destined for `files`, pre-compression.
#[derive(Debug, Clone)]
pub struct FileRow {
    pub path: String,
    pub repo: String,
    pub mtime: i64,
    pub size: i64,
    pub content: String,
}

/// One row destined for `symbols`.
#[derive(Debug, Clone)]
pub struct SymbolRow {
    pub path: String,
    pub name: String,
    pub kind: String,
    pub line: i64,
    pub end_line: i64,
    pub content: String,
    pub parent_name: String,
    pub metadata_json: String,
    pub docstring: String,
    pub qualname: String,
}

impl SymbolRow {
    #[must_use]
    pub fn symbol_id(&self) -> SymbolId {
        SymbolId::new(&self.path, &self.qualname, &self.kind)
    }
}

/// One row destined for `symbol_relations`.
#[derive(Debug, Clone)]
pub struct RelationRow {
    pub from_path: String,
    pub from_symbol: String,
    pub from_symbol_id: SymbolId,
    pub to_path: String,
    pub to_symbol: String,
    pub to_symbol_id: SymbolId,
    pub rel_type: RelType,
    pub line: i64,
}
