//! Core services: indexing, symbol extraction, and hybrid search.

mod fts;
mod indexer;
mod search;
mod symbols;

pub use fts::build_match_query;
pub use indexer::{IndexSummary, Indexer};
pub use search::{SearchHit, SearchOptions, SearchResponse, SearchService};
pub use symbols::{extract_symbols, ExtractedRelation, ExtractedSymbol};
