//! `search`, `search_symbols`, and `repo_candidates` tool bodies (§4.2, §4.10).

use crate::error::Result;
use crate::services::{SearchOptions, SearchService};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// `limit` is clamped to `[1, 20]` (§3 `SearchOptions`).
const MAX_LIMIT: usize = 20;
/// `snippet_lines` is clamped to `[1, 20]` (§3 `SearchOptions`).
const MAX_SNIPPET_LINES: usize = 20;
/// `repo_candidates`' own `limit` is clamped to `[1, 5]` (§6 tool table).
const MAX_REPO_CANDIDATES: usize = 5;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchInput {
    /// Search query (substring or FTS5 terms)
    pub query: String,
    /// Restrict to one repo by name
    pub repo: Option<String>,
    /// Alias for `repo`
    pub repo_name: Option<String>,
    /// Maximum hits to return, clamped to [1, 20] (default: 10)
    pub limit: Option<usize>,
    /// Pagination offset (default: 0)
    pub offset: Option<usize>,
    /// Lines of snippet context around the first match, clamped to [1, 20] (default: 3)
    pub snippet_lines: Option<usize>,
    /// Boost recently-modified files (default: false)
    pub recency_boost: Option<bool>,
    /// Case-sensitive matching (default: false)
    pub case_sensitive: Option<bool>,
    /// Glob pattern to restrict candidate paths
    pub path_pattern: Option<String>,
    /// Restrict candidates to these file extensions
    pub file_types: Option<Vec<String>>,
    /// Glob patterns; matching candidates are dropped after fetch
    pub exclude_patterns: Option<Vec<String>>,
    /// Treat `query` as a regex, filtered in-process against the LIKE-fallback candidates
    pub use_regex: Option<bool>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SearchHitOutput {
    pub path: String,
    pub repo: String,
    pub score: f64,
    pub mtime: i64,
    pub size: i64,
    pub snippet: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SearchMeta {
    /// True when the query fell back to the LIKE path instead of FTS.
    pub fallback_used: bool,
    /// Set when `use_regex` was requested but the pattern didn't compile.
    pub regex_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SearchOutput {
    pub query: String,
    pub scope: String,
    pub limit: usize,
    pub offset: usize,
    pub hits: Vec<SearchHitOutput>,
    pub total: i64,
    pub total_mode: String,
    pub is_exact_total: bool,
    /// An "at-least" estimate of the total when `total_mode == "approx"`.
    pub approx_total: Option<i64>,
    pub has_more: bool,
    pub next_offset: Option<usize>,
    pub warnings: Vec<String>,
    pub repo_summary: Vec<RepoCount>,
    pub top_candidate_repos: Vec<String>,
    pub meta: SearchMeta,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RepoCount {
    pub repo: String,
    pub count: i64,
}

/// Runs a hybrid search. The caller is responsible for marking search
/// context with the search-first policy on success.
///
/// # Errors
///
/// Returns `ServerError::Search`/`ServerError::Database` on backend failure.
pub fn execute_search(search: &Arc<SearchService>, input: SearchInput) -> Result<SearchOutput> {
    let query = input.query;
    let scope = input.repo.clone().or_else(|| input.repo_name.clone()).unwrap_or_else(|| "all".to_string());
    let limit = input.limit.unwrap_or(10).clamp(1, MAX_LIMIT);
    let offset = input.offset.unwrap_or(0);

    let opts = SearchOptions {
        query: query.clone(),
        repo: input.repo.or(input.repo_name),
        limit,
        offset,
        snippet_lines: input.snippet_lines.unwrap_or(3).clamp(1, MAX_SNIPPET_LINES),
        recency_boost: input.recency_boost.unwrap_or(false),
        case_sensitive: input.case_sensitive.unwrap_or(false),
        path_pattern: input.path_pattern,
        file_types: input.file_types.unwrap_or_default(),
        exclude_patterns: input.exclude_patterns.unwrap_or_default(),
        use_regex: input.use_regex.unwrap_or(false),
    };
    let resp = search.search(&opts)?;

    let mut warnings = Vec::new();
    if let Some(reason) = &resp.regex_error {
        warnings.push(format!("invalid regex pattern: {reason}"));
    }

    let has_more = resp.hits.len() == limit;
    let next_offset = has_more.then_some(offset + limit);
    let approx_total = (!resp.is_exact_total).then_some((offset + resp.hits.len()).max(resp.total.max(0) as usize) as i64);

    Ok(SearchOutput {
        query,
        scope,
        limit,
        offset,
        hits: resp
            .hits
            .into_iter()
            .map(|h| SearchHitOutput {
                path: h.path,
                repo: h.repo,
                score: h.score.as_f64(),
                mtime: h.mtime,
                size: h.size,
                snippet: h.snippet,
                reasons: h.reasons,
            })
            .collect(),
        total: resp.total,
        total_mode: resp.total_mode.to_string(),
        is_exact_total: resp.is_exact_total,
        approx_total,
        has_more,
        next_offset,
        warnings,
        repo_summary: resp
            .repo_summary
            .into_iter()
            .map(|(repo, count)| RepoCount { repo, count })
            .collect(),
        top_candidate_repos: resp.top_candidate_repos,
        meta: SearchMeta { fallback_used: resp.fallback_used, regex_error: resp.regex_error },
    })
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SearchSymbolsInput {
    /// Symbol name to search for (supports fuzzy matching)
    pub query: String,
    /// Restrict to one repo by name
    pub repo: Option<String>,
    /// Maximum results (default: 20)
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SymbolHitOutput {
    pub path: String,
    pub repo: String,
    pub name: String,
    pub kind: String,
    pub line: i64,
    pub snippet: String,
    pub docstring: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SearchSymbolsOutput {
    pub hits: Vec<SymbolHitOutput>,
}

/// Searches the symbol table. The caller marks search context on success,
/// mirroring `search`.
///
/// # Errors
///
/// Returns `ServerError::Database` on a storage failure.
pub fn execute_search_symbols(
    search: &Arc<SearchService>,
    input: SearchSymbolsInput,
) -> Result<SearchSymbolsOutput> {
    let hits = search.db().search_symbols(
        &input.query,
        input.repo.as_deref(),
        input.limit.unwrap_or(20).min(500),
    )?;
    Ok(SearchSymbolsOutput {
        hits: hits
            .into_iter()
            .map(|h| SymbolHitOutput {
                path: h.path,
                repo: h.repo,
                name: h.name,
                kind: h.kind,
                line: h.line,
                snippet: h.snippet,
                docstring: h.docstring,
            })
            .collect(),
    })
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RepoCandidatesInput {
    /// Query to find relevant repositories
    pub query: String,
    /// Maximum candidates, clamped to [1, 5] (default: 3)
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RepoCandidateOutput {
    pub repo: String,
    pub count: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RepoCandidatesOutput {
    pub candidates: Vec<RepoCandidateOutput>,
}

/// Suggests repos likely to contain `query`, used to narrow `search` before
/// the caller knows which repo to scope to.
///
/// # Errors
///
/// Returns `ServerError::Database` on a storage failure.
pub fn execute_repo_candidates(
    search: &Arc<SearchService>,
    input: RepoCandidatesInput,
) -> Result<RepoCandidatesOutput> {
    let candidates = search.repo_candidates(&input.query, input.limit.unwrap_or(3).clamp(1, MAX_REPO_CANDIDATES))?;
    Ok(RepoCandidatesOutput {
        candidates: candidates
            .into_iter()
            .map(|c| RepoCandidateOutput { repo: c.repo, count: c.count, reason: c.reason.to_string() })
            .collect(),
    })
}
