//! Hybrid search engine (§4.2): FTS-or-LIKE candidate retrieval, a
//! boost-summing ranker, and the `repo_candidates` companion query.
//!
//! Grounded in the teacher's `SearchService` (candidate fetch → score → sort
//! → paginate shape, snippet extraction) and
//! `examples/original_source/app/search.py`'s boost table (exact filename,
//! filename-stem, dir-segment, symbol-definition, tag, priority, recency)
//! and its approx-total size heuristic.

use crate::db::{Database, RawHit};
use crate::error::{Result, ServerError};
use crate::security;
use crate::types::{Score, TotalMode};
use std::sync::Arc;

/// Files indexed above this count make an exact `COUNT` expensive enough
/// that `search` prefers an approximate total (§4.2).
const APPROX_FILE_THRESHOLD: i64 = 150_000;
/// Distinct repos above this count trigger the same approximation, even on
/// a small per-repo file count.
const APPROX_REPO_THRESHOLD: usize = 50;
/// A `path_pattern` filter combined with this many indexed files also tips
/// the heuristic toward `approx` (narrowing by pattern is itself costly).
const APPROX_PATTERNED_FILE_THRESHOLD: i64 = 50_000;

const RECENCY_WINDOW_SECS: i64 = 30 * 24 * 60 * 60;
const RECENCY_BOOST_CAP: f64 = 200.0;
const HIGH_PRIORITY_THRESHOLD: i64 = 50;
const REPO_HIGH_THRESHOLD: i64 = 10;
const REPO_MODERATE_THRESHOLD: i64 = 5;

/// Search request parameters. Field clamping (`limit in [1,20]`, etc.) is
/// the caller's (tool layer's) job; this struct accepts already-clamped
/// values.
#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub query: String,
    pub repo: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub snippet_lines: usize,
    pub recency_boost: bool,
    pub case_sensitive: bool,
    pub path_pattern: Option<String>,
    /// Restrict candidates to these extensions (no leading dot required).
    pub file_types: Vec<String>,
    /// Glob patterns; a candidate matching any of these is dropped after
    /// fetch and forces `is_exact_total = false` (§4.2).
    pub exclude_patterns: Vec<String>,
    /// Treat `query` as a regex and filter LIKE-fallback candidates
    /// in-process instead of matching it as a literal term (§4.2).
    pub use_regex: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            query: String::new(),
            repo: None,
            limit: 10,
            offset: 0,
            snippet_lines: 3,
            recency_boost: false,
            case_sensitive: false,
            path_pattern: None,
            file_types: Vec::new(),
            exclude_patterns: Vec::new(),
            use_regex: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchHit {
    pub path: String,
    pub repo: String,
    pub score: Score,
    pub mtime: i64,
    pub size: i64,
    pub snippet: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub total: i64,
    pub total_mode: TotalMode,
    pub is_exact_total: bool,
    pub repo_summary: Vec<(String, i64)>,
    pub top_candidate_repos: Vec<String>,
    /// True when the query fell back to the LIKE path (non-ASCII query,
    /// `use_regex`, or FTS unavailable) instead of the FTS path.
    pub fallback_used: bool,
    /// Set when `use_regex` was requested but the pattern failed
    /// `security::validate_regex_pattern` or `regex::Regex::new` (§4.2).
    pub regex_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RepoCandidate {
    pub repo: String,
    pub count: i64,
    pub reason: &'static str,
}

pub struct SearchService {
    db: Arc<Database>,
}

impl SearchService {
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Returns the underlying storage handle, for tools that need a
    /// storage-level query the ranker itself doesn't expose.
    #[must_use]
    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// Runs a hybrid search and returns a page of ranked, scored hits.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Database` on any storage failure.
    pub fn search(&self, opts: &SearchOptions) -> Result<SearchResponse> {
        let query = opts.query.trim();
        if query.is_empty() {
            return Ok(SearchResponse {
                hits: Vec::new(),
                total: 0,
                total_mode: TotalMode::Exact,
                is_exact_total: true,
                repo_summary: Vec::new(),
                top_candidate_repos: Vec::new(),
                fallback_used: false,
                regex_error: None,
            });
        }

        let overfetch = (opts.offset + opts.limit).saturating_mul(3).max(30);

        let regex_filter = if opts.use_regex { Some(compile_regex(query)) } else { None };
        let regex_error = regex_filter.as_ref().and_then(|r| r.as_ref().err().cloned());

        let use_fts = !opts.use_regex && self.db.fts_enabled() && query.is_ascii();
        let raw = if use_fts {
            let match_query = super::fts::build_match_query(query);
            self.db.fts_search(&match_query, opts.repo.as_deref(), overfetch)?
        } else if opts.use_regex {
            // Broad candidate fetch; the regex (if it compiled) does the real
            // filtering in-process below.
            self.db.like_search("", opts.repo.as_deref(), overfetch)?
        } else {
            self.db.like_search(query, opts.repo.as_deref(), overfetch)?
        };
        let fallback_used = !use_fts;

        let symbol_paths = self.symbol_definition_paths(query, opts.repo.as_deref())?;
        let now = now_unix();

        let mut scored: Vec<SearchHit> = Vec::with_capacity(raw.len());
        for hit in &raw {
            if let Some(pattern) = &opts.path_pattern {
                if !path_matches_glob(&hit.path, pattern) {
                    continue;
                }
            }
            if opts.exclude_patterns.iter().any(|p| path_matches_glob(&hit.path, p)) {
                continue;
            }
            if !opts.file_types.is_empty() {
                let ext = std::path::Path::new(&hit.path).extension().and_then(|e| e.to_str()).unwrap_or("");
                if !opts.file_types.iter().any(|t| t.trim_start_matches('.') == ext) {
                    continue;
                }
            }
            if let Some(Ok(re)) = &regex_filter {
                if !re.is_match(&hit.content) {
                    continue;
                }
            } else if regex_filter.is_some() {
                // Pattern failed to compile: no candidate can match.
                continue;
            }
            let (score, reasons) = self.score_hit(hit, query, opts, symbol_paths.contains(&hit.path), now)?;
            scored.push(SearchHit {
                path: hit.path.clone(),
                repo: hit.repo.clone(),
                score,
                mtime: hit.mtime,
                size: hit.size,
                snippet: build_snippet(&hit.content, query, opts.snippet_lines, opts.case_sensitive),
                reasons,
            });
        }

        scored.sort_by(|a, b| {
            b.score
                .as_f64()
                .partial_cmp(&a.score.as_f64())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.mtime.cmp(&a.mtime))
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut repo_summary: Vec<(String, i64)> = Vec::new();
        for hit in &scored {
            match repo_summary.iter_mut().find(|(r, _)| r == &hit.repo) {
                Some((_, count)) => *count += 1,
                None => repo_summary.push((hit.repo.clone(), 1)),
            }
        }
        repo_summary.sort_by(|a, b| b.1.cmp(&a.1));

        let candidates = self.repo_candidates(query, 5)?;
        let top_candidate_repos = candidates.into_iter().map(|c| c.repo).collect();

        let (total, total_mode, mut is_exact_total) =
            self.total_mode(&opts.repo, opts.path_pattern.as_deref(), scored.len(), overfetch)?;
        if !opts.exclude_patterns.is_empty() {
            is_exact_total = false;
        }

        let hits = scored.into_iter().skip(opts.offset).take(opts.limit).collect();

        Ok(SearchResponse {
            hits,
            total,
            total_mode,
            is_exact_total,
            repo_summary,
            top_candidate_repos,
            fallback_used,
            regex_error,
        })
    }

    /// Groups FTS/LIKE matches by repo for `repo_candidates(query, limit)`
    /// (§4.2), bucketing a human-readable reason by hit-count threshold.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Database` on any storage failure.
    pub fn repo_candidates(&self, query: &str, limit: usize) -> Result<Vec<RepoCandidate>> {
        let counts = self.db.repo_hit_counts(query)?;
        Ok(counts
            .into_iter()
            .take(limit)
            .map(|(repo, count)| RepoCandidate {
                repo,
                count,
                reason: if count >= REPO_HIGH_THRESHOLD {
                    "high"
                } else if count >= REPO_MODERATE_THRESHOLD {
                    "moderate"
                } else {
                    "low"
                },
            })
            .collect())
    }

    fn symbol_definition_paths(&self, query: &str, repo: Option<&str>) -> Result<std::collections::HashSet<String>> {
        let hits = self.db.search_symbols(query, repo, 200)?;
        Ok(hits
            .into_iter()
            .filter(|h| h.name.eq_ignore_ascii_case(query))
            .map(|h| h.path)
            .collect())
    }

    fn score_hit(
        &self,
        hit: &RawHit,
        query: &str,
        opts: &SearchOptions,
        has_symbol_def: bool,
        now: i64,
    ) -> Result<(Score, Vec<String>)> {
        let mut score = Score::new(hit.base_score);
        let mut reasons = Vec::new();

        let path = std::path::Path::new(&hit.path);
        let basename = path.file_name().and_then(|n| n.to_str()).unwrap_or(&hit.path);
        let stem = path.file_stem().and_then(|n| n.to_str()).unwrap_or(basename);
        let query_lower = query.to_lowercase();

        if basename.eq_ignore_ascii_case(query) {
            score = score.add(1000.0);
            reasons.push("Exact filename match".to_string());
        } else if stem.to_lowercase().contains(&query_lower) {
            score = score.add(300.0);
            reasons.push("Filename match".to_string());
        } else if hit
            .path
            .split(['/', '\\'])
            .any(|segment| segment.to_lowercase().contains(&query_lower))
        {
            score = score.add(150.0);
            reasons.push("Dir match".to_string());
        }

        if has_symbol_def {
            score = score.add(500.0);
            reasons.push("Symbol definition".to_string());
        }

        let tags = self.db.get_repo_tags(&hit.repo)?;
        if tags.to_lowercase().split(',').any(|t| t.trim() == query_lower) {
            score = score.add(100.0);
            reasons.push("Tag match".to_string());
        }

        let priority = self.db.get_repo_priority(&hit.repo)?;
        if priority >= HIGH_PRIORITY_THRESHOLD {
            score = score.add(priority as f64);
            reasons.push("High priority".to_string());
        }

        if opts.recency_boost {
            let age_secs = (now - hit.mtime).max(0);
            if age_secs < RECENCY_WINDOW_SECS {
                let fraction = 1.0 - (age_secs as f64 / RECENCY_WINDOW_SECS as f64);
                score = score.add(fraction * RECENCY_BOOST_CAP);
                reasons.push("Recency boost".to_string());
            }
        }

        Ok((score, reasons))
    }

    fn total_mode(
        &self,
        repo: &Option<String>,
        path_pattern: Option<&str>,
        candidate_count: usize,
        overfetch: usize,
    ) -> Result<(i64, TotalMode, bool)> {
        let status = self.db.get_index_status().map_err(ServerError::Database)?;
        let repo_count = self.db.repo_file_counts().map_err(ServerError::Database)?.len();

        let large_index = status.total_files > APPROX_FILE_THRESHOLD || repo_count > APPROX_REPO_THRESHOLD;
        let patterned_and_medium = path_pattern.is_some()
            && status.total_files >= APPROX_PATTERNED_FILE_THRESHOLD
            && status.total_files <= APPROX_FILE_THRESHOLD;

        if repo.is_none() && (large_index || patterned_and_medium) {
            return Ok((-1, TotalMode::Approx, false));
        }

        if candidate_count < overfetch {
            Ok((candidate_count as i64, TotalMode::Exact, true))
        } else {
            Ok((-1, TotalMode::Approx, false))
        }
    }
}

/// Validates and compiles a user-supplied `use_regex` pattern. Returns
/// `Err(message)` rather than propagating, so a bad pattern degrades to a
/// `regex_error` in the response meta instead of failing the whole request.
fn compile_regex(pattern: &str) -> std::result::Result<regex::Regex, String> {
    security::validate_regex_pattern(pattern).map_err(|e| e.to_string())?;
    regex::Regex::new(pattern).map_err(|e| e.to_string())
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Translates the limited glob syntax used by `path_pattern` (`*`, `**`) to
/// a per-segment substring/prefix check, avoiding a regex dependency for
/// what is in practice a small set of directory-shaped patterns.
fn path_matches_glob(path: &str, pattern: &str) -> bool {
    if pattern.contains("**") {
        let needle = pattern.replace("**", "").replace('*', "");
        return needle.is_empty() || path.contains(&needle);
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return path.starts_with(prefix);
    }
    path.contains(pattern)
}

/// Builds a snippet of up to `snippet_lines` lines around the first line
/// containing `query`, wrapping each match with `>>>`/`<<<` (§4.2).
fn build_snippet(content: &str, query: &str, snippet_lines: usize, case_sensitive: bool) -> String {
    let lines: Vec<&str> = content.lines().collect();
    let needle = if case_sensitive { query.to_string() } else { query.to_lowercase() };

    let match_idx = lines.iter().position(|line| {
        let hay = if case_sensitive { line.to_string() } else { line.to_lowercase() };
        hay.contains(&needle)
    });

    let Some(idx) = match_idx else {
        return lines.first().copied().unwrap_or_default().to_string();
    };

    let half = snippet_lines / 2;
    let start = idx.saturating_sub(half);
    let end = (start + snippet_lines.max(1)).min(lines.len());

    lines[start..end]
        .iter()
        .map(|line| highlight_matches(line, query, case_sensitive))
        .collect::<Vec<_>>()
        .join("\n")
}

fn highlight_matches(line: &str, query: &str, case_sensitive: bool) -> String {
    if query.is_empty() {
        return line.to_string();
    }
    let hay = if case_sensitive { line.to_string() } else { line.to_lowercase() };
    let needle = if case_sensitive { query.to_string() } else { query.to_lowercase() };

    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    let mut rest_hay = hay.as_str();
    loop {
        let Some(pos) = rest_hay.find(&needle) else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..pos]);
        out.push_str(">>>");
        out.push_str(&rest[pos..pos + query.len()]);
        out.push_str("<<<");
        rest = &rest[pos + query.len()..];
        rest_hay = &rest_hay[pos + query.len()..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::rows::FileRow;

    fn db_with(files: &[(&str, &str, &str, i64)]) -> Arc<Database> {
        let db = Database::in_memory().unwrap();
        let rows: Vec<FileRow> = files
            .iter()
            .map(|(path, repo, content, mtime)| FileRow {
                path: (*path).to_string(),
                repo: (*repo).to_string(),
                mtime: *mtime,
                size: content.len() as i64,
                content: (*content).to_string(),
            })
            .collect();
        db.upsert_files(&rows, 1).unwrap();
        Arc::new(db)
    }

    #[test]
    fn exact_filename_match_outranks_content_hit() {
        let db = db_with(&[
            ("src/auth.rs", "demo", "fn authenticate() {}", 1),
            ("src/misc.rs", "demo", "// calls auth somewhere", 1),
        ]);
        let svc = SearchService::new(db);
        let resp = svc
            .search(&SearchOptions { query: "auth.rs".to_string(), limit: 10, ..Default::default() })
            .unwrap();
        assert_eq!(resp.hits[0].path, "src/auth.rs");
        assert!(resp.hits[0].reasons.iter().any(|r| r == "Exact filename match"));
    }

    #[test]
    fn empty_query_returns_no_hits() {
        let db = db_with(&[("a.rs", "demo", "fn x() {}", 1)]);
        let svc = SearchService::new(db);
        let resp = svc.search(&SearchOptions::default()).unwrap();
        assert!(resp.hits.is_empty());
        assert_eq!(resp.total, 0);
    }

    #[test]
    fn snippet_highlights_match() {
        let content = "line one\nfn target_symbol() {}\nline three";
        let snippet = build_snippet(content, "target_symbol", 3, false);
        assert!(snippet.contains(">>>target_symbol<<<"));
    }

    #[test]
    fn repo_candidates_bucket_by_count() {
        let db = db_with(&[
            ("a.rs", "busy-repo", "needle needle", 1),
            ("b.rs", "busy-repo", "needle", 1),
            ("c.rs", "quiet-repo", "needle", 1),
        ]);
        let svc = SearchService::new(db);
        let candidates = svc.repo_candidates("needle", 5).unwrap();
        assert!(candidates.iter().any(|c| c.repo == "busy-repo" && c.reason == "low"));
    }

    #[test]
    fn file_types_filter_restricts_extension() {
        let db = db_with(&[
            ("src/lib.rs", "demo", "fn needle() {}", 1),
            ("docs/lib.md", "demo", "needle mentioned here", 1),
        ]);
        let svc = SearchService::new(db);
        let resp = svc
            .search(&SearchOptions {
                query: "needle".to_string(),
                limit: 10,
                file_types: vec!["rs".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert!(resp.hits.iter().all(|h| h.path.ends_with(".rs")));
        assert!(resp.hits.iter().any(|h| h.path == "src/lib.rs"));
    }

    #[test]
    fn exclude_patterns_drop_matching_paths_and_mark_total_inexact() {
        let db = db_with(&[
            ("src/needle.rs", "demo", "needle content", 1),
            ("vendor/needle.rs", "demo", "needle content", 1),
        ]);
        let svc = SearchService::new(db);
        let resp = svc
            .search(&SearchOptions {
                query: "needle".to_string(),
                limit: 10,
                exclude_patterns: vec!["vendor/*".to_string()],
                ..Default::default()
            })
            .unwrap();
        assert!(resp.hits.iter().all(|h| !h.path.starts_with("vendor/")));
        assert!(!resp.is_exact_total);
    }

    #[test]
    fn use_regex_filters_by_pattern_match() {
        let db = db_with(&[
            ("a.rs", "demo", "fn fetch_user() {}", 1),
            ("b.rs", "demo", "fn fetch_order() {}", 1),
            ("c.rs", "demo", "fn delete_user() {}", 1),
        ]);
        let svc = SearchService::new(db);
        let resp = svc
            .search(&SearchOptions {
                query: r"fetch_\w+".to_string(),
                limit: 10,
                use_regex: true,
                ..Default::default()
            })
            .unwrap();
        assert!(resp.fallback_used);
        assert!(resp.regex_error.is_none());
        assert_eq!(resp.hits.len(), 2);
        assert!(resp.hits.iter().all(|h| h.path != "c.rs"));
    }

    #[test]
    fn invalid_regex_reports_error_and_no_hits() {
        let db = db_with(&[("a.rs", "demo", "fn fetch_user() {}", 1)]);
        let svc = SearchService::new(db);
        let resp = svc
            .search(&SearchOptions { query: "(a+)+".to_string(), limit: 10, use_regex: true, ..Default::default() })
            .unwrap();
        assert!(resp.regex_error.is_some());
        assert!(resp.hits.is_empty());
    }
}
