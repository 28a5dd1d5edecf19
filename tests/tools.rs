//! Integration tests for the tool bodies the MCP layer dispatches against.

mod common;

use common::{minimal_codebase, rust_codebase};
use sari::services::SearchOptions;
use sari::tools::{self, ListFilesInput, ReadFileInput, SearchInput};

#[test]
fn search_finds_indexed_symbol() {
    let env = rust_codebase();
    env.index_all();

    let input = SearchInput {
        query: "authenticate".to_string(),
        repo: None,
        repo_name: None,
        limit: Some(10),
        offset: None,
        snippet_lines: None,
        recency_boost: None,
        case_sensitive: None,
        path_pattern: None,
        file_types: None,
        exclude_patterns: None,
        use_regex: None,
    };
    let out = tools::execute_search(&env.search, input).unwrap();
    assert!(out.hits.iter().any(|h| h.path.ends_with("auth.rs")));
}

#[test]
fn read_file_returns_stored_content() {
    let env = minimal_codebase();
    env.index_all();

    let root = env.dir.path().to_path_buf();
    let input = ReadFileInput { path: "test.rs".to_string() };
    let out = tools::execute_read_file(&root, &env.db, input).unwrap();
    assert!(out.content.contains("fn main()"));
}

#[test]
fn read_file_rejects_path_traversal() {
    let env = minimal_codebase();
    env.index_all();

    let root = env.dir.path().to_path_buf();
    let input = ReadFileInput { path: "../../../../etc/passwd".to_string() };
    let err = tools::execute_read_file(&root, &env.db, input).unwrap_err();
    assert!(err.is_client_fixable(), "traversal rejection should be a client-fixable error, got {err:?}");
}

#[test]
fn list_files_without_repo_returns_summary_only() {
    let env = rust_codebase();
    env.index_all();

    let out = tools::execute_list_files(&env.db, ListFilesInput {
        repo: None,
        path_pattern: None,
        file_types: None,
        include_hidden: None,
        summary: None,
        limit: None,
        offset: None,
    })
    .unwrap();
    assert!(out.files.is_empty());
    assert!(!out.repo_summary.is_empty());
}

#[test]
fn search_with_empty_query_returns_no_hits() {
    let env = minimal_codebase();
    env.index_all();

    let response = env.search.search(&SearchOptions { query: String::new(), ..Default::default() }).unwrap();
    assert!(response.hits.is_empty());
    assert_eq!(response.total, 0);
}

#[test]
fn search_envelope_reports_limit_and_paging() {
    let env = rust_codebase();
    env.index_all();

    let input = SearchInput {
        query: "fn".to_string(),
        repo: None,
        repo_name: None,
        limit: Some(1),
        offset: None,
        snippet_lines: None,
        recency_boost: None,
        case_sensitive: None,
        path_pattern: None,
        file_types: None,
        exclude_patterns: None,
        use_regex: None,
    };
    let out = tools::execute_search(&env.search, input).unwrap();
    assert_eq!(out.limit, 1);
    assert_eq!(out.scope, "all");
    assert!(out.hits.len() <= 1);
    if out.hits.len() == 1 {
        assert!(out.has_more);
        assert_eq!(out.next_offset, Some(1));
    }
}

#[test]
fn search_clamps_out_of_range_limit() {
    let env = rust_codebase();
    env.index_all();

    let input = SearchInput {
        query: "fn".to_string(),
        repo: None,
        repo_name: None,
        limit: Some(0),
        offset: None,
        snippet_lines: Some(100),
        recency_boost: None,
        case_sensitive: None,
        path_pattern: None,
        file_types: None,
        exclude_patterns: None,
        use_regex: None,
    };
    let out = tools::execute_search(&env.search, input).unwrap();
    assert_eq!(out.limit, 1);
}
