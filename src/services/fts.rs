//! FTS5 query construction.
//!
//! Grounded in the teacher's `FtsService::preprocess_query` (strip FTS5
//! metacharacters, prefix-match each token) but reworked into a standalone
//! query builder consumed by `services::search`: the search engine owns
//! ranking, this module only owns "how do we phrase the MATCH string".

/// Builds an FTS5 `MATCH` expression ANDing quoted, prefix-matched terms.
///
/// Quoting each term sidesteps FTS5 syntax characters in the query
/// (`:`, `(`, `"`, `*`) that would otherwise need per-character escaping,
/// at the cost of disabling FTS5 operators in user queries — acceptable
/// since `search` is a natural-language/code-snippet field, not a query
/// language.
#[must_use]
pub fn build_match_query(raw: &str) -> String {
    raw.split_whitespace()
        .map(sanitize_term)
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\"*"))
        .collect::<Vec<_>>()
        .join(" AND ")
}

fn sanitize_term(term: &str) -> String {
    term.replace('"', "")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_anded_prefix_terms() {
        assert_eq!(build_match_query("hello world"), "\"hello\"* AND \"world\"*");
    }

    #[test]
    fn strips_embedded_quotes() {
        assert_eq!(build_match_query("say \"hi\""), "\"say\"* AND \"hi\"*");
    }

    #[test]
    fn empty_query_yields_empty_match() {
        assert_eq!(build_match_query("   "), "");
    }
}
