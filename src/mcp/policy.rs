//! Search-first policy middleware (§4.9, §4.10).
//!
//! Grounded in `mcp/server.py`'s `_resolve_search_first_policy`/`_mark_search`/
//! `_has_search_context`/`_search_first_error`/`_search_first_warning`: a
//! per-session counter of `search`/`search_symbols` calls gates `read_file`
//! and `read_symbol`, either blocking (`enforce`) or annotating the result
//! with an advisory warning (`warn`).

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFirstMode {
    Off,
    Warn,
    Enforce,
}

impl SearchFirstMode {
    /// Parses a mode string from config/env, matching `_resolve_search_first_policy`.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "off" => Some(Self::Off),
            "warn" => Some(Self::Warn),
            "enforce" => Some(Self::Enforce),
            _ => None,
        }
    }
}

impl std::fmt::Display for SearchFirstMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Warn => write!(f, "warn"),
            Self::Enforce => write!(f, "enforce"),
        }
    }
}

/// One session's search-usage counters, gating `read_file`/`read_symbol`.
#[derive(Debug, Default)]
pub struct SearchUsage {
    search: AtomicU64,
    search_symbols: AtomicU64,
    read_without_search: AtomicU64,
}

impl SearchUsage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_search(&self) {
        self.search.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_search_symbols(&self) {
        self.search_symbols.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn has_search_context(&self) -> bool {
        self.search.load(Ordering::Relaxed) > 0 || self.search_symbols.load(Ordering::Relaxed) > 0
    }

    fn mark_read_without_search(&self) {
        self.read_without_search.fetch_add(1, Ordering::Relaxed);
    }

    /// Checked immediately before `read_file`/`read_symbol` dispatch.
    ///
    /// Returns `Ok(None)` when the call may proceed untouched, `Ok(Some(warning))`
    /// when it may proceed but should carry an advisory warning, or `Err(())`
    /// when `mode` is `Enforce` and the call must be rejected outright.
    pub fn check(&self, mode: SearchFirstMode) -> Result<Option<&'static str>, ()> {
        if mode == SearchFirstMode::Off || self.has_search_context() {
            return Ok(None);
        }
        self.mark_read_without_search();
        match mode {
            SearchFirstMode::Off => unreachable!(),
            SearchFirstMode::Warn => Ok(Some(
                "Search-first policy (advisory): call search/search_symbols before read_file/read_symbol.",
            )),
            SearchFirstMode::Enforce => Err(()),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> std::collections::HashMap<String, u64> {
        let mut map = std::collections::HashMap::new();
        map.insert("search".to_string(), self.search.load(Ordering::Relaxed));
        map.insert("search_symbols".to_string(), self.search_symbols.load(Ordering::Relaxed));
        map.insert("read_without_search".to_string(), self.read_without_search.load(Ordering::Relaxed));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_mode_never_blocks() {
        let usage = SearchUsage::new();
        assert_eq!(usage.check(SearchFirstMode::Off), Ok(None));
    }

    #[test]
    fn enforce_blocks_until_search_called() {
        let usage = SearchUsage::new();
        assert_eq!(usage.check(SearchFirstMode::Enforce), Err(()));
        usage.mark_search();
        assert_eq!(usage.check(SearchFirstMode::Enforce), Ok(None));
    }

    #[test]
    fn warn_mode_annotates_instead_of_blocking() {
        let usage = SearchUsage::new();
        assert_eq!(usage.check(SearchFirstMode::Warn), Ok(Some(
            "Search-first policy (advisory): call search/search_symbols before read_file/read_symbol.",
        )));
    }

    #[test]
    fn parse_accepts_known_modes_only() {
        assert_eq!(SearchFirstMode::parse("enforce"), Some(SearchFirstMode::Enforce));
        assert_eq!(SearchFirstMode::parse("WARN"), Some(SearchFirstMode::Warn));
        assert_eq!(SearchFirstMode::parse("bogus"), None);
    }
}
