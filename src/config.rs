//! Per-workspace configuration.
//!
//! The teacher takes `--root`/`--db` flags and nothing else. Sari adds a
//! `<workspace>/.sari/config.toml` layer (grounded in
//! `examples/original_source/app/config.py` and
//! `examples/original_source/sari/core/config/__init__.py`), with the same
//! "optional file, sane defaults" shape as the Python `Config.load`.

use crate::error::{Result, ServerError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_scan_interval_secs() -> u64 {
    30
}

fn default_commit_batch_size() -> usize {
    200
}

fn default_max_file_bytes() -> u64 {
    1024 * 1024
}

fn default_extensions() -> Vec<String> {
    [
        "rs", "py", "js", "ts", "tsx", "jsx", "go", "java", "c", "cpp", "h", "hpp", "rb", "php",
        "swift", "kt", "scala", "cs", "fs", "ml", "hs", "clj", "ex", "exs", "erl", "lua", "vim",
        "sh", "bash", "zsh", "fish", "ps1", "bat", "md", "txt", "json", "yaml", "yml", "toml",
        "xml", "html", "css", "scss", "sql", "graphql", "proto",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_extensionless() -> Vec<String> {
    ["dockerfile", "makefile", "cmakelists.txt"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_search_first_mode() -> String {
    "warn".to_string()
}

/// Per-workspace configuration loaded from `<workspace>/.sari/config.toml`,
/// falling back to built-in defaults for anything the file omits or when the
/// file doesn't exist at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Absolute path of the index database. Defaults to a per-workspace path
    /// under the platform cache dir (see `default_db_path`).
    pub db_path: Option<PathBuf>,

    /// Extensions scanned during indexing (without the leading dot).
    pub extensions: Vec<String>,

    /// Extensionless filenames scanned during indexing (lowercased).
    pub extensionless: Vec<String>,

    /// Include dotfiles/dot-directories when walking the tree.
    pub include_hidden: bool,

    /// Follow symlinks while walking the tree.
    pub follow_symlinks: bool,

    /// Files larger than this are skipped entirely.
    pub max_file_bytes: u64,

    /// Seconds between indexer scan ticks (§4.3).
    pub scan_interval_secs: u64,

    /// Number of files committed per indexer transaction.
    pub commit_batch_size: usize,

    /// `off` | `warn` | `enforce` — see §4.9. `SARI_SEARCH_FIRST_MODE`
    /// overrides this at daemon-start time.
    pub search_first_mode: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            extensions: default_extensions(),
            extensionless: default_extensionless(),
            include_hidden: false,
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
            scan_interval_secs: default_scan_interval_secs(),
            commit_batch_size: default_commit_batch_size(),
            search_first_mode: default_search_first_mode(),
        }
    }
}

impl Config {
    /// Loads `<workspace>/.sari/config.toml`, falling back to `Config::default()`
    /// field-by-field when the file is absent or partially specified.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if the file exists but fails to parse.
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let config_path = workspace_root.join(".sari").join("config.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&config_path)?;
        toml::from_str(&raw)
            .map_err(|e| ServerError::Config(format!("{}: {e}", config_path.display())))
    }

    /// Resolves the effective `search_first_mode`, letting `SARI_SEARCH_FIRST_MODE`
    /// override the config file (matching the teacher's env-var-wins precedent
    /// in `main.rs` for CLI flags).
    #[must_use]
    pub fn resolve_search_first_mode(&self) -> String {
        std::env::var("SARI_SEARCH_FIRST_MODE")
            .ok()
            .filter(|v| matches!(v.as_str(), "off" | "warn" | "enforce"))
            .unwrap_or_else(|| self.search_first_mode.clone())
    }

    /// Whether `path` should be scanned, based on extension/extensionless-name config.
    #[must_use]
    pub fn matches_extension(&self, path: &Path) -> bool {
        if self.extensions.is_empty() {
            return true;
        }
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            if self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext)) {
                return true;
            }
        }
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_lowercase();
        self.extensionless.iter().any(|e| *e == filename)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_when_no_config_file() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.scan_interval_secs, 30);
        assert_eq!(cfg.search_first_mode, "warn");
    }

    #[test]
    fn partial_toml_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join(".sari")).unwrap();
        std::fs::write(
            dir.path().join(".sari/config.toml"),
            "scan_interval_secs = 5\n",
        )
        .unwrap();

        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.scan_interval_secs, 5);
        assert_eq!(cfg.commit_batch_size, 200);
    }

    #[test]
    fn matches_extension_handles_extensionless_names() {
        let cfg = Config::default();
        assert!(cfg.matches_extension(Path::new("src/main.rs")));
        assert!(cfg.matches_extension(Path::new("Dockerfile")));
        assert!(!cfg.matches_extension(Path::new("binary.exe")));
    }
}
