//! In-process workspace registry (§4.5): refcounted shared state so multiple
//! sessions attached to the same workspace share one indexer/database
//! instead of each session opening its own.
//!
//! Grounded in `examples/original_source/mcp/registry.py`'s `SharedState`/
//! `Registry` singleton: `get_or_create` increments a refcount and lazily
//! constructs state on first use, `release` tears state down once the
//! refcount reaches zero.

use crate::config::Config;
use crate::db::Database;
use crate::error::{Result, ServerError};
use crate::services::{Indexer, SearchService};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Everything a session needs to serve tool calls against one workspace,
/// shared across every session currently attached to it.
pub struct WorkspaceState {
    pub root: PathBuf,
    pub db: Arc<Database>,
    pub search: Arc<SearchService>,
    pub indexer: Arc<Indexer>,
    pub config: Config,
    ref_count: Mutex<usize>,
}

impl WorkspaceState {
    fn new(root: PathBuf, config: Config) -> Result<Self> {
        let db_path = config.db_path.clone().unwrap_or_else(|| crate::default_db_path(&root));
        let db = Arc::new(Database::open(&db_path).map_err(ServerError::Database)?);
        let search = Arc::new(SearchService::new(Arc::clone(&db)));
        let indexer = Arc::new(Indexer::new(Arc::clone(&db), root.clone(), config.clone()));
        Ok(Self { root, db, search, indexer, config, ref_count: Mutex::new(0) })
    }

    fn acquire(&self) -> usize {
        let mut count = self.ref_count.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *count += 1;
        *count
    }

    /// Returns the refcount after release; `0` means the caller should drop
    /// this workspace from the registry.
    fn release(&self) -> usize {
        let mut count = self.ref_count.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *count = count.saturating_sub(1);
        *count
    }

    #[must_use]
    pub fn ref_count(&self) -> usize {
        *self.ref_count.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Process-wide map of workspace root -> shared state, refcounted per
/// attached session.
#[derive(Default)]
pub struct WorkspaceRegistry {
    workspaces: Mutex<HashMap<PathBuf, Arc<WorkspaceState>>>,
}

impl WorkspaceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self { workspaces: Mutex::new(HashMap::new()) }
    }

    /// Returns the shared state for `root`, creating and indexing it on
    /// first use. Increments the refcount; pair with `release`.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Database` if opening the workspace's index
    /// database fails, or `ServerError::Config` if `.sari/config.toml`
    /// fails to parse.
    pub fn get_or_create(&self, root: &Path) -> Result<Arc<WorkspaceState>> {
        let resolved = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let mut map = self.workspaces.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(state) = map.get(&resolved) {
            state.acquire();
            return Ok(Arc::clone(state));
        }
        let config = Config::load(&resolved)?;
        let state = Arc::new(WorkspaceState::new(resolved.clone(), config)?);
        state.acquire();
        map.insert(resolved, Arc::clone(&state));
        Ok(state)
    }

    /// Decrements the refcount for `root`'s shared state, dropping it from
    /// the registry once no session references it.
    pub fn release(&self, root: &Path) {
        let resolved = dunce::canonicalize(root).unwrap_or_else(|_| root.to_path_buf());
        let mut map = self.workspaces.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let Some(state) = map.get(&resolved) else { return };
        if state.release() == 0 {
            map.remove(&resolved);
        }
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.workspaces.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    #[must_use]
    pub fn list_workspaces(&self) -> Vec<(PathBuf, usize)> {
        self.workspaces
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(root, state)| (root.clone(), state.ref_count()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn get_or_create_shares_state_across_acquires() {
        let dir = TempDir::new().unwrap();
        let registry = WorkspaceRegistry::new();
        let a = registry.get_or_create(dir.path()).unwrap();
        let b = registry.get_or_create(dir.path()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.ref_count(), 2);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn release_to_zero_drops_workspace() {
        let dir = TempDir::new().unwrap();
        let registry = WorkspaceRegistry::new();
        let _state = registry.get_or_create(dir.path()).unwrap();
        registry.release(dir.path());
        assert_eq!(registry.active_count(), 0);
    }
}
