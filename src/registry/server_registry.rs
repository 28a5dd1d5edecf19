//! Cross-process server registry (§4.5): a file-locked JSON document mapping
//! booted daemons to the workspaces they own.
//!
//! Grounded in `examples/original_source/sari/core/registry.py`'s
//! `ServerRegistry` — v2 schema (`daemons`/`workspaces`), `_prune_dead_locked`,
//! `set_workspace`'s draining hand-off when a workspace's `boot_id` is
//! reassigned, the v1→v2 `_ensure_v2` migration, and `find_free_port`.

use crate::error::{RegistryError, Result as ServerResult, ServerError};
use crate::types::BootId;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::{Path, PathBuf};

const REGISTRY_VERSION: &str = "2.0";
const DEFAULT_START_PORT: u16 = 47777;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonEntry {
    pub host: String,
    pub port: u16,
    pub pid: u32,
    pub start_ts: i64,
    pub last_seen_ts: i64,
    pub draining: bool,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http_port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceEntry {
    pub boot_id: String,
    pub last_active_ts: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub http_host: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryDoc {
    version: String,
    daemons: HashMap<String, DaemonEntry>,
    workspaces: HashMap<String, WorkspaceEntry>,
}

impl Default for RegistryDoc {
    fn default() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
            daemons: HashMap::new(),
            workspaces: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct LegacyInstance {
    port: u16,
    pid: u32,
    #[serde(default)]
    start_ts: Option<f64>,
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyDoc {
    instances: HashMap<String, LegacyInstance>,
}

/// File-locked JSON registry shared by every sari process on the machine.
pub struct ServerRegistry {
    registry_path: PathBuf,
    lock_path: PathBuf,
}

impl ServerRegistry {
    #[must_use]
    pub fn new(registry_path: PathBuf) -> Self {
        let lock_path = registry_path.with_extension("json.lock");
        Self { registry_path, lock_path }
    }

    /// Default registry location, honoring `SARI_REGISTRY_FILE`.
    #[must_use]
    pub fn default_path() -> PathBuf {
        if let Ok(p) = std::env::var("SARI_REGISTRY_FILE") {
            return PathBuf::from(p);
        }
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("sari")
            .join("server.json")
    }

    fn with_lock<T>(&self, exclusive: bool, f: impl FnOnce() -> ServerResult<T>) -> ServerResult<T> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(RegistryError::Io)?;
        }
        let lock_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.lock_path)
            .map_err(RegistryError::Io)?;
        if exclusive {
            lock_file.lock_exclusive().map_err(|e| RegistryError::LockFailed(e.to_string()))?;
        } else {
            lock_file.lock_shared().map_err(|e| RegistryError::LockFailed(e.to_string()))?;
        }
        let result = f();
        let _ = FileExt::unlock(&lock_file);
        result
    }

    fn load_unlocked(&self) -> RegistryDoc {
        let Ok(mut file) = File::open(&self.registry_path) else {
            return RegistryDoc::default();
        };
        let mut raw = String::new();
        if file.read_to_string(&mut raw).is_err() {
            return RegistryDoc::default();
        }
        Self::parse_and_migrate(&raw)
    }

    fn parse_and_migrate(raw: &str) -> RegistryDoc {
        if let Ok(doc) = serde_json::from_str::<RegistryDoc>(raw) {
            if doc.version == REGISTRY_VERSION {
                return doc;
            }
        }
        if let Ok(legacy) = serde_json::from_str::<LegacyDoc>(raw) {
            let mut doc = RegistryDoc::default();
            let now = now_unix();
            for (ws, inst) in legacy.instances {
                let boot_id = BootId::legacy(inst.pid, inst.port).0;
                doc.daemons.insert(
                    boot_id.clone(),
                    DaemonEntry {
                        host: "127.0.0.1".to_string(),
                        port: inst.port,
                        pid: inst.pid,
                        start_ts: inst.start_ts.map_or(now, |t| t as i64),
                        last_seen_ts: now,
                        draining: false,
                        version: inst.version.unwrap_or_else(|| "legacy".to_string()),
                        http_host: None,
                        http_port: None,
                    },
                );
                doc.workspaces.insert(
                    ws,
                    WorkspaceEntry { boot_id, last_active_ts: now, http_port: None, http_host: None },
                );
            }
            return doc;
        }
        RegistryDoc::default()
    }

    fn atomic_write(&self, doc: &RegistryDoc) -> ServerResult<()> {
        if let Some(parent) = self.registry_path.parent() {
            std::fs::create_dir_all(parent).map_err(RegistryError::Io)?;
        }
        let tmp_path = self.registry_path.with_extension(format!("json.tmp.{}", std::process::id()));
        let body = serde_json::to_vec_pretty(doc).map_err(ServerError::Json)?;
        {
            let mut tmp = File::create(&tmp_path).map_err(RegistryError::Io)?;
            tmp.write_all(&body).map_err(RegistryError::Io)?;
            tmp.sync_all().map_err(RegistryError::Io)?;
        }
        std::fs::rename(&tmp_path, &self.registry_path).map_err(RegistryError::Io)?;
        Ok(())
    }

    fn update(&self, f: impl FnOnce(&mut RegistryDoc)) -> ServerResult<()> {
        self.with_lock(true, || {
            let mut doc = self.load_unlocked();
            self.prune_dead(&mut doc);
            f(&mut doc);
            self.atomic_write(&doc)
        })
    }

    fn prune_dead(&self, doc: &mut RegistryDoc) {
        let dead: Vec<String> =
            doc.daemons.iter().filter(|(_, d)| !process_alive(d.pid)).map(|(id, _)| id.clone()).collect();
        for id in &dead {
            doc.daemons.remove(id);
        }
        if !dead.is_empty() {
            doc.workspaces.retain(|_, w| !dead.contains(&w.boot_id));
        }
    }

    /// # Errors
    ///
    /// Returns `ServerError::Registry` on lock or IO failure.
    pub fn register_daemon(&self, boot_id: &BootId, host: &str, port: u16, pid: u32, version: &str) -> ServerResult<()> {
        let now = now_unix();
        self.update(|doc| {
            let existing = doc.daemons.get(&boot_id.0);
            let start_ts = existing.map_or(now, |d| d.start_ts);
            let draining = existing.is_some_and(|d| d.draining);
            doc.daemons.insert(
                boot_id.0.clone(),
                DaemonEntry {
                    host: host.to_string(),
                    port,
                    pid,
                    start_ts,
                    last_seen_ts: now,
                    draining,
                    version: version.to_string(),
                    http_host: None,
                    http_port: None,
                },
            );
        })
    }

    /// # Errors
    ///
    /// Returns `ServerError::Registry` on lock or IO failure.
    pub fn touch_daemon(&self, boot_id: &BootId) -> ServerResult<()> {
        let now = now_unix();
        self.update(|doc| {
            if let Some(d) = doc.daemons.get_mut(&boot_id.0) {
                d.last_seen_ts = now;
            }
        })
    }

    /// # Errors
    ///
    /// Returns `ServerError::Registry` on lock or IO failure.
    pub fn set_daemon_draining(&self, boot_id: &BootId, draining: bool) -> ServerResult<()> {
        self.update(|doc| {
            if let Some(d) = doc.daemons.get_mut(&boot_id.0) {
                d.draining = draining;
            }
        })
    }

    /// # Errors
    ///
    /// Returns `ServerError::Registry` on lock or IO failure.
    pub fn unregister_daemon(&self, boot_id: &BootId) -> ServerResult<()> {
        self.update(|doc| {
            doc.daemons.remove(&boot_id.0);
            doc.workspaces.retain(|_, w| w.boot_id != boot_id.0);
        })
    }

    /// Binds `workspace_root` to `boot_id`. If the workspace was previously
    /// bound to a different `boot_id`, that daemon is marked `draining` so
    /// in-flight sessions can finish without accepting new ownership (§3).
    /// Returns the previous `boot_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Registry` on lock or IO failure.
    pub fn set_workspace(&self, workspace_root: &Path, boot_id: &BootId) -> ServerResult<Option<String>> {
        let ws = normalize(workspace_root);
        let now = now_unix();
        let mut previous = None;
        self.update(|doc| {
            let prev = doc.workspaces.get(&ws).map(|w| w.boot_id.clone());
            previous = prev.clone();
            let http_port = doc.workspaces.get(&ws).and_then(|w| w.http_port);
            let http_host = doc.workspaces.get(&ws).and_then(|w| w.http_host.clone());
            doc.workspaces.insert(
                ws.clone(),
                WorkspaceEntry { boot_id: boot_id.0.clone(), last_active_ts: now, http_port, http_host },
            );
            if let Some(prev_id) = prev {
                if prev_id != boot_id.0 {
                    if let Some(d) = doc.daemons.get_mut(&prev_id) {
                        d.draining = true;
                    }
                }
            }
        })?;
        Ok(previous)
    }

    /// # Errors
    ///
    /// Returns `ServerError::Registry` on lock or IO failure.
    pub fn unregister_workspace(&self, workspace_root: &Path) -> ServerResult<()> {
        let ws = normalize(workspace_root);
        self.update(|doc| {
            doc.workspaces.remove(&ws);
        })
    }

    /// Resolves the live daemon owning `workspace_root`, pruning a binding
    /// to a dead or missing daemon as a side effect (§3).
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Registry` on lock or IO failure.
    pub fn resolve_workspace_daemon(&self, workspace_root: &Path) -> ServerResult<Option<DaemonEntry>> {
        let ws = normalize(workspace_root);
        let doc = self.with_lock(false, || Ok(self.load_unlocked()))?;
        let Some(entry) = doc.workspaces.get(&ws) else { return Ok(None) };
        let Some(daemon) = doc.daemons.get(&entry.boot_id) else {
            self.unregister_workspace(workspace_root)?;
            return Ok(None);
        };
        if !process_alive(daemon.pid) {
            self.unregister_daemon(&BootId(entry.boot_id.clone()))?;
            return Ok(None);
        }
        Ok(Some(daemon.clone()))
    }

    /// Finds a port free both in the registry's live-daemon set and at the
    /// OS level, starting from `DEFAULT_START_PORT` (§4.5).
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Registry` wrapping `NoFreePort` if none is free
    /// up to 65535.
    pub fn find_free_port(&self) -> ServerResult<u16> {
        let doc = self.with_lock(false, || Ok(self.load_unlocked()))?;
        let used: HashSet<u16> = doc.daemons.values().filter(|d| process_alive(d.pid)).map(|d| d.port).collect();

        for port in DEFAULT_START_PORT..=u16::MAX {
            if used.contains(&port) {
                continue;
            }
            if TcpListener::bind(("127.0.0.1", port)).is_ok() {
                return Ok(port);
            }
        }
        Err(ServerError::Registry(RegistryError::NoFreePort(DEFAULT_START_PORT)))
    }
}

fn normalize(path: &Path) -> String {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf()).to_string_lossy().into_owned()
}

fn now_unix() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

#[cfg(not(unix))]
fn process_alive(pid: u32) -> bool {
    pid != 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry_in(dir: &TempDir) -> ServerRegistry {
        ServerRegistry::new(dir.path().join("server.json"))
    }

    #[test]
    fn registers_and_resolves_live_daemon() {
        let dir = TempDir::new().unwrap();
        let reg = registry_in(&dir);
        let boot_id = BootId::generate(std::process::id(), 4000);
        reg.register_daemon(&boot_id, "127.0.0.1", 4000, std::process::id(), "0.1.0").unwrap();
        let ws = dir.path().join("workspace");
        std::fs::create_dir_all(&ws).unwrap();
        reg.set_workspace(&ws, &boot_id).unwrap();

        let resolved = reg.resolve_workspace_daemon(&ws).unwrap().unwrap();
        assert_eq!(resolved.port, 4000);
        assert!(!resolved.draining);
    }

    #[test]
    fn reassigning_workspace_marks_previous_daemon_draining() {
        let dir = TempDir::new().unwrap();
        let reg = registry_in(&dir);
        let pid = std::process::id();
        let boot_a = BootId::generate(pid, 4001);
        let boot_b = BootId::generate(pid, 4002);
        reg.register_daemon(&boot_a, "127.0.0.1", 4001, pid, "0.1.0").unwrap();
        reg.register_daemon(&boot_b, "127.0.0.1", 4002, pid, "0.1.0").unwrap();
        let ws = dir.path().join("workspace");
        std::fs::create_dir_all(&ws).unwrap();

        reg.set_workspace(&ws, &boot_a).unwrap();
        let previous = reg.set_workspace(&ws, &boot_b).unwrap();
        assert_eq!(previous, Some(boot_a.0.clone()));

        let doc = reg.load_unlocked();
        assert!(doc.daemons.get(&boot_a.0).unwrap().draining);
    }

    #[test]
    fn migrates_legacy_v1_registry() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("server.json");
        std::fs::write(
            &path,
            r#"{"version":"1.0","instances":{"/some/workspace":{"port":5000,"pid":999999,"status":"active"}}}"#,
        )
        .unwrap();
        let reg = ServerRegistry::new(path);
        let doc = reg.load_unlocked();
        assert_eq!(doc.version, REGISTRY_VERSION);
        assert_eq!(doc.workspaces.len(), 1);
    }

    #[test]
    fn find_free_port_avoids_registered_port() {
        let dir = TempDir::new().unwrap();
        let reg = registry_in(&dir);
        let port = reg.find_free_port().unwrap();
        assert!(port >= DEFAULT_START_PORT);
    }
}
