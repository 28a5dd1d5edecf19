//! Workspace registries (§4.5): in-process refcounted shared state, and the
//! cross-process file-locked JSON registry daemons use to find each other.

pub mod server_registry;
pub mod workspace;

pub use server_registry::{DaemonEntry, ServerRegistry, WorkspaceEntry};
pub use workspace::{WorkspaceRegistry, WorkspaceState};
