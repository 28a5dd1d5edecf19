//! MCP session layer (§4.9, §4.10): the rmcp-based tool server and the
//! search-first policy middleware it enforces around `read_file`/`read_symbol`.

pub mod policy;
pub mod server;

pub use policy::{SearchFirstMode, SearchUsage};
pub use server::SariServer;
