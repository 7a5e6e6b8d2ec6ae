//! Upstream MCP surface: the stdio serve loop and the three fixed tools
//! (`mcp_chain`, `chainable_tools`, `discover_tools`).

pub mod rpc;
pub mod server;
pub mod tools;

pub use server::UpstreamServer;
