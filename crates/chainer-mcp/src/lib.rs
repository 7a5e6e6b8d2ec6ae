//! MCP client fleet for the tool chainer.
//!
//! Spawns each configured downstream server as a child process, drives the
//! newline-delimited JSON-RPC handshake, and indexes every discovered tool in
//! a process-wide registry. The transport layer tolerates the stdout noise
//! real MCP servers produce (log lines, HTML error pages, pretty-printed
//! frames) and multiplexes concurrent requests by id.

pub mod client;
pub mod config;
pub mod error;
pub mod framing;
pub mod jsonrpc;
pub mod registry;
mod transport;

pub use client::{Connection, McpClient, SELF_NAME, SELF_VERSION, ServerIdentity, ToolInfo};
pub use config::{ChainerConfig, ServerConfig};
pub use error::{ConfigError, McpError};
pub use registry::{SELF_KEY, ToolRecord, ToolRegistry};
pub use transport::{DEFAULT_REQUEST_TIMEOUT, StdioTransport};
