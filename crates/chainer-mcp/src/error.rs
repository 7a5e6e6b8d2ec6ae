//! Error types for downstream MCP communication.

use thiserror::Error;

/// Errors from talking to a downstream MCP server.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("failed to spawn MCP server '{key}': {source}")]
    Spawn {
        key: String,
        source: std::io::Error,
    },

    #[error("transport error for '{key}': {message}")]
    Transport { key: String, message: String },

    #[error("request '{method}' to '{key}' timed out after {timeout_ms}ms")]
    Timeout {
        key: String,
        method: String,
        timeout_ms: u64,
    },

    #[error("JSON-RPC error from '{key}' (code {code}): {message}")]
    Remote {
        key: String,
        code: i64,
        message: String,
    },

    #[error("protocol error from '{key}': {message}")]
    Protocol { key: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors from loading the server configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("config file '{path}' is not valid JSON: {message}")]
    Parse { path: String, message: String },
}
