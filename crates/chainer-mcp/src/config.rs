//! Configuration for the downstream server fleet.
//!
//! The config file is JSON with a single `mcpServers` table:
//!
//! ```json
//! { "mcpServers": { "fetch": { "command": "npx",
//!                              "args": ["-y", "fetch-mcp"],
//!                              "env": { "TOKEN": "..." } } } }
//! ```
//!
//! The entry keyed by the reserved self-key is never a discovery target.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Top-level configuration: the table of downstream servers.
///
/// A `BTreeMap` keeps discovery order deterministic across runs, which in
/// turn keeps the registry's primary alias list stable for identical configs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChainerConfig {
    #[serde(default, rename = "mcpServers")]
    pub mcp_servers: BTreeMap<String, ServerConfig>,
}

/// Configuration for a single downstream server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Command to run (e.g., "npx", "python3").
    pub command: String,
    /// Arguments to pass to the command.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables merged over the parent environment.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Per-server request timeout in milliseconds (default: 30000).
    #[serde(default, rename = "timeoutMs")]
    pub timeout_ms: Option<u64>,
}

impl ChainerConfig {
    /// Load and parse the config file. Malformed config is fatal at startup.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }
}
