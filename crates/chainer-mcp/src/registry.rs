//! Process-wide tool registry built by discovery over the downstream fleet.
//!
//! Each discovered tool is registered under three aliases: the server's
//! reported name qualified (`servername_tool`), the config key qualified
//! (`serverkey_tool`), and the bare tool name. Hyphens normalize to
//! underscores so aliases stay valid identifiers for upstream agents. The
//! bare name is last-writer-wins across servers; the qualified forms are the
//! stable way to address a tool.

use crate::client::{Connection, McpClient, ToolInfo};
use crate::config::ChainerConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Config key under which this process itself would be registered; never a
/// discovery target (self-loop prevention).
pub const SELF_KEY: &str = "mcp_tool_chainer";

/// An entry in the registry: one tool on one connected downstream server.
#[derive(Clone)]
pub struct ToolRecord {
    pub server_key: String,
    pub server_name: String,
    pub server_version: String,
    pub tool: ToolInfo,
    pub client: Arc<McpClient>,
}

#[derive(Default)]
struct Inner {
    clients: Vec<Arc<McpClient>>,
    tools: HashMap<String, Arc<ToolRecord>>,
    /// Primary aliases (`servername_tool`) in insertion order, deduplicated.
    primary: Vec<String>,
}

/// Registry of every chainable downstream tool.
///
/// `discover` is the sole mutator and rebuilds the registry wholesale;
/// readers during a rediscovery may observe a transient empty state.
#[derive(Default)]
pub struct ToolRegistry {
    inner: RwLock<Inner>,
}

/// Replace every hyphen with an underscore.
fn normalize(s: &str) -> String {
    s.replace('-', "_")
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the registry from the config.
    ///
    /// Total over the config: every non-self server is attempted,
    /// per-server failures are logged and skipped, and discovery always
    /// completes with whatever connected. Existing clients are closed first,
    /// so chains in flight across a rediscovery may fail.
    pub async fn discover(&self, config: &ChainerConfig) -> Vec<String> {
        let mut inner = self.inner.write().await;
        let old = std::mem::take(&mut *inner);
        for client in old.clients {
            client.close().await;
        }

        for (key, server) in &config.mcp_servers {
            if key == SELF_KEY {
                tracing::debug!(server = %key, "skipping reserved self key");
                continue;
            }
            match McpClient::connect(key, server).await {
                Ok(Connection::Connected(client)) => {
                    register_client(&mut inner, Arc::new(client));
                }
                Ok(Connection::SelfReference) => {
                    tracing::warn!(server = %key, "skipping self-referential server");
                }
                Err(e) => {
                    tracing::warn!(server = %key, error = %e, "downstream failed discovery, skipping");
                }
            }
        }

        tracing::info!(
            servers = inner.clients.len(),
            tools = inner.primary.len(),
            "discovery complete"
        );
        inner.primary.clone()
    }

    /// Look up a tool record by any of its aliases.
    pub async fn find(&self, alias: &str) -> Option<Arc<ToolRecord>> {
        self.inner.read().await.tools.get(alias).cloned()
    }

    /// The primary aliases in insertion order.
    pub async fn primary_aliases(&self) -> Vec<String> {
        self.inner.read().await.primary.clone()
    }

    /// Number of connected downstream servers.
    pub async fn server_count(&self) -> usize {
        self.inner.read().await.clients.len()
    }

    /// Close every downstream client and clear the registry. For shutdown.
    pub async fn close_all(&self) {
        let old = std::mem::take(&mut *self.inner.write().await);
        for client in old.clients {
            client.close().await;
        }
    }
}

fn register_client(inner: &mut Inner, client: Arc<McpClient>) {
    let identity = client.identity().clone();
    for tool in client.tools() {
        let record = Arc::new(ToolRecord {
            server_key: client.key().to_string(),
            server_name: identity.name.clone(),
            server_version: identity.version.clone(),
            tool: tool.clone(),
            client: Arc::clone(&client),
        });

        let primary = format!("{}_{}", normalize(&identity.name), tool.name);
        let by_key = format!("{}_{}", normalize(client.key()), tool.name);

        if !inner.primary.contains(&primary) {
            inner.primary.push(primary.clone());
        }
        inner.tools.insert(primary, Arc::clone(&record));
        inner.tools.insert(by_key, Arc::clone(&record));
        inner.tools.insert(tool.name.clone(), record);
    }
    inner.clients.push(client);
}
