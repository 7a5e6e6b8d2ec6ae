//! MCP client for one downstream server.
//!
//! Handles the protocol handshake (initialize + initialized notification),
//! tool discovery (tools/list), and tool invocation (tools/call).

use crate::config::ServerConfig;
use crate::error::McpError;
use crate::transport::{DEFAULT_REQUEST_TIMEOUT, StdioTransport};
use serde::Deserialize;
use std::time::Duration;

/// The identity this process presents as `clientInfo`, and the reserved
/// config key that is never a discovery target.
pub const SELF_NAME: &str = "mcp_tool_chainer";

/// The version this process presents as `clientInfo`.
pub const SELF_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol version advertised to downstream servers.
///
/// The literal "latest" is what this server has always sent; servers either
/// echo it back or answer with a pinned version, and both are accepted.
const PROTOCOL_VERSION: &str = "latest";

/// Identity a downstream server reports in its `initialize` response.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServerIdentity {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl ServerIdentity {
    /// Whether this identity is our own process (a misconfigured self-loop).
    pub fn is_self(&self) -> bool {
        self.name == SELF_NAME && self.version == SELF_VERSION
    }
}

/// One tool reported by a downstream server.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_schema", rename = "inputSchema")]
    pub input_schema: serde_json::Value,
}

fn default_schema() -> serde_json::Value {
    serde_json::json!({"type": "object", "properties": {}})
}

#[derive(Deserialize)]
struct InitializeResult {
    #[serde(rename = "serverInfo")]
    server_info: Option<ServerIdentity>,
}

#[derive(Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<ToolInfo>,
}

/// Outcome of connecting to a configured server.
pub enum Connection {
    /// The handshake succeeded and tools were discovered.
    Connected(McpClient),
    /// The server identified as this process; it has been closed and the
    /// registry must skip it.
    SelfReference,
}

/// Client for a single downstream MCP server.
pub struct McpClient {
    key: String,
    identity: ServerIdentity,
    transport: StdioTransport,
    tools: Vec<ToolInfo>,
}

impl McpClient {
    /// Spawn the server, perform the handshake, and discover its tools.
    pub async fn connect(key: &str, config: &ServerConfig) -> Result<Connection, McpError> {
        let timeout = config
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT);
        let transport =
            StdioTransport::spawn(key, &config.command, &config.args, &config.env, timeout)?;

        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": { "tools": {} },
            "clientInfo": {
                "name": SELF_NAME,
                "version": SELF_VERSION,
            }
        });

        let init = transport
            .request("initialize", Some(init_params), None)
            .await?;
        let identity = match serde_json::from_value::<InitializeResult>(init) {
            Ok(InitializeResult {
                server_info: Some(identity),
            }) => identity,
            // Some servers omit serverInfo; fall back to the config key so
            // alias construction still has a name to work with.
            _ => ServerIdentity {
                name: key.to_string(),
                version: String::new(),
            },
        };

        if identity.is_self() {
            tracing::warn!(server = %key, "downstream reports our own identity, skipping");
            transport.close().await;
            return Ok(Connection::SelfReference);
        }

        transport
            .notify("notifications/initialized", None)
            .await?;

        let list = transport.request("tools/list", None, None).await?;
        let tools = serde_json::from_value::<ToolsListResult>(list)
            .map_err(|e| McpError::Protocol {
                key: key.to_string(),
                message: format!("failed to parse tools/list response: {e}"),
            })?
            .tools;

        tracing::info!(
            server = %key,
            name = %identity.name,
            tools = tools.len(),
            "downstream connected"
        );

        Ok(Connection::Connected(Self {
            key: key.to_string(),
            identity,
            transport,
            tools,
        }))
    }

    /// Invoke a tool on this server and return the raw `result` object.
    ///
    /// The conventional payload lives at `result.content[0].text`; callers
    /// navigate it themselves.
    pub async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, McpError> {
        let params = serde_json::json!({
            "name": tool_name,
            "arguments": arguments,
        });
        self.transport
            .request("tools/call", Some(params), None)
            .await
    }

    /// The config key this client was spawned under.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The identity learned at handshake.
    pub fn identity(&self) -> &ServerIdentity {
        &self.identity
    }

    /// The tools this server reported.
    pub fn tools(&self) -> &[ToolInfo] {
        &self.tools
    }

    /// Close the connection. Idempotent.
    pub async fn close(&self) {
        self.transport.close().await;
    }
}
