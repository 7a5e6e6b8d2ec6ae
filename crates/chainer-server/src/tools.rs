//! The three tools this server exposes upstream.
//!
//! `chainable_tools` and `discover_tools` surface the registry; `mcp_chain`
//! runs the executor. Everything downstream-facing stays hidden behind these
//! three names.

use crate::rpc::code;
use chainer_chain::{ChainStep, run_chain};
use chainer_mcp::{ChainerConfig, ToolRegistry};
use serde::Deserialize;
use serde_json::{Value, json};

/// A tool invocation failure, mapped to a JSON-RPC error upstream.
#[derive(Debug)]
pub struct ToolFailure {
    pub code: i64,
    pub message: String,
}

impl ToolFailure {
    fn internal(message: impl Into<String>) -> Self {
        Self {
            code: code::INTERNAL_ERROR,
            message: message.into(),
        }
    }
}

#[derive(Deserialize)]
struct ChainParams {
    #[serde(rename = "mcpPath")]
    mcp_path: Vec<ChainStep>,
}

/// Tool definitions for `tools/list`.
pub fn definitions() -> Value {
    json!([
        {
            "name": "mcp_chain",
            "description": "Chain together multiple MCP server tools: each step's \
                output replaces CHAIN_RESULT in the next step's arguments, with \
                optional JSONPath filtering via inputPath/outputPath.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "mcpPath": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "toolName": { "type": "string" },
                                "toolArgs": { "type": "string" },
                                "inputPath": { "type": "string" },
                                "outputPath": { "type": "string" }
                            },
                            "required": ["toolName", "toolArgs"]
                        }
                    }
                },
                "required": ["mcpPath"]
            }
        },
        {
            "name": "chainable_tools",
            "description": "List every downstream tool that can appear in an \
                mcp_chain path, as a comma-separated list of aliases.",
            "inputSchema": { "type": "object", "properties": {} }
        },
        {
            "name": "discover_tools",
            "description": "Rediscover tools from every configured MCP server and \
                return the refreshed alias list.",
            "inputSchema": { "type": "object", "properties": {} }
        }
    ])
}

/// Dispatch a `tools/call` to one of the three fixed tools, returning the
/// MCP result envelope.
pub async fn call(
    registry: &ToolRegistry,
    config: &ChainerConfig,
    name: &str,
    arguments: Value,
) -> Result<Value, ToolFailure> {
    match name {
        "chainable_tools" => Ok(text_result(registry.primary_aliases().await.join(","))),
        "discover_tools" => Ok(text_result(registry.discover(config).await.join(","))),
        "mcp_chain" => {
            let params: ChainParams = serde_json::from_value(arguments).map_err(|e| {
                ToolFailure {
                    code: code::INVALID_PARAMS,
                    message: format!("invalid mcp_chain arguments: {e}"),
                }
            })?;
            let text = run_chain(registry, &params.mcp_path)
                .await
                .map_err(|e| ToolFailure::internal(e.to_string()))?;
            Ok(text_result(text))
        }
        other => Err(ToolFailure {
            code: code::METHOD_NOT_FOUND,
            message: format!("unknown tool: {other}"),
        }),
    }
}

fn text_result(text: String) -> Value {
    json!({
        "content": [ { "type": "text", "text": text } ]
    })
}
