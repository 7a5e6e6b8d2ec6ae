//! Chain execution: substitute, call, extract, repeat.
//!
//! Steps run strictly in order; the carry from step *k* feeds step *k+1* and
//! intermediate payloads never leave the process. Any per-step failure
//! aborts the whole chain.

use crate::error::ChainError;
use crate::extract::{extract_input, extract_output};
use crate::step::ChainStep;
use crate::template::{Carry, substitute, validate_template};
use chainer_mcp::ToolRegistry;
use serde_json_path::JsonPath;

/// Validate a chain before any downstream call is made.
///
/// Rejects an empty chain, templates that are not valid-JSON-with-a-hole,
/// malformed JSONPaths, and tool names with no registry entry. Catching all
/// of this up front means a bad chain never burns a downstream invocation.
pub async fn validate(registry: &ToolRegistry, steps: &[ChainStep]) -> Result<(), ChainError> {
    if steps.is_empty() {
        return Err(ChainError::EmptyChain);
    }
    for (index, step) in steps.iter().enumerate() {
        validate_template(&step.tool_args).map_err(|e| ChainError::InvalidTemplate {
            step: index,
            message: e.to_string(),
        })?;
        for path in [&step.input_path, &step.output_path].into_iter().flatten() {
            JsonPath::parse(path).map_err(|e| ChainError::InvalidPath {
                step: index,
                path: path.clone(),
                message: e.to_string(),
            })?;
        }
        if registry.find(&step.tool_name).await.is_none() {
            return Err(ChainError::ToolNotFound {
                step: index,
                tool: step.tool_name.clone(),
            });
        }
    }
    Ok(())
}

/// Run a chain to completion and return the final carry text.
pub async fn run_chain(registry: &ToolRegistry, steps: &[ChainStep]) -> Result<String, ChainError> {
    validate(registry, steps).await?;

    let mut carry: Option<String> = None;
    for (index, step) in steps.iter().enumerate() {
        // Resolved again per step: a rediscovery mid-chain may have replaced
        // or dropped the record.
        let record = registry
            .find(&step.tool_name)
            .await
            .ok_or_else(|| ChainError::ToolNotFound {
                step: index,
                tool: step.tool_name.clone(),
            })?;

        let staged = match (&carry, &step.input_path) {
            (Some(prev), Some(path)) => {
                let path = JsonPath::parse(path).map_err(|e| ChainError::InvalidPath {
                    step: index,
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                extract_input(prev, &path)
            }
            (Some(prev), None) => Carry::Text(prev.clone()),
            (None, _) => Carry::None,
        };

        let substituted = substitute(&step.tool_args, &staged);
        let arguments: serde_json::Value =
            serde_json::from_str(&substituted).map_err(|e| ChainError::Substitution {
                step: index,
                message: e.to_string(),
            })?;

        tracing::debug!(step = index, tool = %step.tool_name, "invoking chain step");
        let result = record
            .client
            .call_tool(&record.tool.name, arguments)
            .await
            .map_err(|e| ChainError::Aborted {
                step: index,
                tool: step.tool_name.clone(),
                source: e,
            })?;

        let text = result
            .get("content")
            .and_then(|c| c.get(0))
            .and_then(|block| block.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| ChainError::EmptyResponse {
                step: index,
                tool: step.tool_name.clone(),
            })?
            .to_string();

        carry = Some(match &step.output_path {
            Some(path) => {
                let path = JsonPath::parse(path).map_err(|e| ChainError::InvalidPath {
                    step: index,
                    path: path.clone(),
                    message: e.to_string(),
                })?;
                extract_output(&text, &path)
            }
            None => text,
        });
    }

    // The chain is non-empty, so the carry is set by the time we get here.
    Ok(carry.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainer_mcp::{ChainerConfig, ServerConfig};
    use serde_json::json;

    /// Mock downstream with three tools: `emit` returns the text given on
    /// the python command line, `dump` returns its arguments re-encoded as
    /// JSON text, and `blank` returns an empty content array.
    fn mock_server(server_name: &str, emit_text: &str) -> ServerConfig {
        let script = format!(
            r#"
import sys, json
emit = sys.argv[1]
for line in sys.stdin:
    line = line.strip()
    if not line:
        continue
    req = json.loads(line)
    if 'id' not in req:
        continue
    m = req['method']
    if m == 'initialize':
        r = {{'protocolVersion': '2024-11-05', 'capabilities': {{'tools': {{}}}},
             'serverInfo': {{'name': '{server_name}', 'version': '1.0.0'}}}}
    elif m == 'tools/list':
        r = {{'tools': [{{'name': 'emit', 'inputSchema': {{'type': 'object'}}}},
                        {{'name': 'dump', 'inputSchema': {{'type': 'object'}}}},
                        {{'name': 'blank', 'inputSchema': {{'type': 'object'}}}}]}}
    elif m == 'tools/call':
        name = req['params']['name']
        args = req['params'].get('arguments', {{}})
        if name == 'emit':
            r = {{'content': [{{'type': 'text', 'text': emit}}]}}
        elif name == 'dump':
            r = {{'content': [{{'type': 'text', 'text': json.dumps(args, sort_keys=True)}}]}}
        else:
            r = {{'content': []}}
    else:
        r = {{}}
    sys.stdout.write(json.dumps({{'jsonrpc': '2.0', 'id': req['id'], 'result': r}}) + '\n')
    sys.stdout.flush()
"#
        );
        ServerConfig {
            command: "python3".to_string(),
            args: vec!["-c".to_string(), script, emit_text.to_string()],
            env: std::collections::HashMap::new(),
            timeout_ms: Some(5000),
        }
    }

    async fn registry_with(emit_text: &str) -> Option<ToolRegistry> {
        let registry = ToolRegistry::new();
        let config = ChainerConfig {
            mcp_servers: [("mock".to_string(), mock_server("mock", emit_text))]
                .into_iter()
                .collect(),
        };
        registry.discover(&config).await;
        if registry.server_count().await == 0 {
            // python3 unavailable; callers skip.
            return None;
        }
        Some(registry)
    }

    fn steps(value: serde_json::Value) -> Vec<ChainStep> {
        serde_json::from_value(value).unwrap()
    }

    #[tokio::test]
    async fn single_step_passthrough() {
        let Some(registry) = registry_with("hello").await else {
            return;
        };
        let chain = steps(json!([{"toolName": "mock_emit", "toolArgs": "{}"}]));
        let out = run_chain(&registry, &chain).await.unwrap();
        assert_eq!(out, "hello");
        registry.close_all().await;
    }

    #[tokio::test]
    async fn two_step_string_sentinel() {
        let Some(registry) = registry_with("<html>..</html>").await else {
            return;
        };
        let chain = steps(json!([
            {"toolName": "mock_emit", "toolArgs": "{\"url\": \"x\"}"},
            {"toolName": "mock_dump", "toolArgs": "{\"xml\": CHAIN_RESULT, \"q\": \"//h1\"}"},
        ]));
        let out = run_chain(&registry, &chain).await.unwrap();
        let dumped: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(dumped, json!({"q": "//h1", "xml": "<html>..</html>"}));
        registry.close_all().await;
    }

    #[tokio::test]
    async fn quoted_sentinel_in_array() {
        let Some(registry) = registry_with("a").await else {
            return;
        };
        let chain = steps(json!([
            {"toolName": "mock_emit", "toolArgs": "{}"},
            {"toolName": "mock_dump", "toolArgs": "{\"items\": [\"CHAIN_RESULT\"]}"},
        ]));
        let out = run_chain(&registry, &chain).await.unwrap();
        let dumped: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(dumped, json!({"items": ["a"]}));
        registry.close_all().await;
    }

    #[tokio::test]
    async fn input_path_unwraps_scalar() {
        let Some(registry) = registry_with(r#"{"count":3,"items":[{"id":7}]}"#).await else {
            return;
        };
        let chain = steps(json!([
            {"toolName": "mock_emit", "toolArgs": "{}"},
            {"toolName": "mock_dump", "toolArgs": "{\"n\": CHAIN_RESULT}",
             "inputPath": "$.count"},
        ]));
        let out = run_chain(&registry, &chain).await.unwrap();
        let dumped: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(dumped, json!({"n": 3}));
        registry.close_all().await;
    }

    #[tokio::test]
    async fn output_path_stringifies_scalar() {
        let Some(registry) = registry_with(r#"{"items":[{"id":7}]}"#).await else {
            return;
        };
        let chain = steps(json!([
            {"toolName": "mock_emit", "toolArgs": "{}", "outputPath": "$.items[0].id"},
        ]));
        let out = run_chain(&registry, &chain).await.unwrap();
        assert_eq!(out, "7");
        registry.close_all().await;
    }

    #[tokio::test]
    async fn empty_chain_is_rejected() {
        let registry = ToolRegistry::new();
        match run_chain(&registry, &[]).await {
            Err(ChainError::EmptyChain) => {}
            other => panic!("expected EmptyChain, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_rejected_up_front() {
        let registry = ToolRegistry::new();
        let chain = steps(json!([{"toolName": "nope_nope", "toolArgs": "{}"}]));
        match run_chain(&registry, &chain).await {
            Err(ChainError::ToolNotFound { step: 0, tool }) => assert_eq!(tool, "nope_nope"),
            other => panic!("expected ToolNotFound, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_template_is_rejected_up_front() {
        let registry = ToolRegistry::new();
        let chain = steps(json!([{"toolName": "mock_emit", "toolArgs": "{broken"}]));
        match run_chain(&registry, &chain).await {
            Err(ChainError::InvalidTemplate { step: 0, .. }) => {}
            other => panic!("expected InvalidTemplate, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn bad_json_path_is_rejected_up_front() {
        let registry = ToolRegistry::new();
        let chain = steps(json!([
            {"toolName": "mock_emit", "toolArgs": "{}", "outputPath": "items["}
        ]));
        match run_chain(&registry, &chain).await {
            Err(ChainError::InvalidPath { step: 0, .. }) => {}
            other => panic!("expected InvalidPath, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_response_aborts_the_chain() {
        let Some(registry) = registry_with("unused").await else {
            return;
        };
        let chain = steps(json!([{"toolName": "mock_blank", "toolArgs": "{}"}]));
        match run_chain(&registry, &chain).await {
            Err(ChainError::EmptyResponse { step: 0, tool }) => assert_eq!(tool, "mock_blank"),
            other => panic!("expected EmptyResponse, got: {other:?}"),
        }
        registry.close_all().await;
    }

    #[tokio::test]
    async fn validation_covers_later_steps_before_any_call() {
        let Some(registry) = registry_with("hello").await else {
            return;
        };
        // Step 0 is fine, step 1 references a missing tool; nothing may run.
        let chain = steps(json!([
            {"toolName": "mock_emit", "toolArgs": "{}"},
            {"toolName": "ghost_tool", "toolArgs": "{}"},
        ]));
        match run_chain(&registry, &chain).await {
            Err(ChainError::ToolNotFound { step: 1, .. }) => {}
            other => panic!("expected ToolNotFound at step 1, got: {other:?}"),
        }
        registry.close_all().await;
    }
}
