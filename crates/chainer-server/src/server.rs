//! The upstream MCP server loop over stdio.
//!
//! Reads newline-delimited JSON-RPC from stdin, dispatches each request on
//! its own task, and funnels responses through a single writer so output
//! frames never interleave. All logging goes to stderr; stdout belongs to
//! the protocol.

use crate::rpc::{RpcRequest, RpcResponse, code};
use crate::tools;
use chainer_mcp::{ChainerConfig, SELF_NAME, SELF_VERSION, ToolRegistry};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Outer deadline for any single upstream tool invocation.
const TOOL_CALL_TIMEOUT: Duration = Duration::from_secs(120);

/// Protocol version answered when the client does not name one.
const DEFAULT_PROTOCOL_VERSION: &str = "2024-11-05";

/// The upstream-facing server: three fixed tools over one stdio pair.
pub struct UpstreamServer {
    registry: Arc<ToolRegistry>,
    config: Arc<ChainerConfig>,
}

impl UpstreamServer {
    pub fn new(registry: Arc<ToolRegistry>, config: Arc<ChainerConfig>) -> Self {
        Self { registry, config }
    }

    /// Serve until stdin closes or `shutdown` fires, then close every
    /// downstream client.
    pub async fn serve(self, shutdown: CancellationToken) -> std::io::Result<()> {
        self.serve_io(tokio::io::stdin(), tokio::io::stdout(), shutdown)
            .await
    }

    /// Serve over arbitrary streams. Split out from [`Self::serve`] so tests
    /// can drive the loop through in-process pipes.
    pub async fn serve_io<R, W>(
        self,
        reader: R,
        writer: W,
        shutdown: CancellationToken,
    ) -> std::io::Result<()>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let server = Arc::new(self);

        let mut lines = BufReader::new(reader).lines();

        // Writer task: one line per response, flushed immediately.
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let writer_task = tokio::spawn(async move {
            let mut out = writer;
            while let Some(line) = write_rx.recv().await {
                if out.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if out.write_all(b"\n").await.is_err() {
                    break;
                }
                if out.flush().await.is_err() {
                    break;
                }
            }
        });

        loop {
            let line = tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("shutdown requested, draining");
                    break;
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => line,
                    Ok(None) => {
                        tracing::info!("upstream closed stdin");
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                },
            };

            if line.trim().is_empty() {
                continue;
            }

            let request: RpcRequest = match serde_json::from_str(&line) {
                Ok(req) => req,
                Err(e) => {
                    tracing::warn!(error = %e, "unparseable upstream frame");
                    // Salvage the id if there is one so the client sees the
                    // parse error instead of a dead request.
                    if let Some(id) = serde_json::from_str::<serde_json::Value>(&line)
                        .ok()
                        .and_then(|v| v.get("id").cloned())
                    {
                        let resp = RpcResponse::failure(
                            Some(id),
                            code::PARSE_ERROR,
                            format!("parse error: {e}"),
                        );
                        send_response(&write_tx, &resp).await;
                    }
                    continue;
                }
            };

            if request.id.is_none() {
                tracing::debug!(method = %request.method, "ignoring notification");
                continue;
            }

            // Each request runs on its own task; slow chains never block
            // list/ping traffic.
            let server = Arc::clone(&server);
            let write_tx = write_tx.clone();
            tokio::spawn(async move {
                let response = server.handle(request).await;
                send_response(&write_tx, &response).await;
            });
        }

        drop(write_tx);
        let _ = writer_task.await;

        server.registry.close_all().await;
        Ok(())
    }

    /// Handle one request. Callers have already filtered out notifications.
    pub async fn handle(&self, request: RpcRequest) -> RpcResponse {
        if request.method == "tools/call" {
            return self.handle_tool_call(request).await;
        }
        let id = request.id.clone();
        match request.method.as_str() {
            "initialize" => RpcResponse::success(id, self.initialize_result(&request)),
            "ping" => RpcResponse::success(id, serde_json::json!({})),
            "tools/list" => {
                RpcResponse::success(id, serde_json::json!({ "tools": tools::definitions() }))
            }
            other => RpcResponse::failure(
                id,
                code::METHOD_NOT_FOUND,
                format!("method not found: {other}"),
            ),
        }
    }

    fn initialize_result(&self, request: &RpcRequest) -> serde_json::Value {
        // Echo the client's protocol version when it names one; clients that
        // sent a version expect it back.
        let protocol = request
            .params
            .as_ref()
            .and_then(|p| p.get("protocolVersion"))
            .and_then(|v| v.as_str())
            .unwrap_or(DEFAULT_PROTOCOL_VERSION);
        serde_json::json!({
            "protocolVersion": protocol,
            "capabilities": { "tools": {} },
            "serverInfo": {
                "name": SELF_NAME,
                "version": SELF_VERSION,
            }
        })
    }

    async fn handle_tool_call(&self, request: RpcRequest) -> RpcResponse {
        let id = request.id.clone();
        let Some(params) = request.params else {
            return RpcResponse::failure(id, code::INVALID_PARAMS, "missing params");
        };
        let Some(name) = params.get("name").and_then(|n| n.as_str()).map(String::from) else {
            return RpcResponse::failure(id, code::INVALID_PARAMS, "missing tool name");
        };
        let arguments = params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::json!({}));

        tracing::debug!(tool = %name, "upstream tool call");
        let call = tools::call(&self.registry, &self.config, &name, arguments);
        match tokio::time::timeout(TOOL_CALL_TIMEOUT, call).await {
            Ok(Ok(result)) => RpcResponse::success(id, result),
            Ok(Err(failure)) => RpcResponse::failure(id, failure.code, failure.message),
            Err(_) => RpcResponse::failure(
                id,
                code::INTERNAL_ERROR,
                format!("tool '{name}' timed out after {}s", TOOL_CALL_TIMEOUT.as_secs()),
            ),
        }
    }
}

async fn send_response(write_tx: &mpsc::Sender<String>, response: &RpcResponse) {
    match serde_json::to_string(response) {
        Ok(line) => {
            if write_tx.send(line).await.is_err() {
                tracing::warn!("writer task gone, dropping response");
            }
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize response"),
    }
}
