//! Stdio transport for one downstream MCP server process.
//!
//! Spawns the child, serializes stdin writes through a single writer task,
//! and multiplexes responses by request id. The stdout reader survives log
//! noise and pretty-printed frames (see [`crate::framing`]); stderr is
//! drained on its own task and classified into tracing levels, never parsed
//! as frames.

use crate::error::McpError;
use crate::framing::FrameBuffer;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a closed child gets to exit after stdin EOF before being killed.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

type PendingTable = Arc<Mutex<HashMap<u64, oneshot::Sender<JsonRpcResponse>>>>;

/// Async stdio transport for one MCP server child process.
pub struct StdioTransport {
    key: String,
    next_id: AtomicU64,
    write_tx: mpsc::Sender<String>,
    pending: PendingTable,
    child: Mutex<Option<Child>>,
    /// Guards close-once semantics.
    closed: AtomicBool,
    /// Set when the child is gone: reader EOF, stdin write failure, or
    /// `close()`. Requests fail fast with `Transport` once this is set.
    disconnected: Arc<AtomicBool>,
    default_timeout: Duration,
    reader_handle: JoinHandle<()>,
    writer_handle: JoinHandle<()>,
    stderr_handle: JoinHandle<()>,
}

impl StdioTransport {
    /// Spawn the child process and start the reader/writer/stderr tasks.
    ///
    /// `env` is merged over the parent environment.
    pub fn spawn(
        key: &str,
        command: &str,
        args: &[String],
        env: &HashMap<String, String>,
        default_timeout: Duration,
    ) -> Result<Self, McpError> {
        let mut cmd = Command::new(command);
        cmd.args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| McpError::Spawn {
            key: key.to_string(),
            source: e,
        })?;

        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        let pending: PendingTable = Arc::new(Mutex::new(HashMap::new()));
        let disconnected = Arc::new(AtomicBool::new(false));

        // Writer task: drains the channel and writes frames to child stdin.
        // A write failure strands every in-flight request, so the pending
        // table is cleared to fail them with Transport instead of Timeout.
        let (write_tx, mut write_rx) = mpsc::channel::<String>(64);
        let pending_for_writer = Arc::clone(&pending);
        let disconnected_for_writer = Arc::clone(&disconnected);
        let writer_key = key.to_string();
        let writer_handle = tokio::spawn(async move {
            let mut stdin = stdin;
            while let Some(msg) = write_rx.recv().await {
                let write = async {
                    stdin.write_all(msg.as_bytes()).await?;
                    stdin.write_all(b"\n").await?;
                    stdin.flush().await
                };
                if let Err(e) = write.await {
                    tracing::warn!(server = %writer_key, error = %e, "stdin write failed");
                    disconnected_for_writer.store(true, Ordering::SeqCst);
                    pending_for_writer.lock().await.clear();
                    break;
                }
            }
        });

        // Reader task: feeds stdout chunks through the frame buffer and
        // dispatches frames by id. EOF means the child exited; all pending
        // continuations are failed at that point.
        let pending_for_reader = Arc::clone(&pending);
        let disconnected_for_reader = Arc::clone(&disconnected);
        let reader_key = key.to_string();
        let reader_handle = tokio::spawn(async move {
            let mut stdout = stdout;
            let mut frames = FrameBuffer::new();
            let mut chunk = [0u8; 4096];
            loop {
                match stdout.read(&mut chunk).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        let text = String::from_utf8_lossy(&chunk[..n]);
                        for frame in frames.push(&text) {
                            dispatch_frame(&reader_key, &frame, &pending_for_reader).await;
                        }
                    }
                }
            }
            tracing::debug!(server = %reader_key, "stdout closed");
            disconnected_for_reader.store(true, Ordering::SeqCst);
            pending_for_reader.lock().await.clear();
        });

        // Stderr task: classify and log, never parse.
        let stderr_key = key.to_string();
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log_stderr_line(&stderr_key, &line);
            }
        });

        Ok(Self {
            key: key.to_string(),
            next_id: AtomicU64::new(1),
            write_tx,
            pending,
            child: Mutex::new(Some(child)),
            closed: AtomicBool::new(false),
            disconnected,
            default_timeout,
            reader_handle,
            writer_handle,
            stderr_handle,
        })
    }

    /// The config key of the server this transport talks to.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Send a JSON-RPC request and wait for the matching response's `result`.
    ///
    /// `timeout` overrides the transport's default deadline for this call.
    /// Fails with `Transport` when the frame cannot be written or the child
    /// is gone, `Timeout` past the deadline, and `Remote` when the response
    /// carries a JSON-RPC error object.
    pub async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value, McpError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(self.transport_err("closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest::call(id, method, params);
        let serialized = serde_json::to_string(&request)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if self.write_tx.send(serialized).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(self.transport_err("writer closed"));
        }

        let deadline = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(resp)) => resp.into_outcome().map_err(|err| McpError::Remote {
                key: self.key.clone(),
                code: err.code,
                message: err.message,
            }),
            // The sender was dropped without resolving: the reader hit EOF
            // or the transport closed underneath us.
            Ok(Err(_)) => Err(self.transport_err("closed")),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(McpError::Timeout {
                    key: self.key.clone(),
                    method: method.to_string(),
                    timeout_ms: deadline.as_millis() as u64,
                })
            }
        }
    }

    /// Send a JSON-RPC notification (fire-and-forget).
    pub async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), McpError> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(self.transport_err("closed"));
        }
        let notification = JsonRpcRequest::notification(method, params);
        let serialized = serde_json::to_string(&notification)?;
        self.write_tx
            .send(serialized)
            .await
            .map_err(|_| self.transport_err("writer closed"))
    }

    /// Close the transport: fail pending requests, stop the IO tasks, signal
    /// the child to exit (stdin EOF, then kill after a grace period), and
    /// mark the transport disconnected. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.disconnected.store(true, Ordering::SeqCst);

        self.pending.lock().await.clear();
        self.reader_handle.abort();
        self.stderr_handle.abort();
        // Aborting the writer drops the child's stdin handle, delivering EOF.
        self.writer_handle.abort();

        let child = self.child.lock().await.take();
        if let Some(mut child) = child {
            match tokio::time::timeout(CLOSE_GRACE, child.wait()).await {
                Ok(_) => {}
                Err(_) => {
                    tracing::debug!(server = %self.key, "child did not exit on EOF, killing");
                    let _ = child.kill().await;
                }
            }
        }
        tracing::debug!(server = %self.key, "transport closed");
    }

    fn transport_err(&self, message: &str) -> McpError {
        McpError::Transport {
            key: self.key.clone(),
            message: message.to_string(),
        }
    }
}

/// Parse a frame candidate and resolve its pending continuation.
///
/// Candidates that fail to parse, lack a numeric id, or match no pending
/// request (late replies after a timeout or cancellation) are discarded at
/// debug level.
async fn dispatch_frame(key: &str, frame: &str, pending: &PendingTable) {
    let resp: JsonRpcResponse = match serde_json::from_str(frame) {
        Ok(r) => r,
        Err(e) => {
            tracing::debug!(server = %key, error = %e, "discarding unparseable frame candidate");
            return;
        }
    };
    let Some(id) = resp.id else {
        tracing::debug!(server = %key, "discarding frame without id");
        return;
    };
    let tx = pending.lock().await.remove(&id);
    match tx {
        Some(tx) => {
            if tx.send(resp).is_err() {
                tracing::debug!(server = %key, id, "continuation dropped before response");
            }
        }
        None => {
            tracing::debug!(server = %key, id, "discarding spurious response");
        }
    }
}

/// Severity a downstream stderr line maps to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StderrLevel {
    Error,
    Warn,
    Info,
    Debug,
}

/// Classify a stderr line by its leading tag; untagged lines that mention
/// "error" are errors, everything else is a warning.
pub(crate) fn stderr_level(line: &str) -> StderrLevel {
    let trimmed = line.trim_start();
    if trimmed.starts_with("[ERROR]") {
        StderrLevel::Error
    } else if trimmed.starts_with("[WARN]") {
        StderrLevel::Warn
    } else if trimmed.starts_with("[INFO]") {
        StderrLevel::Info
    } else if trimmed.starts_with("[DEBUG]") {
        StderrLevel::Debug
    } else if trimmed.to_ascii_lowercase().contains("error") {
        StderrLevel::Error
    } else {
        StderrLevel::Warn
    }
}

fn log_stderr_line(key: &str, line: &str) {
    match stderr_level(line) {
        StderrLevel::Error => tracing::error!(server = %key, "{line}"),
        StderrLevel::Warn => tracing::warn!(server = %key, "{line}"),
        StderrLevel::Info => tracing::info!(server = %key, "{line}"),
        StderrLevel::Debug => tracing::debug!(server = %key, "{line}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn_bash(key: &str, script: &str, timeout: Duration) -> Result<StdioTransport, McpError> {
        StdioTransport::spawn(
            key,
            "bash",
            &["-c".to_string(), script.to_string()],
            &HashMap::new(),
            timeout,
        )
    }

    #[tokio::test]
    async fn spawn_and_close_idle_child() {
        let transport = StdioTransport::spawn(
            "cat",
            "cat",
            &[],
            &HashMap::new(),
            DEFAULT_REQUEST_TIMEOUT,
        );
        assert!(transport.is_ok());
        transport.unwrap().close().await;
    }

    #[tokio::test]
    async fn spawn_nonexistent_command_fails() {
        let result = StdioTransport::spawn(
            "ghost",
            "this_command_does_not_exist_xyz123",
            &[],
            &HashMap::new(),
            DEFAULT_REQUEST_TIMEOUT,
        );
        match result {
            Err(McpError::Spawn { key, .. }) => assert_eq!(key, "ghost"),
            Err(other) => panic!("expected Spawn, got: {other:?}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[tokio::test]
    async fn request_response_roundtrip() {
        let script = r#"while IFS= read -r line; do id=$(echo "$line" | python3 -c "import sys,json; print(json.loads(sys.stdin.read())['id'])"); echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"result\":{\"ok\":true}}"; done"#;
        let transport = match spawn_bash("echoer", script, Duration::from_secs(5)) {
            Ok(t) => t,
            // Skip if bash/python3 are unavailable.
            Err(_) => return,
        };

        let result = transport
            .request("test/method", Some(serde_json::json!({})), None)
            .await;
        match result {
            Ok(value) => assert_eq!(value["ok"], true),
            Err(_) => {
                transport.close().await;
                return;
            }
        }
        transport.close().await;
    }

    #[tokio::test]
    async fn noisy_server_responses_still_dispatch() {
        // Emits a log line and an HTML line around a pretty-printed response.
        let script = r#"while IFS= read -r line; do id=$(echo "$line" | python3 -c "import sys,json; print(json.loads(sys.stdin.read())['id'])"); echo "[INFO] handling request"; printf '{\n  "jsonrpc": "2.0",\n  "id": %s,\n' "$id"; printf '  "result": {"ok": true}\n}\n'; echo "<!DOCTYPE html>"; done"#;
        let transport = match spawn_bash("noisy", script, Duration::from_secs(5)) {
            Ok(t) => t,
            Err(_) => return,
        };

        for _ in 0..3 {
            match transport.request("test/noise", None, None).await {
                Ok(value) => assert_eq!(value["ok"], true),
                Err(_) => {
                    transport.close().await;
                    return;
                }
            }
        }
        transport.close().await;
    }

    #[tokio::test]
    async fn remote_error_is_surfaced() {
        let script = r#"while IFS= read -r line; do id=$(echo "$line" | python3 -c "import sys,json; print(json.loads(sys.stdin.read())['id'])"); echo "{\"jsonrpc\":\"2.0\",\"id\":$id,\"error\":{\"code\":-32601,\"message\":\"no such method\"}}"; done"#;
        let transport = match spawn_bash("erroring", script, Duration::from_secs(5)) {
            Ok(t) => t,
            Err(_) => return,
        };

        match transport.request("test/error", None, None).await {
            Err(McpError::Remote { code, message, .. }) => {
                assert_eq!(code, -32601);
                assert_eq!(message, "no such method");
            }
            other => {
                transport.close().await;
                panic!("expected Remote, got: {other:?}");
            }
        }
        transport.close().await;
    }

    #[tokio::test]
    async fn timeout_fires_on_unresponsive_server() {
        // `sleep` never writes to stdout.
        let transport = StdioTransport::spawn(
            "sleeper",
            "sleep",
            &["10".to_string()],
            &HashMap::new(),
            Duration::from_millis(100),
        )
        .unwrap();

        let result = transport.request("test/method", None, None).await;
        match result {
            Err(McpError::Timeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 100),
            other => panic!("expected Timeout, got: {other:?}"),
        }
        // The pending table was cleaned up on timeout.
        assert!(transport.pending.lock().await.is_empty());
        transport.close().await;
    }

    #[tokio::test]
    async fn per_call_timeout_overrides_default() {
        let transport = StdioTransport::spawn(
            "sleeper",
            "sleep",
            &["10".to_string()],
            &HashMap::new(),
            Duration::from_secs(30),
        )
        .unwrap();

        let result = transport
            .request("test/method", None, Some(Duration::from_millis(50)))
            .await;
        match result {
            Err(McpError::Timeout { timeout_ms, .. }) => assert_eq!(timeout_ms, 50),
            other => panic!("expected Timeout, got: {other:?}"),
        }
        transport.close().await;
    }

    #[tokio::test]
    async fn request_ids_strictly_increase() {
        let transport = StdioTransport::spawn(
            "cat",
            "cat",
            &[],
            &HashMap::new(),
            Duration::from_millis(50),
        )
        .unwrap();

        // cat echoes each request line straight back; either the echo
        // resolves the id or the request times out, and every call
        // allocates a fresh id.
        for _ in 0..3 {
            let _ = transport.request("test/m", None, None).await;
        }
        assert_eq!(transport.next_id.load(Ordering::SeqCst), 4);
        transport.close().await;
    }

    #[tokio::test]
    async fn request_after_close_fails_with_transport() {
        let transport = StdioTransport::spawn(
            "cat",
            "cat",
            &[],
            &HashMap::new(),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .unwrap();
        transport.close().await;
        // Idempotent.
        transport.close().await;

        match transport.request("test/m", None, None).await {
            Err(McpError::Transport { .. }) => {}
            other => panic!("expected Transport, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn child_exit_fails_requests() {
        // Child exits immediately without responding; once the reader sees
        // EOF the transport is disconnected and requests fail fast.
        let transport = spawn_bash("quitter", "exit 0", Duration::from_secs(30)).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        match transport.request("test/m", None, None).await {
            Err(McpError::Transport { .. }) => {}
            other => panic!("expected Transport, got: {other:?}"),
        }
        transport.close().await;
    }

    #[test]
    fn stderr_classification() {
        assert_eq!(stderr_level("[ERROR] boom"), StderrLevel::Error);
        assert_eq!(stderr_level("[WARN] careful"), StderrLevel::Warn);
        assert_eq!(stderr_level("[INFO] started"), StderrLevel::Info);
        assert_eq!(stderr_level("[DEBUG] trace"), StderrLevel::Debug);
        assert_eq!(stderr_level("an ERROR occurred"), StderrLevel::Error);
        assert_eq!(stderr_level("listening on 8080"), StderrLevel::Warn);
        assert_eq!(stderr_level("  [INFO] indented"), StderrLevel::Info);
    }
}
