//! Stdio MCP transport: one long-lived child process per server, JSON-RPC
//! 2.0 line-framed on stdin/stdout, stderr drained into logs.
//!
//! Lifecycle: the child is spawned lazily on first use and kept alive across
//! calls.  On EOF or a write failure the client marks itself dead, fails all
//! in-flight requests with a transport error, and the next call respawns the
//! child.  The process is killed on drop.

use std::collections::{BTreeMap, HashMap};
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{oneshot, Mutex};
use tokio_util::codec::{FramedRead, LinesCodec};
use tracing::{debug, info, warn};

use crate::client::{
    McpClient, McpToolInfo, ToolCallResult, ToolListResult, VerifyOutcome, VerifyStatus,
};
use crate::jsonrpc;

type Pending = Arc<StdMutex<HashMap<i64, oneshot::Sender<Value>>>>;

struct Live {
    stdin: ChildStdin,
    _child: Child,
    generation: u64,
    initialized: bool,
}

struct Inner {
    program: String,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    call_timeout: Duration,
    next_id: AtomicI64,
    generation: AtomicU64,
    state: Mutex<Option<Live>>,
    pending: Pending,
}

pub struct StdioMcpClient {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for StdioMcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StdioMcpClient").finish()
    }
}

impl StdioMcpClient {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        env: BTreeMap<String, String>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                program: program.into(),
                args,
                env,
                call_timeout,
                next_id: AtomicI64::new(1),
                generation: AtomicU64::new(0),
                state: Mutex::new(None),
                pending: Arc::new(StdMutex::new(HashMap::new())),
            }),
        }
    }

    /// Kill the child and fail anything in flight.  The next call respawns.
    pub async fn shutdown(&self) {
        let mut state = self.inner.state.lock().await;
        if state.take().is_some() {
            info!(program = %self.inner.program, "stdio MCP client shut down");
        }
        Inner::drain_pending(&self.inner.pending);
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, String> {
        self.ensure_initialized().await?;
        self.inner.send_request(method, params).await
    }

    async fn ensure_initialized(&self) -> Result<(), String> {
        {
            let state = self.inner.state.lock().await;
            if matches!(state.as_ref(), Some(live) if live.initialized) {
                return Ok(());
            }
        }
        self.spawn_if_dead().await?;
        self.inner
            .send_request("initialize", jsonrpc::initialize_params())
            .await?;
        self.inner
            .send_line(&jsonrpc::notification("notifications/initialized", json!({})))
            .await?;
        if let Some(live) = self.inner.state.lock().await.as_mut() {
            live.initialized = true;
        }
        Ok(())
    }

    async fn spawn_if_dead(&self) -> Result<(), String> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.is_some() {
            return Ok(());
        }

        let generation = inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut child = Command::new(&inner.program)
            .args(&inner.args)
            .envs(&inner.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn {}: {e}", inner.program))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| "child stdin unavailable".to_string())?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| "child stdout unavailable".to_string())?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| "child stderr unavailable".to_string())?;

        info!(program = %inner.program, generation, "spawned stdio MCP server");

        // stdout reader: match responses to pending requests by id.
        let reader_inner = Arc::clone(inner);
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stdout, LinesCodec::new());
            while let Some(line) = lines.next().await {
                let line = match line {
                    Ok(l) => l,
                    Err(e) => {
                        warn!(error = %e, "stdio MCP read error");
                        break;
                    }
                };
                let value: Value = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(_) => {
                        debug!(line = %line, "ignoring non-JSON line from MCP server");
                        continue;
                    }
                };
                if let Some(id) = value.get("id").and_then(|i| i.as_i64()) {
                    let sender = reader_inner
                        .pending
                        .lock()
                        .expect("pending lock poisoned")
                        .remove(&id);
                    if let Some(tx) = sender {
                        let _ = tx.send(value);
                    }
                }
                // Server-initiated requests and notifications are ignored.
            }
            // EOF or read error: mark dead (if this generation still owns the
            // slot) and fail everything in flight.
            warn!(program = %reader_inner.program, generation, "stdio MCP server exited");
            let mut state = reader_inner.state.lock().await;
            if matches!(state.as_ref(), Some(live) if live.generation == generation) {
                *state = None;
            }
            drop(state);
            Inner::drain_pending(&reader_inner.pending);
        });

        // stderr is log output by convention.
        let program = inner.program.clone();
        tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LinesCodec::new());
            while let Some(Ok(line)) = lines.next().await {
                debug!(program = %program, line = %line, "mcp server stderr");
            }
        });

        *state = Some(Live {
            stdin,
            _child: child,
            generation,
            initialized: false,
        });
        Ok(())
    }
}

impl Inner {
    fn drain_pending(pending: &Pending) {
        // Dropping the senders wakes every waiter with a closed channel,
        // which surfaces as a transport error rather than a hang.
        pending.lock().expect("pending lock poisoned").clear();
    }

    async fn send_line(&self, value: &Value) -> Result<(), String> {
        let mut line = value.to_string();
        line.push('\n');
        let mut state = self.state.lock().await;
        let live = state
            .as_mut()
            .ok_or_else(|| "MCP server process is not running".to_string())?;
        if let Err(e) = live.stdin.write_all(line.as_bytes()).await {
            *state = None;
            drop(state);
            Inner::drain_pending(&self.pending);
            return Err(format!("write to MCP server failed: {e}"));
        }
        Ok(())
    }

    async fn send_request(&self, method: &str, params: Value) -> Result<Value, String> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("pending lock poisoned")
            .insert(id, tx);

        if let Err(e) = self.send_line(&jsonrpc::request(id, method, params)).await {
            self.pending
                .lock()
                .expect("pending lock poisoned")
                .remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.call_timeout, rx).await {
            Ok(Ok(response)) => jsonrpc::into_result(response),
            Ok(Err(_)) => Err("MCP server closed before responding".to_string()),
            Err(_) => {
                self.pending
                    .lock()
                    .expect("pending lock poisoned")
                    .remove(&id);
                Err(format!(
                    "MCP request timed out after {}s",
                    self.call_timeout.as_secs()
                ))
            }
        }
    }
}

#[async_trait]
impl McpClient for StdioMcpClient {
    async fn list_tools(&self) -> ToolListResult {
        match self.request("tools/list", json!({})).await {
            Ok(result) => {
                let tools: Vec<McpToolInfo> = result["tools"]
                    .as_array()
                    .into_iter()
                    .flatten()
                    .filter_map(McpToolInfo::from_wire)
                    .collect();
                ToolListResult::ok(tools)
            }
            Err(e) => ToolListResult::err(e),
        }
    }

    async fn call_tool(&self, tool_name: &str, arguments: &Value) -> ToolCallResult {
        let params = json!({ "name": tool_name, "arguments": arguments });
        match self.request("tools/call", params).await {
            Ok(result) => {
                if result["isError"].as_bool().unwrap_or(false) {
                    let message = result["content"][0]["text"]
                        .as_str()
                        .unwrap_or("tool reported an error")
                        .to_string();
                    ToolCallResult::err(message)
                } else {
                    ToolCallResult::ok(result)
                }
            }
            Err(e) => ToolCallResult::err(e),
        }
    }

    async fn verify(&self, timeout: Duration) -> VerifyOutcome {
        let probe = async {
            match self.list_tools().await {
                ToolListResult {
                    success: true,
                    tools,
                    ..
                } => Ok(tools),
                ToolListResult { error, .. } => {
                    Err(error.unwrap_or_else(|| "tools/list failed".into()))
                }
            }
        };
        match tokio::time::timeout(timeout, probe).await {
            Ok(Ok(tools)) => VerifyOutcome {
                status: VerifyStatus::Active,
                status_message: None,
                tools,
            },
            Ok(Err(message)) => VerifyOutcome {
                status: VerifyStatus::Failed,
                status_message: Some(message),
                tools: Vec::new(),
            },
            Err(_) => VerifyOutcome {
                status: VerifyStatus::Unreachable,
                status_message: Some(format!("verify timed out after {}s", timeout.as_secs())),
                tools: Vec::new(),
            },
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn client(program: &str, args: &[&str]) -> StdioMcpClient {
        StdioMcpClient::new(
            program,
            args.iter().map(|s| s.to_string()).collect(),
            BTreeMap::new(),
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn missing_binary_fails_without_hanging() {
        let c = client("definitely-not-a-real-binary-xyz", &[]);
        let result = c.list_tools().await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("failed to spawn"));
    }

    #[tokio::test]
    async fn child_that_exits_immediately_fails_inflight_requests() {
        // `true` exits without speaking JSON-RPC: the initialize request must
        // fail with a transport error, not hang until the timeout.
        let c = client("true", &[]);
        let result = c.list_tools().await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn dead_child_respawns_on_next_call() {
        let c = client("true", &[]);
        assert!(!c.list_tools().await.success);
        // Second call attempts a fresh spawn rather than reusing the corpse.
        assert!(!c.list_tools().await.success);
        assert!(c.inner.generation.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn verify_reports_failure_for_broken_server() {
        let c = client("true", &[]);
        let outcome = c.verify(Duration::from_secs(5)).await;
        assert_ne!(outcome.status, VerifyStatus::Active);
    }

    #[tokio::test]
    async fn echo_server_round_trips_a_request() {
        // A minimal MCP "server": read one line, answer tools/list for
        // whatever id was sent.  sh + a line of shell keeps the test free of
        // fixtures.
        let script = r#"read line; id=$(printf '%s' "$line" | sed 's/.*"id":\([0-9]*\).*/\1/'); printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"x","capabilities":{}}}\n' "$id"; read line2; read line3; id3=$(printf '%s' "$line3" | sed 's/.*"id":\([0-9]*\).*/\1/'); printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"echo","description":"d","inputSchema":{"type":"object"}}]}}\n' "$id3"; sleep 1"#;
        let c = client("sh", &["-c", script]);
        let result = c.list_tools().await;
        assert!(result.success, "error: {:?}", result.error);
        assert_eq!(result.count, 1);
        assert_eq!(result.tools[0].name, "echo");
        c.shutdown().await;
    }
}
