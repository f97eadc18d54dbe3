use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::client::{
    McpClient, McpToolInfo, ToolCallResult, ToolListResult, VerifyOutcome, VerifyStatus,
};
use crate::jsonrpc;
use crate::oauth::OAuthManager;

/// How requests to the server are authenticated.
pub enum HttpAuth {
    None,
    /// `Authorization: Bearer <decrypted API key>`.
    Bearer(String),
    /// Current OAuth access token; a 401 triggers one refresh-and-retry.
    OAuth {
        server_id: String,
        manager: Arc<OAuthManager>,
    },
}

/// JSON-RPC 2.0 over HTTP through the shared pool.
pub struct HttpMcpClient {
    client: reqwest::Client,
    url: String,
    auth: HttpAuth,
    next_id: AtomicI64,
}

impl std::fmt::Debug for HttpMcpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpMcpClient").field("url", &self.url).finish()
    }
}

impl HttpMcpClient {
    pub fn new(client: reqwest::Client, url: impl Into<String>, auth: HttpAuth) -> Self {
        Self {
            client,
            url: url.into(),
            auth,
            next_id: AtomicI64::new(1),
        }
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn bearer_token(&self) -> Result<Option<String>, String> {
        match &self.auth {
            HttpAuth::None => Ok(None),
            HttpAuth::Bearer(key) => Ok(Some(key.clone())),
            HttpAuth::OAuth { server_id, manager } => manager
                .access_token(server_id)
                .await
                .map(Some)
                .map_err(|e| format!("OAuth token unavailable: {e}")),
        }
    }

    async fn post_once(&self, body: &Value, token: Option<&str>) -> Result<reqwest::Response, String> {
        let mut req = self.client.post(&self.url).json(body);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        req.send().await.map_err(|e| format!("request failed: {e}"))
    }

    /// One JSON-RPC exchange.  For OAuth servers a 401 response triggers a
    /// token refresh and a single retry.
    async fn rpc(&self, method: &str, params: Value) -> Result<Value, String> {
        let body = jsonrpc::request(self.next_id(), method, params);
        let token = self.bearer_token().await?;
        debug!(url = %self.url, method, "mcp http request");

        let mut resp = self.post_once(&body, token.as_deref()).await?;

        if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
            if let HttpAuth::OAuth { server_id, manager } = &self.auth {
                warn!(server_id, "401 from MCP server, refreshing OAuth token");
                let refreshed = manager
                    .refresh(server_id)
                    .await
                    .map_err(|e| format!("token refresh failed: {e}"))?;
                resp = self
                    .post_once(&body, Some(&refreshed.access_token))
                    .await?;
            }
        }

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(format!("server returned {status}: {text}"));
        }
        let value: Value = resp
            .json()
            .await
            .map_err(|e| format!("invalid JSON-RPC response: {e}"))?;
        jsonrpc::into_result(value)
    }

    async fn initialize(&self) -> Result<Value, String> {
        self.rpc("initialize", jsonrpc::initialize_params()).await
    }
}

#[async_trait]
impl McpClient for HttpMcpClient {
    async fn list_tools(&self) -> ToolListResult {
        match self.rpc("tools/list", json!({})).await {
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
        match self.rpc("tools/call", params).await {
            Ok(result) => {
                // MCP reports tool-level failures inside the result envelope.
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
            self.initialize().await?;
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
            Ok(Err(message)) => {
                let unreachable =
                    message.contains("request failed") || message.contains("connect");
                VerifyOutcome {
                    status: if unreachable {
                        VerifyStatus::Unreachable
                    } else {
                        VerifyStatus::Failed
                    },
                    status_message: Some(message),
                    tools: Vec::new(),
                }
            }
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

    #[tokio::test]
    async fn request_ids_increase_monotonically() {
        let c = HttpMcpClient::new(reqwest::Client::new(), "http://localhost:1", HttpAuth::None);
        let a = c.next_id();
        let b = c.next_id();
        assert!(b > a);
    }

    #[tokio::test]
    async fn unreachable_server_verifies_as_unreachable() {
        // Nothing listens on this port; connection is refused immediately.
        let c = HttpMcpClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/mcp",
            HttpAuth::None,
        );
        let outcome = c.verify(Duration::from_secs(5)).await;
        assert_eq!(outcome.status, VerifyStatus::Unreachable);
        assert!(outcome.tools.is_empty());
        assert!(outcome.status_message.is_some());
    }

    #[tokio::test]
    async fn call_tool_against_dead_server_returns_error_envelope() {
        let c = HttpMcpClient::new(
            reqwest::Client::new(),
            "http://127.0.0.1:9/mcp",
            HttpAuth::None,
        );
        let result = c.call_tool("echo", &json!({ "m": "x" })).await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }
}
