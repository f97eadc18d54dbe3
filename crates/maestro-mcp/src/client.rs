use std::time::Duration;

use async_trait::async_trait;
use maestro_domain::id::{generate, IdKind};
use maestro_domain::{Result, ServerStatus, ToolDef};
use maestro_store::ServerStore;
use serde_json::Value;
use tracing::info;

/// One tool advertised by an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl McpToolInfo {
    pub fn from_wire(item: &Value) -> Option<Self> {
        Some(Self {
            name: item["name"].as_str()?.to_string(),
            description: item["description"].as_str().unwrap_or("").to_string(),
            input_schema: item
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| serde_json::json!({ "type": "object" })),
        })
    }
}

/// Envelope for `list_tools` — server-side failures ride in `error`, they are
/// never thrown.
#[derive(Debug, Clone)]
pub struct ToolListResult {
    pub success: bool,
    pub tools: Vec<McpToolInfo>,
    pub count: usize,
    pub error: Option<String>,
}

impl ToolListResult {
    pub fn ok(tools: Vec<McpToolInfo>) -> Self {
        let count = tools.len();
        Self {
            success: true,
            tools,
            count,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            tools: Vec::new(),
            count: 0,
            error: Some(message.into()),
        }
    }
}

/// Envelope for `call_tool`.
#[derive(Debug, Clone)]
pub struct ToolCallResult {
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
}

impl ToolCallResult {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            result: Value::Null,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyStatus {
    Active,
    Failed,
    Unreachable,
}

impl VerifyStatus {
    pub fn to_server_status(self) -> ServerStatus {
        match self {
            VerifyStatus::Active => ServerStatus::Active,
            VerifyStatus::Failed | VerifyStatus::Unreachable => ServerStatus::Failed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOutcome {
    pub status: VerifyStatus,
    pub status_message: Option<String>,
    pub tools: Vec<McpToolInfo>,
}

/// Uniform capability set over both transports.
///
/// Implementations return the `{success, error}` envelopes for anything the
/// server did wrong; a Rust-level `Err` escaping these methods would indicate
/// a programmer error, not a misbehaving server.
#[async_trait]
pub trait McpClient: Send + Sync + std::fmt::Debug {
    async fn list_tools(&self) -> ToolListResult;
    async fn call_tool(&self, tool_name: &str, arguments: &Value) -> ToolCallResult;
    /// Connection health probe, bounded by `timeout`.
    async fn verify(&self, timeout: Duration) -> VerifyOutcome;
}

/// Something that can run a verify cycle for a server by id.  Implemented by
/// the client factory; consumed by the OAuth callback flow.
#[async_trait]
pub trait ServerVerifier: Send + Sync {
    async fn verify_server(&self, server_id: &str) -> Result<VerifyOutcome>;
}

/// Run `verify` and persist its outcome: the status (with message) always,
/// and — the one write verify performs — an atomic replacement of the
/// server's tool list on success.
pub async fn verify_and_persist(
    store: &dyn ServerStore,
    client: &dyn McpClient,
    server_id: &str,
    timeout: Duration,
) -> Result<VerifyOutcome> {
    let outcome = client.verify(timeout).await;

    store
        .set_server_status(
            server_id,
            outcome.status.to_server_status(),
            outcome.status_message.clone(),
        )
        .await?;

    if outcome.status == VerifyStatus::Active {
        let tools: Vec<ToolDef> = outcome
            .tools
            .iter()
            .map(|t| ToolDef {
                id: generate(IdKind::Tool),
                server_id: server_id.to_string(),
                name: t.name.clone(),
                description: t.description.clone(),
                input_schema: t.input_schema.clone(),
                enabled: true,
                is_default: false,
                is_removable: true,
            })
            .collect();
        info!(server_id, tool_count = tools.len(), "verify replaced tool list");
        store.replace_tools(server_id, tools).await?;
    }

    Ok(outcome)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_domain::{McpServer, Transport};
    use maestro_store::MemoryStore;
    use serde_json::json;

    #[derive(Debug)]
    struct FixedClient {
        outcome: VerifyOutcome,
    }

    #[async_trait]
    impl McpClient for FixedClient {
        async fn list_tools(&self) -> ToolListResult {
            ToolListResult::ok(self.outcome.tools.clone())
        }
        async fn call_tool(&self, _: &str, _: &Value) -> ToolCallResult {
            ToolCallResult::ok(Value::Null)
        }
        async fn verify(&self, _: Duration) -> VerifyOutcome {
            self.outcome.clone()
        }
    }

    fn server(id: &str) -> McpServer {
        McpServer {
            id: id.into(),
            user_id: Some("usr_test01".into()),
            name: "test".into(),
            transport: Transport::Http,
            url: Some("http://localhost:9".into()),
            args: vec![],
            env: Default::default(),
            auth: maestro_domain::AuthType::None,
            api_key_id: None,
            status: ServerStatus::Pending,
            status_message: None,
            is_system: false,
        }
    }

    #[tokio::test]
    async fn successful_verify_activates_and_replaces_tools() {
        let store = MemoryStore::new();
        store.create_server(server("srv_abc123")).await.unwrap();
        let client = FixedClient {
            outcome: VerifyOutcome {
                status: VerifyStatus::Active,
                status_message: None,
                tools: vec![McpToolInfo {
                    name: "echo".into(),
                    description: "echoes".into(),
                    input_schema: json!({ "type": "object" }),
                }],
            },
        };
        let outcome =
            verify_and_persist(&store, &client, "srv_abc123", Duration::from_secs(30))
                .await
                .unwrap();
        assert_eq!(outcome.status, VerifyStatus::Active);

        let server = store.get_server("srv_abc123").await.unwrap().unwrap();
        assert_eq!(server.status, ServerStatus::Active);
        let tools = store.list_tools("srv_abc123").await.unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "echo");
    }

    #[tokio::test]
    async fn failed_verify_keeps_existing_tools() {
        let store = MemoryStore::new();
        store.create_server(server("srv_abc123")).await.unwrap();
        store
            .replace_tools(
                "srv_abc123",
                vec![ToolDef {
                    id: "tol_old001".into(),
                    server_id: "srv_abc123".into(),
                    name: "old".into(),
                    description: String::new(),
                    input_schema: json!({}),
                    enabled: true,
                    is_default: false,
                    is_removable: true,
                }],
            )
            .await
            .unwrap();

        let client = FixedClient {
            outcome: VerifyOutcome {
                status: VerifyStatus::Unreachable,
                status_message: Some("connection refused".into()),
                tools: vec![],
            },
        };
        verify_and_persist(&store, &client, "srv_abc123", Duration::from_secs(30))
            .await
            .unwrap();

        let server = store.get_server("srv_abc123").await.unwrap().unwrap();
        assert_eq!(server.status, ServerStatus::Failed);
        assert_eq!(server.status_message.as_deref(), Some("connection refused"));
        // The stale tool list survives a failed verify.
        assert_eq!(store.list_tools("srv_abc123").await.unwrap().len(), 1);
    }

    #[test]
    fn tool_info_parses_wire_shape() {
        let t = McpToolInfo::from_wire(&json!({
            "name": "search",
            "description": "find things",
            "inputSchema": { "type": "object", "properties": {} }
        }))
        .unwrap();
        assert_eq!(t.name, "search");
        assert_eq!(t.input_schema["type"], "object");
        assert!(McpToolInfo::from_wire(&json!({ "description": "nameless" })).is_none());
    }
}
