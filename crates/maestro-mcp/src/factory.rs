use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use maestro_domain::{AuthType, Error, McpServer, Result, Transport};
use maestro_domain::secrets::SecretBox;
use maestro_store::{ApiKeyStore, ServerStore};
use tokio::sync::Mutex;
use tracing::info;

use crate::client::{verify_and_persist, McpClient, ServerVerifier, VerifyOutcome};
use crate::http::{HttpAuth, HttpMcpClient};
use crate::oauth::OAuthManager;
use crate::stdio::StdioMcpClient;
use crate::validate::expand_env_args;

/// Builds the right client for a server and owns the long-lived stdio
/// children — one child per subprocess server, shared across calls.
pub struct ClientFactory {
    pool: reqwest::Client,
    servers: Arc<dyn ServerStore>,
    api_keys: Arc<dyn ApiKeyStore>,
    secrets: Option<Arc<SecretBox>>,
    oauth: Arc<OAuthManager>,
    stdio_clients: Mutex<HashMap<String, Arc<StdioMcpClient>>>,
    call_timeout: Duration,
    verify_timeout: Duration,
}

impl ClientFactory {
    pub fn new(
        pool: reqwest::Client,
        servers: Arc<dyn ServerStore>,
        api_keys: Arc<dyn ApiKeyStore>,
        secrets: Option<Arc<SecretBox>>,
        oauth: Arc<OAuthManager>,
        call_timeout: Duration,
        verify_timeout: Duration,
    ) -> Self {
        Self {
            pool,
            servers,
            api_keys,
            secrets,
            oauth,
            stdio_clients: Mutex::new(HashMap::new()),
            call_timeout,
            verify_timeout,
        }
    }

    /// Client for a server id, loading the server record first.
    pub async fn client_for(&self, server_id: &str) -> Result<Arc<dyn McpClient>> {
        let server = self
            .servers
            .get_server(server_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("server {server_id} not found")))?;
        self.client_for_server(&server).await
    }

    pub async fn client_for_server(&self, server: &McpServer) -> Result<Arc<dyn McpClient>> {
        match server.transport {
            Transport::Http => {
                let url = server
                    .url
                    .as_deref()
                    .ok_or_else(|| Error::Validation("http server has no URL".into()))?;
                let auth = self.http_auth_for(server).await?;
                Ok(Arc::new(HttpMcpClient::new(self.pool.clone(), url, auth)))
            }
            transport => {
                let mut clients = self.stdio_clients.lock().await;
                if let Some(existing) = clients.get(&server.id) {
                    return Ok(existing.clone());
                }
                let (program, args) = subprocess_command(transport, &server.args);
                let client = Arc::new(StdioMcpClient::new(
                    program,
                    args,
                    server.env.clone(),
                    self.call_timeout,
                ));
                clients.insert(server.id.clone(), client.clone());
                Ok(client)
            }
        }
    }

    async fn http_auth_for(&self, server: &McpServer) -> Result<HttpAuth> {
        match server.auth {
            AuthType::None => Ok(HttpAuth::None),
            AuthType::ApiKey => {
                let key_id = server.api_key_id.as_deref().ok_or_else(|| {
                    Error::Validation(format!("server {} uses api-key auth without a key", server.id))
                })?;
                let encrypted = self.api_keys.get_api_key(key_id).await?.ok_or_else(|| {
                    Error::NotFound(format!("API key {key_id} not found"))
                })?;
                let secrets = self.secrets.as_ref().ok_or_else(|| {
                    Error::Internal(anyhow::anyhow!(
                        "encryption master key not configured; cannot decrypt API keys"
                    ))
                })?;
                Ok(HttpAuth::Bearer(secrets.decrypt(&encrypted)?))
            }
            AuthType::Oauth => Ok(HttpAuth::OAuth {
                server_id: server.id.clone(),
                manager: self.oauth.clone(),
            }),
        }
    }

    /// Kill every stdio child.  Called on shutdown.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<StdioMcpClient>> =
            self.stdio_clients.lock().await.drain().map(|(_, c)| c).collect();
        for client in clients {
            client.shutdown().await;
        }
        info!("MCP client factory shut down");
    }
}

#[async_trait]
impl ServerVerifier for ClientFactory {
    async fn verify_server(&self, server_id: &str) -> Result<VerifyOutcome> {
        let client = self.client_for(server_id).await?;
        verify_and_persist(
            self.servers.as_ref(),
            client.as_ref(),
            server_id,
            self.verify_timeout,
        )
        .await
    }
}

/// Translate a transport into the child process to spawn.  Docker images run
/// interactive and auto-remove so the line-framed stdio contract holds.
fn subprocess_command(transport: Transport, args: &[String]) -> (String, Vec<String>) {
    let expanded = expand_env_args(args);
    match transport {
        Transport::Npx => ("npx".to_string(), expanded),
        Transport::Uvx => ("uvx".to_string(), expanded),
        Transport::Docker => {
            let mut full = vec!["run".to_string(), "--rm".to_string(), "-i".to_string()];
            full.extend(expanded);
            ("docker".to_string(), full)
        }
        Transport::Http => unreachable!("http servers never spawn subprocesses"),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
