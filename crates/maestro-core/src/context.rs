//! Turn context assembly.
//!
//! A turn sees: the last N persisted user/assistant messages, the agent's
//! system prompt, tools from the agent's active servers plus every default
//! tool, and — when the agent owns at least one `ready` resource — the
//! internal RAG tools.  Tool messages from earlier turns are not replayed;
//! tool exchanges live only inside the turn that produced them.

use std::collections::HashMap;
use std::sync::Arc;

use maestro_domain::{Chat, Error, MessageRole, ResourceStatus, Result, ServerStatus};
use maestro_model::{Message, ToolSchema};
use maestro_store::{AgentStore, ChatStore, ResourceStore, ServerStore};
use maestro_tools::ToolRegistry;
use tracing::debug;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Where a named tool executes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRoute {
    /// MCP call against this server id.
    Server(String),
    /// In-process handler from the internal registry.
    Internal,
}

#[derive(Debug, Clone)]
pub struct TurnContext {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub routes: HashMap<String, ToolRoute>,
    pub agent_id: Option<String>,
    /// Ready resources attached to the agent, handed to the RAG tool.
    pub resource_ids: Vec<String>,
}

pub struct ContextBuilder {
    chats: Arc<dyn ChatStore>,
    agents: Arc<dyn AgentStore>,
    servers: Arc<dyn ServerStore>,
    resources: Arc<dyn ResourceStore>,
    registry: Arc<ToolRegistry>,
    history_limit: usize,
}

impl ContextBuilder {
    pub fn new(
        chats: Arc<dyn ChatStore>,
        agents: Arc<dyn AgentStore>,
        servers: Arc<dyn ServerStore>,
        resources: Arc<dyn ResourceStore>,
        registry: Arc<ToolRegistry>,
        history_limit: usize,
    ) -> Self {
        Self {
            chats,
            agents,
            servers,
            resources,
            registry,
            history_limit,
        }
    }

    pub async fn build(&self, chat: &Chat) -> Result<TurnContext> {
        let mut history = Vec::new();
        for msg in self
            .chats
            .list_messages(&chat.id, self.history_limit)
            .await?
        {
            match msg.role {
                MessageRole::User => history.push(Message::user(msg.content)),
                MessageRole::Assistant => history.push(Message::assistant(msg.content)),
                MessageRole::Tool => {}
            }
        }

        let agent = match &chat.agent_id {
            Some(agent_id) => Some(
                self.agents
                    .get_agent(agent_id)
                    .await?
                    .ok_or_else(|| Error::NotFound(format!("agent {agent_id} not found")))?,
            ),
            None => None,
        };

        let system_prompt = agent
            .as_ref()
            .map(|a| a.system_prompt.clone())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.to_string());

        let mut tools = Vec::new();
        let mut routes: HashMap<String, ToolRoute> = HashMap::new();
        let mut add = |tools: &mut Vec<ToolSchema>,
                       routes: &mut HashMap<String, ToolRoute>,
                       schema: ToolSchema,
                       route: ToolRoute| {
            if routes.contains_key(&schema.name) {
                return;
            }
            routes.insert(schema.name.clone(), route);
            tools.push(schema);
        };

        // The agent's attached servers, active ones only.
        if let Some(agent) = &agent {
            for server_id in &agent.server_ids {
                let Some(server) = self.servers.get_server(server_id).await? else {
                    continue;
                };
                if server.status != ServerStatus::Active {
                    debug!(server_id, "skipping inactive server");
                    continue;
                }
                for tool in self.servers.list_tools(server_id).await? {
                    if !tool.enabled {
                        continue;
                    }
                    add(
                        &mut tools,
                        &mut routes,
                        ToolSchema {
                            name: tool.name,
                            description: tool.description,
                            parameters: tool.input_schema,
                        },
                        ToolRoute::Server(server_id.clone()),
                    );
                }
            }
        }

        // Default tools attach to every agent.
        for tool in self.servers.list_default_tools().await? {
            add(
                &mut tools,
                &mut routes,
                ToolSchema {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                },
                ToolRoute::Server(tool.server_id),
            );
        }

        // RAG tools ride along when the agent has ready resources.
        let mut resource_ids = Vec::new();
        if let Some(agent) = &agent {
            for resource_id in &agent.resource_ids {
                if let Some(resource) = self.resources.get_resource(resource_id).await? {
                    if resource.status == ResourceStatus::Ready {
                        resource_ids.push(resource_id.clone());
                    }
                }
            }
        }
        if !resource_ids.is_empty() {
            for schema in self.registry.schemas() {
                if schema.name.starts_with("rag.") {
                    add(
                        &mut tools,
                        &mut routes,
                        ToolSchema {
                            name: schema.name,
                            description: schema.description,
                            parameters: schema.input_schema,
                        },
                        ToolRoute::Internal,
                    );
                }
            }
        }

        Ok(TurnContext {
            system_prompt,
            history,
            tools,
            routes,
            agent_id: chat.agent_id.clone(),
            resource_ids,
        })
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
