use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maestro_domain::{
    Agent, Automation, Chat, ChatMessage, Execution, ExecutionStepLog, ExecutionStatus,
    McpServer, MessageRole, ModelInfo, OAuthSession, OAuthTokens, Resource, Result, ToolDef,
    Trigger, Validation, ValidationStatus, WorkflowStep,
};
use serde_json::Value;

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn create_chat(&self, chat: Chat) -> Result<()>;
    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>>;
    async fn set_generating(&self, chat_id: &str, generating: bool) -> Result<()>;
    async fn delete_chat(&self, chat_id: &str) -> Result<()>;

    async fn append_message(&self, message: ChatMessage) -> Result<()>;
    /// Most recent `limit` messages in creation order.
    async fn list_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<ChatMessage>>;

    /// Delete chats with zero messages last touched before `cutoff`.
    /// Returns the number of chats removed.
    async fn reap_empty_chats(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

#[async_trait]
pub trait AgentStore: Send + Sync {
    async fn create_agent(&self, agent: Agent) -> Result<()>;
    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>>;
    async fn count_agents(&self, user_id: &str) -> Result<usize>;
}

#[async_trait]
pub trait ServerStore: Send + Sync {
    async fn create_server(&self, server: McpServer) -> Result<()>;
    async fn get_server(&self, server_id: &str) -> Result<Option<McpServer>>;
    async fn set_server_status(
        &self,
        server_id: &str,
        status: maestro_domain::ServerStatus,
        message: Option<String>,
    ) -> Result<()>;
    /// Atomically replace the tool list discovered by a successful verify.
    async fn replace_tools(&self, server_id: &str, tools: Vec<ToolDef>) -> Result<()>;
    async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolDef>>;
    /// Tools flagged `is_default` across all servers.
    async fn list_default_tools(&self) -> Result<Vec<ToolDef>>;
}

#[async_trait]
pub trait ResourceStore: Send + Sync {
    async fn create_resource(&self, resource: Resource) -> Result<()>;
    async fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Store an already-encrypted key blob.
    async fn put_api_key(&self, key_id: &str, encrypted: String) -> Result<()>;
    async fn get_api_key(&self, key_id: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait ValidationStore: Send + Sync {
    async fn create_validation(&self, validation: Validation) -> Result<()>;
    async fn get_validation(&self, validation_id: &str) -> Result<Option<Validation>>;
    async fn set_validation_status(
        &self,
        validation_id: &str,
        status: ValidationStatus,
        feedback: Option<String>,
    ) -> Result<()>;
    /// Pending validations whose `expires_at` is before `now`.
    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Validation>>;
}

#[async_trait]
pub trait AutomationStore: Send + Sync {
    async fn create_automation(&self, automation: Automation) -> Result<()>;
    async fn get_automation(&self, automation_id: &str) -> Result<Option<Automation>>;
    async fn set_automation_enabled(&self, automation_id: &str, enabled: bool) -> Result<()>;

    async fn put_steps(&self, automation_id: &str, steps: Vec<WorkflowStep>) -> Result<()>;
    /// Steps ordered by `order`.
    async fn list_steps(&self, automation_id: &str) -> Result<Vec<WorkflowStep>>;

    async fn put_trigger(&self, trigger: Trigger) -> Result<()>;
    async fn list_triggers(&self, automation_id: &str) -> Result<Vec<Trigger>>;
    async fn list_cron_triggers(&self) -> Result<Vec<Trigger>>;

    async fn create_execution(&self, execution: Execution) -> Result<()>;
    async fn finish_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        failed_step: Option<u32>,
    ) -> Result<()>;
    /// Executions for one automation, most recent first.
    async fn list_executions(&self, automation_id: &str) -> Result<Vec<Execution>>;
    async fn append_step_log(&self, log: ExecutionStepLog) -> Result<()>;
    async fn list_step_logs(&self, execution_id: &str) -> Result<Vec<ExecutionStepLog>>;
}

#[async_trait]
pub trait OAuthStore: Send + Sync {
    async fn put_session(&self, session: OAuthSession) -> Result<()>;
    /// Removes and returns the session — a state parameter is single-use.
    async fn take_session(&self, state: &str) -> Result<Option<OAuthSession>>;
    async fn put_tokens(&self, tokens: OAuthTokens) -> Result<()>;
    async fn get_tokens(&self, server_id: &str) -> Result<Option<OAuthTokens>>;
}

#[async_trait]
pub trait ModelCatalogStore: Send + Sync {
    /// Replace the catalog entries for one provider.
    async fn replace_models(&self, provider: &str, models: Vec<ModelInfo>) -> Result<()>;
    async fn list_models(&self, provider: Option<&str>) -> Result<Vec<ModelInfo>>;
}

#[async_trait]
pub trait SyncStateStore: Send + Sync {
    async fn get_digest(&self, name: &str) -> Result<Option<String>>;
    async fn put_digest(&self, name: &str, digest: &str) -> Result<()>;
}

/// Convenience for constructing a message row.
pub fn new_message(
    chat_id: &str,
    role: MessageRole,
    content: impl Into<String>,
    metadata: Option<Value>,
) -> ChatMessage {
    ChatMessage {
        id: maestro_domain::id::generate(maestro_domain::id::IdKind::Message),
        chat_id: chat_id.to_string(),
        role,
        content: content.into(),
        metadata,
        created_at: Utc::now(),
    }
}
