use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use maestro_domain::{
    Agent, Automation, Chat, ChatMessage, Error, Execution, ExecutionStepLog, ExecutionStatus,
    McpServer, ModelInfo, OAuthSession, OAuthTokens, Resource, Result, ServerStatus, ToolDef,
    Trigger, TriggerType, Validation, ValidationStatus, WorkflowStep,
};
use tokio::sync::RwLock;

use crate::traits::*;

/// In-memory store backing tests and the default single-process wiring.
///
/// One `RwLock` per namespace; lock scopes are kept short and no lock is held
/// across an await on another namespace.
#[derive(Default)]
pub struct MemoryStore {
    chats: RwLock<HashMap<String, Chat>>,
    messages: RwLock<Vec<ChatMessage>>,
    agents: RwLock<HashMap<String, Agent>>,
    servers: RwLock<HashMap<String, McpServer>>,
    tools: RwLock<HashMap<String, Vec<ToolDef>>>,
    resources: RwLock<HashMap<String, Resource>>,
    api_keys: RwLock<HashMap<String, String>>,
    validations: RwLock<HashMap<String, Validation>>,
    automations: RwLock<HashMap<String, Automation>>,
    steps: RwLock<HashMap<String, Vec<WorkflowStep>>>,
    triggers: RwLock<HashMap<String, Trigger>>,
    executions: RwLock<Vec<Execution>>,
    step_logs: RwLock<Vec<ExecutionStepLog>>,
    oauth_sessions: RwLock<HashMap<String, OAuthSession>>,
    oauth_tokens: RwLock<HashMap<String, OAuthTokens>>,
    model_catalog: RwLock<HashMap<String, Vec<ModelInfo>>>,
    sync_state: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn create_chat(&self, chat: Chat) -> Result<()> {
        self.chats.write().await.insert(chat.id.clone(), chat);
        Ok(())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<Chat>> {
        Ok(self.chats.read().await.get(chat_id).cloned())
    }

    async fn set_generating(&self, chat_id: &str, generating: bool) -> Result<()> {
        let mut chats = self.chats.write().await;
        let chat = chats
            .get_mut(chat_id)
            .ok_or_else(|| Error::NotFound(format!("chat {chat_id} not found")))?;
        chat.is_generating = generating;
        chat.updated_at = Utc::now();
        Ok(())
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.chats.write().await.remove(chat_id);
        self.messages.write().await.retain(|m| m.chat_id != chat_id);
        Ok(())
    }

    async fn append_message(&self, message: ChatMessage) -> Result<()> {
        if let Some(chat) = self.chats.write().await.get_mut(&message.chat_id) {
            chat.updated_at = Utc::now();
        }
        self.messages.write().await.push(message);
        Ok(())
    }

    async fn list_messages(&self, chat_id: &str, limit: usize) -> Result<Vec<ChatMessage>> {
        let messages = self.messages.read().await;
        let mut out: Vec<ChatMessage> = messages
            .iter()
            .filter(|m| m.chat_id == chat_id)
            .cloned()
            .collect();
        if out.len() > limit {
            out.drain(..out.len() - limit);
        }
        Ok(out)
    }

    async fn reap_empty_chats(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let non_empty: std::collections::HashSet<String> = self
            .messages
            .read()
            .await
            .iter()
            .map(|m| m.chat_id.clone())
            .collect();
        let mut chats = self.chats.write().await;
        let before = chats.len();
        chats.retain(|id, chat| non_empty.contains(id) || chat.updated_at >= cutoff);
        Ok(before - chats.len())
    }
}

#[async_trait]
impl AgentStore for MemoryStore {
    async fn create_agent(&self, agent: Agent) -> Result<()> {
        self.agents.write().await.insert(agent.id.clone(), agent);
        Ok(())
    }

    async fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>> {
        Ok(self.agents.read().await.get(agent_id).cloned())
    }

    async fn count_agents(&self, user_id: &str) -> Result<usize> {
        Ok(self
            .agents
            .read()
            .await
            .values()
            .filter(|a| a.user_id == user_id)
            .count())
    }
}

#[async_trait]
impl ServerStore for MemoryStore {
    async fn create_server(&self, server: McpServer) -> Result<()> {
        self.servers.write().await.insert(server.id.clone(), server);
        Ok(())
    }

    async fn get_server(&self, server_id: &str) -> Result<Option<McpServer>> {
        Ok(self.servers.read().await.get(server_id).cloned())
    }

    async fn set_server_status(
        &self,
        server_id: &str,
        status: ServerStatus,
        message: Option<String>,
    ) -> Result<()> {
        let mut servers = self.servers.write().await;
        let server = servers
            .get_mut(server_id)
            .ok_or_else(|| Error::NotFound(format!("server {server_id} not found")))?;
        server.status = status;
        server.status_message = message;
        Ok(())
    }

    async fn replace_tools(&self, server_id: &str, tools: Vec<ToolDef>) -> Result<()> {
        self.tools.write().await.insert(server_id.to_string(), tools);
        Ok(())
    }

    async fn list_tools(&self, server_id: &str) -> Result<Vec<ToolDef>> {
        Ok(self
            .tools
            .read()
            .await
            .get(server_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_default_tools(&self) -> Result<Vec<ToolDef>> {
        Ok(self
            .tools
            .read()
            .await
            .values()
            .flatten()
            .filter(|t| t.is_default && t.enabled)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ResourceStore for MemoryStore {
    async fn create_resource(&self, resource: Resource) -> Result<()> {
        self.resources
            .write()
            .await
            .insert(resource.id.clone(), resource);
        Ok(())
    }

    async fn get_resource(&self, resource_id: &str) -> Result<Option<Resource>> {
        Ok(self.resources.read().await.get(resource_id).cloned())
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn put_api_key(&self, key_id: &str, encrypted: String) -> Result<()> {
        self.api_keys
            .write()
            .await
            .insert(key_id.to_string(), encrypted);
        Ok(())
    }

    async fn get_api_key(&self, key_id: &str) -> Result<Option<String>> {
        Ok(self.api_keys.read().await.get(key_id).cloned())
    }
}

#[async_trait]
impl ValidationStore for MemoryStore {
    async fn create_validation(&self, validation: Validation) -> Result<()> {
        self.validations
            .write()
            .await
            .insert(validation.id.clone(), validation);
        Ok(())
    }

    async fn get_validation(&self, validation_id: &str) -> Result<Option<Validation>> {
        Ok(self.validations.read().await.get(validation_id).cloned())
    }

    async fn set_validation_status(
        &self,
        validation_id: &str,
        status: ValidationStatus,
        feedback: Option<String>,
    ) -> Result<()> {
        let mut validations = self.validations.write().await;
        let validation = validations
            .get_mut(validation_id)
            .ok_or_else(|| Error::NotFound(format!("validation {validation_id} not found")))?;
        validation.status = status;
        if feedback.is_some() {
            validation.feedback = feedback;
        }
        Ok(())
    }

    async fn list_expired_pending(&self, now: DateTime<Utc>) -> Result<Vec<Validation>> {
        Ok(self
            .validations
            .read()
            .await
            .values()
            .filter(|v| v.status == ValidationStatus::Pending && v.expires_at < now)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl AutomationStore for MemoryStore {
    async fn create_automation(&self, automation: Automation) -> Result<()> {
        self.automations
            .write()
            .await
            .insert(automation.id.clone(), automation);
        Ok(())
    }

    async fn get_automation(&self, automation_id: &str) -> Result<Option<Automation>> {
        Ok(self.automations.read().await.get(automation_id).cloned())
    }

    async fn set_automation_enabled(&self, automation_id: &str, enabled: bool) -> Result<()> {
        let mut automations = self.automations.write().await;
        let automation = automations
            .get_mut(automation_id)
            .ok_or_else(|| Error::NotFound(format!("automation {automation_id} not found")))?;
        automation.enabled = enabled;
        Ok(())
    }

    async fn put_steps(&self, automation_id: &str, mut steps: Vec<WorkflowStep>) -> Result<()> {
        steps.sort_by_key(|s| s.order);
        self.steps
            .write()
            .await
            .insert(automation_id.to_string(), steps);
        Ok(())
    }

    async fn list_steps(&self, automation_id: &str) -> Result<Vec<WorkflowStep>> {
        Ok(self
            .steps
            .read()
            .await
            .get(automation_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn put_trigger(&self, trigger: Trigger) -> Result<()> {
        self.triggers
            .write()
            .await
            .insert(trigger.id.clone(), trigger);
        Ok(())
    }

    async fn list_triggers(&self, automation_id: &str) -> Result<Vec<Trigger>> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.automation_id == automation_id)
            .cloned()
            .collect())
    }

    async fn list_cron_triggers(&self) -> Result<Vec<Trigger>> {
        Ok(self
            .triggers
            .read()
            .await
            .values()
            .filter(|t| t.trigger_type == TriggerType::Cron && t.enabled)
            .cloned()
            .collect())
    }

    async fn create_execution(&self, execution: Execution) -> Result<()> {
        self.executions.write().await.push(execution);
        Ok(())
    }

    async fn finish_execution(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        failed_step: Option<u32>,
    ) -> Result<()> {
        let mut executions = self.executions.write().await;
        let execution = executions
            .iter_mut()
            .find(|e| e.id == execution_id)
            .ok_or_else(|| Error::NotFound(format!("execution {execution_id} not found")))?;
        execution.status = status;
        execution.completed_at = Some(Utc::now());
        execution.failed_step = failed_step;
        Ok(())
    }

    async fn list_executions(&self, automation_id: &str) -> Result<Vec<Execution>> {
        let mut out: Vec<Execution> = self
            .executions
            .read()
            .await
            .iter()
            .filter(|e| e.automation_id == automation_id)
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(out)
    }

    async fn append_step_log(&self, log: ExecutionStepLog) -> Result<()> {
        self.step_logs.write().await.push(log);
        Ok(())
    }

    async fn list_step_logs(&self, execution_id: &str) -> Result<Vec<ExecutionStepLog>> {
        Ok(self
            .step_logs
            .read()
            .await
            .iter()
            .filter(|l| l.execution_id == execution_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl OAuthStore for MemoryStore {
    async fn put_session(&self, session: OAuthSession) -> Result<()> {
        self.oauth_sessions
            .write()
            .await
            .insert(session.state.clone(), session);
        Ok(())
    }

    async fn take_session(&self, state: &str) -> Result<Option<OAuthSession>> {
        Ok(self.oauth_sessions.write().await.remove(state))
    }

    async fn put_tokens(&self, tokens: OAuthTokens) -> Result<()> {
        self.oauth_tokens
            .write()
            .await
            .insert(tokens.server_id.clone(), tokens);
        Ok(())
    }

    async fn get_tokens(&self, server_id: &str) -> Result<Option<OAuthTokens>> {
        Ok(self.oauth_tokens.read().await.get(server_id).cloned())
    }
}

#[async_trait]
impl ModelCatalogStore for MemoryStore {
    async fn replace_models(&self, provider: &str, models: Vec<ModelInfo>) -> Result<()> {
        self.model_catalog
            .write()
            .await
            .insert(provider.to_string(), models);
        Ok(())
    }

    async fn list_models(&self, provider: Option<&str>) -> Result<Vec<ModelInfo>> {
        let catalog = self.model_catalog.read().await;
        let mut out: Vec<ModelInfo> = match provider {
            Some(p) => catalog.get(p).cloned().unwrap_or_default(),
            None => catalog.values().flatten().cloned().collect(),
        };
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }
}

#[async_trait]
impl SyncStateStore for MemoryStore {
    async fn get_digest(&self, name: &str) -> Result<Option<String>> {
        Ok(self.sync_state.read().await.get(name).cloned())
    }

    async fn put_digest(&self, name: &str, digest: &str) -> Result<()> {
        self.sync_state
            .write()
            .await
            .insert(name.to_string(), digest.to_string());
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use maestro_domain::id::{generate, IdKind};
    use maestro_domain::MessageRole;

    fn chat(id: &str) -> Chat {
        Chat {
            id: id.into(),
            user_id: "usr_test01".into(),
            agent_id: None,
            model: "claude-sonnet".into(),
            is_generating: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn messages_come_back_in_creation_order() {
        let store = MemoryStore::new();
        store.create_chat(chat("cht_a1b2c3")).await.unwrap();
        for i in 0..5 {
            store
                .append_message(new_message("cht_a1b2c3", MessageRole::User, format!("m{i}"), None))
                .await
                .unwrap();
        }
        let msgs = store.list_messages("cht_a1b2c3", 50).await.unwrap();
        let contents: Vec<&str> = msgs.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn list_messages_keeps_the_most_recent_window() {
        let store = MemoryStore::new();
        store.create_chat(chat("cht_a1b2c3")).await.unwrap();
        for i in 0..10 {
            store
                .append_message(new_message("cht_a1b2c3", MessageRole::User, format!("m{i}"), None))
                .await
                .unwrap();
        }
        let msgs = store.list_messages("cht_a1b2c3", 3).await.unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].content, "m7");
        assert_eq!(msgs[2].content, "m9");
    }

    #[tokio::test]
    async fn set_generating_on_missing_chat_is_not_found() {
        let store = MemoryStore::new();
        let err = store.set_generating("cht_nope01", true).await.unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn reap_removes_only_stale_empty_chats() {
        let store = MemoryStore::new();
        let mut stale = chat("cht_stale1");
        stale.updated_at = Utc::now() - Duration::days(60);
        store.create_chat(stale).await.unwrap();
        store.create_chat(chat("cht_fresh1")).await.unwrap();
        let mut stale_full = chat("cht_full01");
        stale_full.updated_at = Utc::now() - Duration::days(60);
        store.create_chat(stale_full).await.unwrap();
        store
            .append_message(new_message("cht_full01", MessageRole::User, "hi", None))
            .await
            .unwrap();
        // append_message refreshed cht_full01's updated_at; age it again so the
        // non-empty guard is what protects it.
        {
            let mut chats = store.chats.write().await;
            chats.get_mut("cht_full01").unwrap().updated_at = Utc::now() - Duration::days(60);
        }

        let removed = store
            .reap_empty_chats(Utc::now() - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_chat("cht_stale1").await.unwrap().is_none());
        assert!(store.get_chat("cht_fresh1").await.unwrap().is_some());
        assert!(store.get_chat("cht_full01").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn agent_counts_back_the_quota_check() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .create_agent(maestro_domain::Agent {
                    id: format!("agt_q{i:05}"),
                    user_id: "usr_test01".into(),
                    name: format!("a{i}"),
                    system_prompt: String::new(),
                    tags: vec![],
                    server_ids: vec![],
                    resource_ids: vec![],
                    is_system: false,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let count = store.count_agents("usr_test01").await.unwrap();
        assert_eq!(count, 3);
        assert!(maestro_domain::Error::check_quota("agent", count, 100).is_ok());
        assert!(maestro_domain::Error::check_quota("agent", count, 3).is_err());
        assert_eq!(store.count_agents("usr_other1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn replace_tools_swaps_the_whole_list() {
        let store = MemoryStore::new();
        let tool = |name: &str, default: bool| ToolDef {
            id: generate(IdKind::Tool),
            server_id: "srv_abc123".into(),
            name: name.into(),
            description: String::new(),
            input_schema: serde_json::json!({"type": "object"}),
            enabled: true,
            is_default: default,
            is_removable: true,
        };
        store
            .replace_tools("srv_abc123", vec![tool("old", false)])
            .await
            .unwrap();
        store
            .replace_tools("srv_abc123", vec![tool("new_a", true), tool("new_b", false)])
            .await
            .unwrap();
        let tools = store.list_tools("srv_abc123").await.unwrap();
        assert_eq!(tools.len(), 2);
        assert!(tools.iter().all(|t| t.name.starts_with("new_")));
        let defaults = store.list_default_tools().await.unwrap();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].name, "new_a");
    }

    #[tokio::test]
    async fn oauth_session_is_single_use() {
        let store = MemoryStore::new();
        store
            .put_session(OAuthSession {
                state: "st_1".into(),
                code_verifier: "v".into(),
                server_id: "srv_abc123".into(),
                redirect_uri: "http://cb".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        assert!(store.take_session("st_1").await.unwrap().is_some());
        assert!(store.take_session("st_1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_pending_validations_are_listed() {
        let store = MemoryStore::new();
        let make = |id: &str, status: ValidationStatus, expired: bool| Validation {
            id: id.into(),
            user_id: "usr_test01".into(),
            source: "tool_call".into(),
            title: "t".into(),
            agent_id: None,
            chat_id: None,
            payload: serde_json::json!({}),
            status,
            feedback: None,
            created_at: Utc::now(),
            expires_at: if expired {
                Utc::now() - Duration::hours(1)
            } else {
                Utc::now() + Duration::hours(1)
            },
        };
        store
            .create_validation(make("val_old001", ValidationStatus::Pending, true))
            .await
            .unwrap();
        store
            .create_validation(make("val_new001", ValidationStatus::Pending, false))
            .await
            .unwrap();
        store
            .create_validation(make("val_done01", ValidationStatus::Approved, true))
            .await
            .unwrap();
        let expired = store.list_expired_pending(Utc::now()).await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, "val_old001");
    }

    #[tokio::test]
    async fn executions_list_most_recent_first() {
        let store = MemoryStore::new();
        for i in 0..3 {
            store
                .create_execution(Execution {
                    id: format!("exec_{i:06}"),
                    automation_id: "auto_a1".into(),
                    trigger_id: None,
                    status: ExecutionStatus::Running,
                    started_at: Utc::now() + Duration::seconds(i),
                    completed_at: None,
                    failed_step: None,
                })
                .await
                .unwrap();
        }
        let list = store.list_executions("auto_a1").await.unwrap();
        assert_eq!(list[0].id, "exec_000002");
        assert_eq!(list[2].id, "exec_000000");
    }
}
