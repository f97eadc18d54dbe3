use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ─── Chat & messages ──────────────────────────────────────────────────────────

/// A conversation owned by a user and bound to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chat {
    pub id: String,
    pub user_id: String,
    pub agent_id: Option<String>,
    pub model: String,
    /// Set while a turn is streaming; a second user message while this is
    /// true is a conflict.
    pub is_generating: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    Tool,
}

/// Append-only element of a chat.  Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub chat_id: String,
    pub role: MessageRole,
    pub content: String,
    /// Structured extras: RAG sources, tool-call records, validation ids.
    pub metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

// ─── Agents ───────────────────────────────────────────────────────────────────

/// A reusable persona with attached MCP servers and RAG resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub system_prompt: String,
    pub tags: Vec<String>,
    pub server_ids: Vec<String>,
    pub resource_ids: Vec<String>,
    /// System agents reject deletion and mutation from user-facing paths.
    pub is_system: bool,
    pub created_at: DateTime<Utc>,
}

// ─── MCP servers & tools ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Http,
    Npx,
    Uvx,
    Docker,
}

impl Transport {
    pub fn is_subprocess(self) -> bool {
        !matches!(self, Transport::Http)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthType {
    None,
    ApiKey,
    Oauth,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    Pending,
    Active,
    Failed,
}

/// A remote or subprocess tool provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServer {
    pub id: String,
    /// None for system servers.
    pub user_id: Option<String>,
    pub name: String,
    pub transport: Transport,
    /// Endpoint for `http` transport.
    pub url: Option<String>,
    /// Child-process arguments for subprocess transports.
    pub args: Vec<String>,
    /// Extra environment for subprocess transports.
    pub env: BTreeMap<String, String>,
    pub auth: AuthType,
    /// Reference to the encrypted key record when `auth == ApiKey`.
    pub api_key_id: Option<String>,
    pub status: ServerStatus,
    pub status_message: Option<String>,
    pub is_system: bool,
}

/// A named callable on a server.  Name is unique per server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub enabled: bool,
    /// Auto-attached to every agent.
    pub is_default: bool,
    pub is_removable: bool,
}

// ─── Resources ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Processing,
    Ready,
    Error,
}

/// A RAG corpus.  Uploads and embeddings cascade on delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub embedding_model: String,
    pub embedding_dimension: u32,
    pub status: ResourceStatus,
    pub chunk_count: u64,
}

// ─── Validations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    Pending,
    Approved,
    Rejected,
    Feedback,
    Cancelled,
}

impl ValidationStatus {
    /// Terminal states are immutable.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ValidationStatus::Approved | ValidationStatus::Rejected | ValidationStatus::Cancelled
        )
    }

    /// The transition DAG: pending fans out to every other state; feedback
    /// may still be resolved; terminal states accept nothing.
    pub fn can_transition_to(self, next: ValidationStatus) -> bool {
        match self {
            ValidationStatus::Pending => next != ValidationStatus::Pending,
            ValidationStatus::Feedback => matches!(
                next,
                ValidationStatus::Approved
                    | ValidationStatus::Rejected
                    | ValidationStatus::Cancelled
            ),
            _ => false,
        }
    }
}

/// A human gate for a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validation {
    pub id: String,
    pub user_id: String,
    /// Where the request came from, e.g. `tool_call` or `automation`.
    pub source: String,
    pub title: String,
    pub agent_id: Option<String>,
    pub chat_id: Option<String>,
    /// The pending tool invocation: name, arguments, routing.
    pub payload: Value,
    pub status: ValidationStatus,
    /// Feedback text when status is `feedback`.
    pub feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

// ─── Automations ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Automation {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub description: String,
    pub enabled: bool,
    pub is_system: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Action,
    Control,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepSubtype {
    McpCall,
    AiAction,
    InternalTool,
    Condition,
    Loop,
    Delay,
}

impl StepSubtype {
    pub fn step_type(self) -> StepType {
        match self {
            StepSubtype::McpCall | StepSubtype::AiAction | StepSubtype::InternalTool => {
                StepType::Action
            }
            StepSubtype::Condition | StepSubtype::Loop | StepSubtype::Delay => StepType::Control,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    pub automation_id: String,
    pub order: u32,
    pub subtype: StepSubtype,
    pub config: Value,
    pub enabled: bool,
    /// A failing step normally aborts the execution; this lets it proceed.
    pub continue_on_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerType {
    Manual,
    Cron,
    Webhook,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    pub id: String,
    pub automation_id: String,
    pub trigger_type: TriggerType,
    /// `cron_expression` for cron, `secret_hash` for webhook.
    pub config: Value,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub automation_id: String,
    pub trigger_id: Option<String>,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Order of the step that aborted the run, when failed.
    pub failed_step: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStepLog {
    pub id: String,
    pub execution_id: String,
    pub step_order: u32,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

// ─── OAuth state ──────────────────────────────────────────────────────────────

/// Transient authorization-flow state, keyed by the `state` parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthSession {
    pub state: String,
    pub code_verifier: String,
    pub server_id: String,
    pub redirect_uri: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub server_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub scope: Option<String>,
}

// ─── Model catalog ────────────────────────────────────────────────────────────

/// One model advertised by a provider; synced daily into the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub display_name: String,
    pub provider: String,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    // ── Validation DAG ────────────────────────────────────────────────────────

    #[test]
    fn pending_can_reach_every_other_state() {
        use ValidationStatus::*;
        for next in [Approved, Rejected, Feedback, Cancelled] {
            assert!(Pending.can_transition_to(next), "pending → {next:?}");
        }
        assert!(!Pending.can_transition_to(Pending));
    }

    #[test]
    fn feedback_can_resolve_but_not_return_to_pending() {
        use ValidationStatus::*;
        assert!(Feedback.can_transition_to(Approved));
        assert!(Feedback.can_transition_to(Rejected));
        assert!(Feedback.can_transition_to(Cancelled));
        assert!(!Feedback.can_transition_to(Pending));
        assert!(!Feedback.can_transition_to(Feedback));
    }

    #[test]
    fn terminal_states_are_immutable() {
        use ValidationStatus::*;
        for terminal in [Approved, Rejected, Cancelled] {
            assert!(terminal.is_terminal());
            for next in [Pending, Approved, Rejected, Feedback, Cancelled] {
                assert!(!terminal.can_transition_to(next), "{terminal:?} → {next:?}");
            }
        }
        assert!(!Pending.is_terminal());
        assert!(!Feedback.is_terminal());
    }

    // ── Step typing ───────────────────────────────────────────────────────────

    #[test]
    fn subtypes_map_to_the_right_step_type() {
        assert_eq!(StepSubtype::McpCall.step_type(), StepType::Action);
        assert_eq!(StepSubtype::AiAction.step_type(), StepType::Action);
        assert_eq!(StepSubtype::InternalTool.step_type(), StepType::Action);
        assert_eq!(StepSubtype::Condition.step_type(), StepType::Control);
        assert_eq!(StepSubtype::Loop.step_type(), StepType::Control);
        assert_eq!(StepSubtype::Delay.step_type(), StepType::Control);
    }

    #[test]
    fn step_subtype_serializes_snake_case() {
        let v = serde_json::to_value(StepSubtype::McpCall).unwrap();
        assert_eq!(v, "mcp_call");
        let back: StepSubtype = serde_json::from_value(v).unwrap();
        assert_eq!(back, StepSubtype::McpCall);
    }

    // ── Enum wire formats ─────────────────────────────────────────────────────

    #[test]
    fn auth_type_serializes_kebab_case() {
        assert_eq!(serde_json::to_value(AuthType::ApiKey).unwrap(), "api-key");
        assert_eq!(serde_json::to_value(AuthType::Oauth).unwrap(), "oauth");
    }

    #[test]
    fn transport_subprocess_classification() {
        assert!(!Transport::Http.is_subprocess());
        assert!(Transport::Npx.is_subprocess());
        assert!(Transport::Uvx.is_subprocess());
        assert!(Transport::Docker.is_subprocess());
    }

    #[test]
    fn message_role_round_trips() {
        for role in [MessageRole::User, MessageRole::Assistant, MessageRole::Tool] {
            let v = serde_json::to_value(role).unwrap();
            let back: MessageRole = serde_json::from_value(v).unwrap();
            assert_eq!(back, role);
        }
    }
}
