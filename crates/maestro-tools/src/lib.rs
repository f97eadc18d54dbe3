//! In-process tool handlers.
//!
//! Internal tools (RAG search, automation triggers) execute inside the
//! process instead of over MCP.  The registry is built explicitly at startup
//! from `(name, handler)` pairs — no import-side-effect registration — and
//! the same instance serves both the chat orchestrator and the workflow
//! executor.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

/// Result envelope mirroring the MCP tool-call shape so callers treat
/// internal and remote tools uniformly.
#[derive(Debug, Clone)]
pub struct InternalToolOutput {
    pub success: bool,
    pub result: Value,
    pub error: Option<String>,
}

impl InternalToolOutput {
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

/// One in-process tool.  Failures belong in [`InternalToolOutput::err`];
/// a panic here is a bug, not an error path.
#[async_trait]
pub trait InternalTool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the argument object.
    fn input_schema(&self) -> Value;
    async fn execute(&self, arguments: &Value) -> InternalToolOutput;
}

/// Schema triple advertised to the model for one registered tool.
#[derive(Debug, Clone)]
pub struct InternalToolSchema {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Registry of internal tools, immutable after construction.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn InternalTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry from an explicit handler list.
    pub fn from_handlers(handlers: Vec<Arc<dyn InternalTool>>) -> Self {
        let mut registry = Self::new();
        for handler in handlers {
            registry.register(handler);
        }
        registry
    }

    pub fn register(&mut self, tool: Arc<dyn InternalTool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn InternalTool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn schemas(&self) -> Vec<InternalToolSchema> {
        let mut schemas: Vec<InternalToolSchema> = self
            .tools
            .values()
            .map(|t| InternalToolSchema {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    pub async fn execute(&self, name: &str, arguments: &Value) -> InternalToolOutput {
        match self.tools.get(name) {
            Some(tool) => tool.execute(arguments).await,
            None => InternalToolOutput::err(format!("unknown internal tool: {name}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
