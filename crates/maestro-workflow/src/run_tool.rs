//! `automation.run` — the internal tool that lets an agent (or another
//! workflow) trigger an automation by id.
//!
//! The executor is injected after construction: the tool sits in the shared
//! registry, the registry is handed to the executor, and only then can the
//! executor be wired back in.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use maestro_tools::{InternalTool, InternalToolOutput};
use serde_json::{json, Value};

use crate::executor::WorkflowExecutor;

pub struct RunAutomationTool {
    executor: StdMutex<Option<Arc<WorkflowExecutor>>>,
}

impl RunAutomationTool {
    pub const NAME: &'static str = "automation.run";

    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executor: StdMutex::new(None),
        })
    }

    pub fn set_executor(&self, executor: Arc<WorkflowExecutor>) {
        *self.executor.lock().expect("executor lock poisoned") = Some(executor);
    }
}

#[async_trait]
impl InternalTool for RunAutomationTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Run an automation by id with an optional input payload"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "automation_id": { "type": "string" },
                "input": { "type": "object" }
            },
            "required": ["automation_id"]
        })
    }

    async fn execute(&self, arguments: &Value) -> InternalToolOutput {
        let Some(automation_id) = arguments["automation_id"].as_str() else {
            return InternalToolOutput::err("automation.run requires automation_id");
        };
        let executor = self
            .executor
            .lock()
            .expect("executor lock poisoned")
            .clone();
        let Some(executor) = executor else {
            return InternalToolOutput::err("workflow executor is not wired yet");
        };
        match executor
            .run(automation_id, None, arguments.get("input").cloned())
            .await
        {
            Ok(summary) => InternalToolOutput::ok(json!({
                "execution_id": summary.execution_id,
                "status": summary.status,
                "failed_step": summary.failed_step,
            })),
            Err(e) => InternalToolOutput::err(format!("automation run failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
