//! The automation step interpreter.
//!
//! An execution walks the ordered step list with a growing context: `input`
//! and `trigger` seed it, and each completed action adds
//! `step_<order>.result`.  Control steps steer the walk (condition branches,
//! loops over a context list, delays); action steps call out through MCP,
//! the gateway, or the internal tool registry.  A failing step aborts the
//! run unless it opted into `continue_on_error`; side effects of completed
//! steps are never rolled back.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use maestro_domain::id::{generate, IdKind};
use maestro_domain::{
    Error, Execution, ExecutionStatus, ExecutionStepLog, Result, StepSubtype, WorkflowStep,
};
use maestro_mcp::ClientFactory;
use maestro_model::{ChatRequest, Gateway, Message};
use maestro_store::{AgentStore, AutomationStore};
use maestro_tools::ToolRegistry;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::expr::evaluate_condition;
use crate::template::{resolve_all, resolve_template};

const DEFAULT_AI_ACTION_MODEL: &str = "gpt-4o-mini";

#[derive(Debug, Clone)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub failed_step: Option<u32>,
}

pub struct WorkflowExecutor {
    automations: Arc<dyn AutomationStore>,
    agents: Arc<dyn AgentStore>,
    mcp: Arc<ClientFactory>,
    gateway: Arc<Gateway>,
    registry: Arc<ToolRegistry>,
}

/// What a step produced, plus an optional jump target for control flow.
struct StepOutcome {
    result: Value,
    jump_to_order: Option<u32>,
}

impl WorkflowExecutor {
    pub fn new(
        automations: Arc<dyn AutomationStore>,
        agents: Arc<dyn AgentStore>,
        mcp: Arc<ClientFactory>,
        gateway: Arc<Gateway>,
        registry: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            automations,
            agents,
            mcp,
            gateway,
            registry,
        }
    }

    /// Run one automation to completion.
    pub async fn run(
        &self,
        automation_id: &str,
        trigger_id: Option<&str>,
        input: Option<Value>,
    ) -> Result<ExecutionSummary> {
        let automation = self
            .automations
            .get_automation(automation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("automation {automation_id} not found")))?;
        if !automation.enabled {
            return Err(Error::Validation(format!(
                "automation {automation_id} is disabled"
            )));
        }

        let steps = self.automations.list_steps(automation_id).await?;
        let execution_id = generate(IdKind::Execution);
        self.automations
            .create_execution(Execution {
                id: execution_id.clone(),
                automation_id: automation_id.to_string(),
                trigger_id: trigger_id.map(|s| s.to_string()),
                status: ExecutionStatus::Running,
                started_at: Utc::now(),
                completed_at: None,
                failed_step: None,
            })
            .await?;
        info!(automation_id, execution_id, "automation execution started");

        let mut ctx = json!({
            "input": input.unwrap_or(Value::Null),
            "trigger": trigger_id,
        });

        let mut idx = 0usize;
        while idx < steps.len() {
            let step = &steps[idx];
            if !step.enabled {
                idx += 1;
                continue;
            }

            let started = Instant::now();
            let outcome = self.run_step(step, &mut ctx).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(outcome) => {
                    ctx[format!("step_{}", step.order)] =
                        json!({ "result": outcome.result.clone() });
                    self.log_step(&execution_id, step, Some(outcome.result), None, duration_ms)
                        .await;
                    idx = match outcome.jump_to_order {
                        Some(order) => match steps.iter().position(|s| s.order == order) {
                            Some(pos) => pos,
                            None => {
                                warn!(
                                    execution_id,
                                    order, "condition branch targets a missing step; stopping"
                                );
                                break;
                            }
                        },
                        None => idx + 1,
                    };
                }
                Err(e) => {
                    self.log_step(&execution_id, step, None, Some(e.to_string()), duration_ms)
                        .await;
                    if step.continue_on_error {
                        warn!(
                            execution_id,
                            step_order = step.order,
                            error = %e,
                            "step failed, continuing"
                        );
                        idx += 1;
                        continue;
                    }
                    self.automations
                        .finish_execution(&execution_id, ExecutionStatus::Failed, Some(step.order))
                        .await?;
                    warn!(execution_id, step_order = step.order, error = %e, "execution failed");
                    return Ok(ExecutionSummary {
                        execution_id,
                        status: ExecutionStatus::Failed,
                        failed_step: Some(step.order),
                    });
                }
            }
        }

        self.automations
            .finish_execution(&execution_id, ExecutionStatus::Success, None)
            .await?;
        info!(execution_id, "automation execution succeeded");
        Ok(ExecutionSummary {
            execution_id,
            status: ExecutionStatus::Success,
            failed_step: None,
        })
    }

    async fn log_step(
        &self,
        execution_id: &str,
        step: &WorkflowStep,
        output: Option<Value>,
        error: Option<String>,
        duration_ms: u64,
    ) {
        let log = ExecutionStepLog {
            id: generate(IdKind::ExecutionStepLog),
            execution_id: execution_id.to_string(),
            step_order: step.order,
            input: step.config.clone(),
            output,
            error,
            duration_ms,
        };
        if let Err(e) = self.automations.append_step_log(log).await {
            warn!(execution_id, error = %e, "failed to persist step log");
        }
    }

    async fn run_step(&self, step: &WorkflowStep, ctx: &mut Value) -> Result<StepOutcome> {
        match step.subtype {
            StepSubtype::McpCall => self.run_mcp_call(step, ctx).await,
            StepSubtype::AiAction => self.run_ai_action(step, ctx).await,
            StepSubtype::InternalTool => self.run_internal_tool(step, ctx).await,
            StepSubtype::Condition => self.run_condition(step, ctx),
            StepSubtype::Loop => self.run_loop(step, ctx).await,
            StepSubtype::Delay => self.run_delay(step).await,
        }
    }

    async fn run_mcp_call(&self, step: &WorkflowStep, ctx: &Value) -> Result<StepOutcome> {
        let server_id = step.config["server_id"]
            .as_str()
            .ok_or_else(|| Error::Validation("mcp_call step requires server_id".into()))?;
        let tool_name = step.config["tool_name"]
            .as_str()
            .ok_or_else(|| Error::Validation("mcp_call step requires tool_name".into()))?;

        let arguments = resolve_all(&step.config["arguments"], ctx);
        match arguments.as_object() {
            Some(map) if !map.is_empty() => {}
            _ => {
                return Err(Error::Validation(
                    "mcp_call arguments must be a non-empty object".into(),
                ))
            }
        }

        let client = self.mcp.client_for(server_id).await?;
        let result = client.call_tool(tool_name, &arguments).await;
        if !result.success {
            return Err(Error::ToolExecution(
                result.error.unwrap_or_else(|| "tool call failed".into()),
            ));
        }
        Ok(StepOutcome {
            result: result.result,
            jump_to_order: None,
        })
    }

    async fn run_ai_action(&self, step: &WorkflowStep, ctx: &Value) -> Result<StepOutcome> {
        let agent_id = step.config["agent_id"]
            .as_str()
            .ok_or_else(|| Error::Validation("ai_action step requires agent_id".into()))?;
        let prompt_template = step.config["prompt"]
            .as_str()
            .ok_or_else(|| Error::Validation("ai_action step requires a prompt".into()))?;

        let agent = self
            .agents
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id} not found")))?;

        let prompt = match resolve_template(prompt_template, ctx) {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let model = step.config["model"]
            .as_str()
            .unwrap_or(DEFAULT_AI_ACTION_MODEL)
            .to_string();

        let text = self
            .gateway
            .collect_text(ChatRequest {
                model,
                system_prompt: Some(agent.system_prompt.clone()),
                messages: vec![Message::user(prompt)],
                tools: Vec::new(),
                max_tokens: None,
                temperature: None,
            })
            .await?;
        Ok(StepOutcome {
            result: Value::String(text),
            jump_to_order: None,
        })
    }

    async fn run_internal_tool(&self, step: &WorkflowStep, ctx: &Value) -> Result<StepOutcome> {
        let tool_name = step.config["tool_name"]
            .as_str()
            .ok_or_else(|| Error::Validation("internal_tool step requires tool_name".into()))?;
        let arguments = resolve_all(
            step.config.get("arguments").unwrap_or(&json!({})),
            ctx,
        );
        let output = self.registry.execute(tool_name, &arguments).await;
        if !output.success {
            return Err(Error::ToolExecution(
                output.error.unwrap_or_else(|| "internal tool failed".into()),
            ));
        }
        Ok(StepOutcome {
            result: output.result,
            jump_to_order: None,
        })
    }

    fn run_condition(&self, step: &WorkflowStep, ctx: &Value) -> Result<StepOutcome> {
        let expression = step.config["expression"]
            .as_str()
            .ok_or_else(|| Error::Validation("condition step requires an expression".into()))?;
        let verdict = evaluate_condition(expression, ctx)?;
        let branch_key = if verdict { "then" } else { "else" };
        let jump_to_order = step.config[branch_key].as_u64().map(|o| o as u32);
        Ok(StepOutcome {
            result: Value::Bool(verdict),
            jump_to_order,
        })
    }

    /// Iterate a context list, running the body steps once per item with the
    /// current element exposed as `item`.  Bodies hold action steps only —
    /// nested control flow is rejected at run time.
    async fn run_loop(&self, step: &WorkflowStep, ctx: &mut Value) -> Result<StepOutcome> {
        let items = resolve_all(&step.config["items"], ctx);
        let items = items
            .as_array()
            .ok_or_else(|| Error::Validation("loop items must resolve to a list".into()))?
            .clone();
        let body: Vec<WorkflowStep> = match step.config["body"].as_array() {
            Some(configs) => configs
                .iter()
                .enumerate()
                .map(|(i, config)| parse_body_step(step, i, config))
                .collect::<Result<Vec<_>>>()?,
            None => return Err(Error::Validation("loop step requires a body".into())),
        };

        let mut results = Vec::with_capacity(items.len());
        for item in items {
            ctx["item"] = item;
            let mut iteration = Vec::with_capacity(body.len());
            for body_step in &body {
                // Bodies carry action steps only, so this dispatch never
                // re-enters loop or condition handling.
                let outcome = match body_step.subtype {
                    StepSubtype::McpCall => self.run_mcp_call(body_step, ctx).await?,
                    StepSubtype::AiAction => self.run_ai_action(body_step, ctx).await?,
                    StepSubtype::InternalTool => self.run_internal_tool(body_step, ctx).await?,
                    StepSubtype::Delay => self.run_delay(body_step).await?,
                    StepSubtype::Condition | StepSubtype::Loop => {
                        unreachable!("rejected by parse_body_step")
                    }
                };
                iteration.push(outcome.result);
            }
            results.push(Value::Array(iteration));
        }
        Ok(StepOutcome {
            result: Value::Array(results),
            jump_to_order: None,
        })
    }

    async fn run_delay(&self, step: &WorkflowStep) -> Result<StepOutcome> {
        let ms = step.config["duration_ms"]
            .as_u64()
            .ok_or_else(|| Error::Validation("delay step requires duration_ms".into()))?;
        tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
        Ok(StepOutcome {
            result: json!({ "slept_ms": ms }),
            jump_to_order: None,
        })
    }
}

fn parse_body_step(parent: &WorkflowStep, index: usize, config: &Value) -> Result<WorkflowStep> {
    let subtype: StepSubtype = serde_json::from_value(config["subtype"].clone())
        .map_err(|_| Error::Validation("loop body step requires a subtype".into()))?;
    if matches!(subtype, StepSubtype::Condition | StepSubtype::Loop) {
        return Err(Error::Validation(
            "control steps cannot be nested inside a loop body".into(),
        ));
    }
    Ok(WorkflowStep {
        id: format!("{}_body_{index}", parent.id),
        automation_id: parent.automation_id.clone(),
        order: parent.order,
        subtype,
        config: config["config"].clone(),
        enabled: true,
        continue_on_error: false,
    })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use maestro_config::RetrySettings;
    use maestro_domain::{Automation, StepSubtype};
    use maestro_mcp::{MetadataCache, OAuthManager};
    use maestro_model::ScriptedMockAdapter;
    use maestro_store::MemoryStore;
    use maestro_tools::{InternalTool, InternalToolOutput};
    use std::time::Duration;

    struct UppercaseTool;

    #[async_trait]
    impl InternalTool for UppercaseTool {
        fn name(&self) -> &str {
            "uppercase"
        }
        fn description(&self) -> &str {
            "uppercases the text argument"
        }
        fn input_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, arguments: &Value) -> InternalToolOutput {
            match arguments["text"].as_str() {
                Some(text) => InternalToolOutput::ok(json!({ "text": text.to_uppercase() })),
                None => InternalToolOutput::err("missing text argument"),
            }
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        executor: WorkflowExecutor,
    }

    fn fixture(gateway_scripts: Vec<Vec<maestro_model::ResponseEvent>>) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let oauth = Arc::new(OAuthManager::new(
            reqwest::Client::new(),
            Arc::new(MetadataCache::new(Duration::from_secs(60))),
            store.clone(),
            store.clone(),
            "http://app/success",
        ));
        let mcp = Arc::new(ClientFactory::new(
            reqwest::Client::new(),
            store.clone(),
            store.clone(),
            None,
            oauth,
            Duration::from_secs(5),
            Duration::from_secs(5),
        ));
        let gateway = Arc::new(Gateway::new(
            vec![Arc::new(ScriptedMockAdapter::new(gateway_scripts))],
            "mock",
            RetrySettings {
                max_attempts: 1,
                base_delay_ms: 1,
            },
            5,
            Duration::from_secs(60),
            1,
        ));
        let registry = Arc::new(maestro_tools::ToolRegistry::from_handlers(vec![Arc::new(
            UppercaseTool,
        )]));
        let executor = WorkflowExecutor::new(
            store.clone(),
            store.clone(),
            mcp,
            gateway,
            registry,
        );
        Fixture { store, executor }
    }

    async fn seed_automation(store: &MemoryStore, steps: Vec<WorkflowStep>) {
        store
            .create_automation(Automation {
                id: "auto_a1b2c3".into(),
                user_id: "usr_test01".into(),
                name: "test".into(),
                description: String::new(),
                enabled: true,
                is_system: false,
            })
            .await
            .unwrap();
        store.put_steps("auto_a1b2c3", steps).await.unwrap();
    }

    fn step(order: u32, subtype: StepSubtype, config: Value) -> WorkflowStep {
        WorkflowStep {
            id: format!("step_t{order}"),
            automation_id: "auto_a1b2c3".into(),
            order,
            subtype,
            config,
            enabled: true,
            continue_on_error: false,
        }
    }

    #[tokio::test]
    async fn internal_tool_step_feeds_the_next_step_through_context() {
        let f = fixture(vec![]);
        seed_automation(
            &f.store,
            vec![
                step(
                    0,
                    StepSubtype::InternalTool,
                    json!({ "tool_name": "uppercase", "arguments": { "text": "{{input.word}}" } }),
                ),
                step(
                    1,
                    StepSubtype::InternalTool,
                    json!({ "tool_name": "uppercase", "arguments": { "text": "{{step_0.result.text}}" } }),
                ),
            ],
        )
        .await;

        let summary = f
            .executor
            .run("auto_a1b2c3", None, Some(json!({ "word": "hi" })))
            .await
            .unwrap();
        assert_eq!(summary.status, ExecutionStatus::Success);

        let logs = f.store.list_step_logs(&summary.execution_id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].output.as_ref().unwrap()["text"], "HI");
        assert!(logs.iter().all(|l| l.error.is_none()));
    }

    #[tokio::test]
    async fn condition_branches_to_the_then_step() {
        let f = fixture(vec![]);
        seed_automation(
            &f.store,
            vec![
                step(
                    0,
                    StepSubtype::Condition,
                    json!({ "expression": "{{input.t}} > 25", "then": 2, "else": 1 }),
                ),
                step(
                    1,
                    StepSubtype::InternalTool,
                    json!({ "tool_name": "uppercase", "arguments": { "text": "cold" } }),
                ),
                step(
                    2,
                    StepSubtype::InternalTool,
                    json!({ "tool_name": "uppercase", "arguments": { "text": "hot" } }),
                ),
            ],
        )
        .await;

        let summary = f
            .executor
            .run("auto_a1b2c3", None, Some(json!({ "t": 30 })))
            .await
            .unwrap();
        assert_eq!(summary.status, ExecutionStatus::Success);
        let logs = f.store.list_step_logs(&summary.execution_id).await.unwrap();
        // Condition, then the `then` branch; the `else` step never ran.
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[1].step_order, 2);
        assert_eq!(logs[1].output.as_ref().unwrap()["text"], "HOT");
    }

    #[tokio::test]
    async fn failing_step_aborts_with_failed_status() {
        let f = fixture(vec![]);
        seed_automation(
            &f.store,
            vec![
                step(
                    0,
                    StepSubtype::InternalTool,
                    json!({ "tool_name": "uppercase", "arguments": { "wrong": 1 } }),
                ),
                step(
                    1,
                    StepSubtype::InternalTool,
                    json!({ "tool_name": "uppercase", "arguments": { "text": "never" } }),
                ),
            ],
        )
        .await;

        let summary = f.executor.run("auto_a1b2c3", None, None).await.unwrap();
        assert_eq!(summary.status, ExecutionStatus::Failed);
        assert_eq!(summary.failed_step, Some(0));
        let logs = f.store.list_step_logs(&summary.execution_id).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].error.is_some());
        let executions = f.store.list_executions("auto_a1b2c3").await.unwrap();
        assert_eq!(executions[0].status, ExecutionStatus::Failed);
        assert_eq!(executions[0].failed_step, Some(0));
    }

    #[tokio::test]
    async fn continue_on_error_proceeds_past_a_failure() {
        let f = fixture(vec![]);
        let mut failing = step(
            0,
            StepSubtype::InternalTool,
            json!({ "tool_name": "uppercase", "arguments": { "wrong": 1 } }),
        );
        failing.continue_on_error = true;
        seed_automation(
            &f.store,
            vec![
                failing,
                step(
                    1,
                    StepSubtype::InternalTool,
                    json!({ "tool_name": "uppercase", "arguments": { "text": "ok" } }),
                ),
            ],
        )
        .await;

        let summary = f.executor.run("auto_a1b2c3", None, None).await.unwrap();
        assert_eq!(summary.status, ExecutionStatus::Success);
        let logs = f.store.list_step_logs(&summary.execution_id).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].error.is_some());
        assert_eq!(logs[1].output.as_ref().unwrap()["text"], "OK");
    }

    #[tokio::test]
    async fn mcp_call_requires_non_empty_arguments() {
        let f = fixture(vec![]);
        seed_automation(
            &f.store,
            vec![step(
                0,
                StepSubtype::McpCall,
                json!({ "server_id": "srv_abc123", "tool_name": "echo", "arguments": {} }),
            )],
        )
        .await;

        let summary = f.executor.run("auto_a1b2c3", None, None).await.unwrap();
        assert_eq!(summary.status, ExecutionStatus::Failed);
        let logs = f.store.list_step_logs(&summary.execution_id).await.unwrap();
        assert!(logs[0].error.as_ref().unwrap().contains("non-empty"));
    }

    #[tokio::test]
    async fn ai_action_collects_gateway_text() {
        use maestro_model::ResponseEvent;
        let f = fixture(vec![vec![
            ResponseEvent::TextDelta("summary: ".into()),
            ResponseEvent::TextDelta("all good".into()),
            ResponseEvent::Done {
                finish_reason: Some("stop".into()),
            },
        ]]);
        f.store
            .create_agent(maestro_domain::Agent {
                id: "agt_brief1".into(),
                user_id: "usr_test01".into(),
                name: "briefer".into(),
                system_prompt: "You summarise.".into(),
                tags: vec![],
                server_ids: vec![],
                resource_ids: vec![],
                is_system: false,
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        seed_automation(
            &f.store,
            vec![step(
                0,
                StepSubtype::AiAction,
                json!({
                    "agent_id": "agt_brief1",
                    "prompt": "Summarise {{input.topic}}",
                    "model": "mock-model",
                }),
            )],
        )
        .await;

        let summary = f
            .executor
            .run("auto_a1b2c3", None, Some(json!({ "topic": "weather" })))
            .await
            .unwrap();
        assert_eq!(summary.status, ExecutionStatus::Success);
        let logs = f.store.list_step_logs(&summary.execution_id).await.unwrap();
        assert_eq!(logs[0].output, Some(json!("summary: all good")));
    }

    #[tokio::test]
    async fn loop_runs_body_per_item() {
        let f = fixture(vec![]);
        seed_automation(
            &f.store,
            vec![step(
                0,
                StepSubtype::Loop,
                json!({
                    "items": "{{input.names}}",
                    "body": [{
                        "subtype": "internal_tool",
                        "config": { "tool_name": "uppercase", "arguments": { "text": "{{item}}" } },
                    }],
                }),
            )],
        )
        .await;

        let summary = f
            .executor
            .run(
                "auto_a1b2c3",
                None,
                Some(json!({ "names": ["ada", "bob"] })),
            )
            .await
            .unwrap();
        assert_eq!(summary.status, ExecutionStatus::Success);
        let logs = f.store.list_step_logs(&summary.execution_id).await.unwrap();
        let result = logs[0].output.as_ref().unwrap();
        assert_eq!(result[0][0]["text"], "ADA");
        assert_eq!(result[1][0]["text"], "BOB");
    }

    #[tokio::test]
    async fn disabled_automation_refuses_to_run() {
        let f = fixture(vec![]);
        f.store
            .create_automation(Automation {
                id: "auto_off001".into(),
                user_id: "usr_test01".into(),
                name: "off".into(),
                description: String::new(),
                enabled: false,
                is_system: false,
            })
            .await
            .unwrap();
        let err = f.executor.run("auto_off001", None, None).await.unwrap_err();
        assert_eq!(err.status(), 400);
    }

    #[tokio::test]
    async fn unknown_automation_is_not_found() {
        let f = fixture(vec![]);
        let err = f.executor.run("auto_nope01", None, None).await.unwrap_err();
        assert_eq!(err.status(), 404);
    }
}
