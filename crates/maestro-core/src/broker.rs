//! The validation broker.
//!
//! Every tool call pairs with a validation: the broker creates the pending
//! record, enforces the status DAG on transitions, executes the approved
//! tool, and routes the outcome back into the waiting stream session.  When
//! the session is gone but the chat was paused mid-turn, the broker hands
//! the approved result to the orchestrator's background continuation so the
//! assistant message still lands in persistence.

use std::sync::{Arc, Mutex as StdMutex};

use chrono::{Duration as ChronoDuration, Utc};
use maestro_domain::id::{generate, IdKind};
use maestro_domain::{Error, Result, Validation, ValidationStatus};
use maestro_mcp::ClientFactory;
use maestro_store::ValidationStore;
use maestro_tools::ToolRegistry;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::orchestrator::TurnContinuation;
use crate::session::{SessionManager, ValidationOutcome};

/// The pending tool invocation carried in `Validation::payload`.
#[derive(Debug, Clone)]
pub struct ValidationPayload {
    pub tool_name: String,
    pub arguments: Value,
    /// Server to call; `None` routes to the internal registry.
    pub server_id: Option<String>,
}

impl ValidationPayload {
    pub fn to_value(&self) -> Value {
        json!({
            "tool_name": self.tool_name,
            "arguments": self.arguments,
            "server_id": self.server_id,
        })
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Self {
            tool_name: value["tool_name"]
                .as_str()
                .ok_or_else(|| Error::Validation("payload lacks tool_name".into()))?
                .to_string(),
            arguments: value.get("arguments").cloned().unwrap_or(json!({})),
            server_id: value["server_id"].as_str().map(|s| s.to_string()),
        })
    }
}

pub struct ValidationBroker {
    validations: Arc<dyn ValidationStore>,
    sessions: Arc<SessionManager>,
    mcp: Arc<ClientFactory>,
    registry: Arc<ToolRegistry>,
    ttl: ChronoDuration,
    continuation: StdMutex<Option<Arc<dyn TurnContinuation>>>,
}

impl ValidationBroker {
    pub fn new(
        validations: Arc<dyn ValidationStore>,
        sessions: Arc<SessionManager>,
        mcp: Arc<ClientFactory>,
        registry: Arc<ToolRegistry>,
        ttl_secs: u64,
    ) -> Self {
        Self {
            validations,
            sessions,
            mcp,
            registry,
            ttl: ChronoDuration::seconds(ttl_secs as i64),
            continuation: StdMutex::new(None),
        }
    }

    /// Wire the background continuation after construction; the orchestrator
    /// holds the broker, so this breaks the cycle.
    pub fn set_continuation(&self, continuation: Arc<dyn TurnContinuation>) {
        *self
            .continuation
            .lock()
            .expect("continuation lock poisoned") = Some(continuation);
    }

    /// Open a pending validation expiring after the configured TTL.
    pub async fn create(
        &self,
        user_id: &str,
        source: &str,
        title: &str,
        agent_id: Option<&str>,
        chat_id: Option<&str>,
        payload: &ValidationPayload,
    ) -> Result<Validation> {
        let validation = Validation {
            id: generate(IdKind::Validation),
            user_id: user_id.to_string(),
            source: source.to_string(),
            title: title.to_string(),
            agent_id: agent_id.map(|s| s.to_string()),
            chat_id: chat_id.map(|s| s.to_string()),
            payload: payload.to_value(),
            status: ValidationStatus::Pending,
            feedback: None,
            created_at: Utc::now(),
            expires_at: Utc::now() + self.ttl,
        };
        self.validations.create_validation(validation.clone()).await?;
        info!(validation_id = %validation.id, source, "validation created");
        Ok(validation)
    }

    /// Enforce the status DAG and persist the transition.  Any move not in
    /// the DAG is rejected and leaves the stored state untouched.
    pub async fn transition(
        &self,
        validation_id: &str,
        next: ValidationStatus,
        feedback: Option<String>,
    ) -> Result<Validation> {
        let mut validation = self
            .validations
            .get_validation(validation_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("validation {validation_id} not found")))?;

        if !validation.status.can_transition_to(next) {
            return Err(Error::Validation(format!(
                "invalid status transition: {:?} → {next:?}",
                validation.status
            )));
        }

        self.validations
            .set_validation_status(validation_id, next, feedback.clone())
            .await?;
        validation.status = next;
        if feedback.is_some() {
            validation.feedback = feedback;
        }
        info!(validation_id, status = ?next, "validation transitioned");
        Ok(validation)
    }

    /// Approve: run the gated tool, then deliver the result into the session
    /// — or to the background continuation when the session is gone.
    pub async fn approve(&self, validation_id: &str) -> Result<()> {
        let validation = self
            .transition(validation_id, ValidationStatus::Approved, None)
            .await?;
        let payload = ValidationPayload::from_value(&validation.payload)?;

        let data = self.execute_tool(&payload).await;
        let outcome = ValidationOutcome::Approved {
            validation_id: validation_id.to_string(),
            data,
        };
        self.deliver(&validation, outcome).await;
        Ok(())
    }

    pub async fn reject(&self, validation_id: &str) -> Result<()> {
        let validation = self
            .transition(validation_id, ValidationStatus::Rejected, None)
            .await?;
        self.deliver(
            &validation,
            ValidationOutcome::Rejected {
                validation_id: validation_id.to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn feedback(&self, validation_id: &str, feedback: &str) -> Result<()> {
        let validation = self
            .transition(
                validation_id,
                ValidationStatus::Feedback,
                Some(feedback.to_string()),
            )
            .await?;
        self.deliver(
            &validation,
            ValidationOutcome::Feedback {
                validation_id: validation_id.to_string(),
                feedback: feedback.to_string(),
            },
        )
        .await;
        Ok(())
    }

    pub async fn cancel(&self, validation_id: &str) -> Result<()> {
        let validation = self
            .transition(validation_id, ValidationStatus::Cancelled, None)
            .await?;
        self.deliver(
            &validation,
            ValidationOutcome::Cancelled {
                validation_id: validation_id.to_string(),
            },
        )
        .await;
        Ok(())
    }

    /// Cancel every pending validation past its expiry.  Runs from the
    /// scheduler every fifteen minutes.
    pub async fn expire_stale(&self) -> Result<usize> {
        let expired = self.validations.list_expired_pending(Utc::now()).await?;
        let count = expired.len();
        for validation in expired {
            if let Err(e) = self.cancel(&validation.id).await {
                warn!(validation_id = %validation.id, error = %e, "expiry cancel failed");
            }
        }
        if count > 0 {
            info!(count, "expired stale validations");
        }
        Ok(count)
    }

    /// Execute the gated tool.  Failures become an error envelope inside the
    /// approved outcome — a broken tool must not wedge the waiting turn.
    async fn execute_tool(&self, payload: &ValidationPayload) -> Value {
        match &payload.server_id {
            Some(server_id) => match self.mcp.client_for(server_id).await {
                Ok(client) => {
                    let result = client.call_tool(&payload.tool_name, &payload.arguments).await;
                    if result.success {
                        result.result
                    } else {
                        json!({
                            "success": false,
                            "error": result.error.unwrap_or_else(|| "tool call failed".into()),
                        })
                    }
                }
                Err(e) => json!({ "success": false, "error": e.to_string() }),
            },
            None => {
                let output = self
                    .registry
                    .execute(&payload.tool_name, &payload.arguments)
                    .await;
                if output.success {
                    output.result
                } else {
                    json!({
                        "success": false,
                        "error": output.error.unwrap_or_else(|| "internal tool failed".into()),
                    })
                }
            }
        }
    }

    async fn deliver(&self, validation: &Validation, outcome: ValidationOutcome) {
        let Some(chat_id) = &validation.chat_id else {
            return;
        };
        if self.sessions.inject_validation_result(chat_id, outcome.clone()) {
            return;
        }
        // No live session: the client disconnected and cleanup already ran,
        // but the chat was paused mid-turn.  Only an approval carries new
        // information worth resuming for.
        if matches!(outcome, ValidationOutcome::Approved { .. }) {
            let continuation = self
                .continuation
                .lock()
                .expect("continuation lock poisoned")
                .clone();
            match continuation {
                Some(continuation) => {
                    let validation = validation.clone();
                    tokio::spawn(async move {
                        continuation.resume(validation, outcome).await;
                    });
                }
                None => warn!(
                    chat_id,
                    "approved with no session and no continuation wired; result dropped"
                ),
            }
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
