//! Built-in maintenance jobs and automation trigger registration.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use maestro_core::{SessionManager, ValidationBroker};
use maestro_domain::Result;
use maestro_model::Gateway;
use maestro_store::{AutomationStore, ChatStore, ModelCatalogStore, ValidationStore};
use maestro_workflow::{parse_cron, WorkflowExecutor};
use serde_json::Value;
use tracing::{info, warn};

use crate::{Job, Scheduler};

/// Daily model catalog refresh (00:00).
pub struct ModelSyncJob {
    pub gateway: Arc<Gateway>,
    pub catalog: Arc<dyn ModelCatalogStore>,
}

#[async_trait]
impl Job for ModelSyncJob {
    fn name(&self) -> &str {
        "model_sync"
    }

    async fn run(&self) -> Result<()> {
        for provider in self.gateway.provider_names() {
            match self.gateway.list_models(Some(&provider)).await {
                Ok(models) => {
                    let count = models.len();
                    self.catalog.replace_models(&provider, models).await?;
                    info!(provider, count, "model catalog synced");
                }
                Err(e) => warn!(provider, error = %e, "model sync failed for provider"),
            }
        }
        Ok(())
    }
}

/// Daily empty-chat garbage collection (01:00).
pub struct EmptyChatGcJob {
    pub chats: Arc<dyn ChatStore>,
    pub max_age_days: i64,
}

#[async_trait]
impl Job for EmptyChatGcJob {
    fn name(&self) -> &str {
        "empty_chat_gc"
    }

    async fn run(&self) -> Result<()> {
        let cutoff = Utc::now() - ChronoDuration::days(self.max_age_days);
        let removed = self.chats.reap_empty_chats(cutoff).await?;
        if removed > 0 {
            info!(removed, "reaped empty chats");
        }
        Ok(())
    }
}

/// Fifteen-minute sweep cancelling pending validations past expiry.
pub struct ValidationExpiryJob {
    pub broker: Arc<ValidationBroker>,
}

#[async_trait]
impl Job for ValidationExpiryJob {
    fn name(&self) -> &str {
        "validation_expiry"
    }

    async fn run(&self) -> Result<()> {
        self.broker.expire_stale().await?;
        Ok(())
    }
}

/// Hourly stream-session cleanup: terminal-validation sessions, dead
/// disconnects, over-age sessions.
pub struct SessionCleanupJob {
    pub sessions: Arc<SessionManager>,
    pub validations: Arc<dyn ValidationStore>,
}

#[async_trait]
impl Job for SessionCleanupJob {
    fn name(&self) -> &str {
        "session_cleanup"
    }

    async fn run(&self) -> Result<()> {
        let ended = self.sessions.cleanup(self.validations.as_ref()).await;
        if ended > 0 {
            info!(ended, "cleaned stream sessions");
        }
        Ok(())
    }
}

/// One cron-triggered automation.
pub struct AutomationTriggerJob {
    pub executor: Arc<WorkflowExecutor>,
    pub automation_id: String,
    pub trigger_id: String,
}

#[async_trait]
impl Job for AutomationTriggerJob {
    fn name(&self) -> &str {
        "automation_trigger"
    }

    async fn run(&self) -> Result<()> {
        let summary = self
            .executor
            .run(&self.automation_id, Some(&self.trigger_id), None)
            .await?;
        info!(
            automation_id = %self.automation_id,
            execution_id = %summary.execution_id,
            status = ?summary.status,
            "cron-triggered automation finished"
        );
        Ok(())
    }
}

/// Register the four built-in jobs on their standard schedules.
pub fn register_builtin_jobs(
    scheduler: &Scheduler,
    model_sync: ModelSyncJob,
    chat_gc: EmptyChatGcJob,
    validation_expiry: ValidationExpiryJob,
    session_cleanup: SessionCleanupJob,
    validation_sweep_interval_secs: u64,
) {
    let sweep_minutes = (validation_sweep_interval_secs / 60).clamp(1, 59);
    scheduler.register("model_sync", parse_cron("0 0 * * *").expect("static cron"), Arc::new(model_sync));
    scheduler.register("empty_chat_gc", parse_cron("0 1 * * *").expect("static cron"), Arc::new(chat_gc));
    scheduler.register(
        "validation_expiry",
        parse_cron(&format!("*/{sweep_minutes} * * * *")).expect("static cron"),
        Arc::new(validation_expiry),
    );
    scheduler.register(
        "session_cleanup",
        parse_cron("0 * * * *").expect("static cron"),
        Arc::new(session_cleanup),
    );
}

/// Load persisted cron triggers and register each as
/// `automation_<aid>_trigger_<tid>`.  Invalid expressions are logged and
/// skipped; the health check flags them on the owning automation.
pub async fn register_automation_triggers(
    scheduler: &Scheduler,
    store: Arc<dyn AutomationStore>,
    executor: Arc<WorkflowExecutor>,
) -> Result<usize> {
    let triggers = store.list_cron_triggers().await?;
    let mut registered = 0;
    for trigger in triggers {
        let Some(expression) = trigger.config.get("cron_expression").and_then(Value::as_str)
        else {
            warn!(trigger_id = %trigger.id, "cron trigger without expression, skipped");
            continue;
        };
        let job_id = format!(
            "automation_{}_trigger_{}",
            trigger.automation_id, trigger.id
        );
        let job = Arc::new(AutomationTriggerJob {
            executor: executor.clone(),
            automation_id: trigger.automation_id.clone(),
            trigger_id: trigger.id.clone(),
        });
        match scheduler.register_expr(&job_id, expression, job) {
            Ok(()) => registered += 1,
            Err(e) => warn!(
                trigger_id = %trigger.id,
                expression,
                error = %e,
                "invalid cron trigger, skipped"
            ),
        }
    }
    info!(registered, "automation cron triggers loaded");
    Ok(registered)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
