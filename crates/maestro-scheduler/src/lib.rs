//! The process-wide scheduler.
//!
//! One tokio task per registered job id computes the next fire time from the
//! cron schedule, sleeps, runs the job, and repeats.  Runs of the same job
//! id never overlap — the loop awaits each run inline — and re-registering
//! an id replaces the old task, so automation triggers can be updated live.

mod jobs;

pub use jobs::{
    register_automation_triggers, register_builtin_jobs, AutomationTriggerJob, EmptyChatGcJob,
    ModelSyncJob, SessionCleanupJob, ValidationExpiryJob,
};

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::Utc;
use maestro_domain::Result;
use maestro_workflow::parse_cron;
use tracing::{debug, error, info, warn};

/// A schedulable unit of work.  Jobs are idempotent: a missed or doubled
/// tick must not corrupt anything.
#[async_trait]
pub trait Job: Send + Sync {
    fn name(&self) -> &str;
    async fn run(&self) -> Result<()>;
}

pub struct Scheduler {
    tasks: StdMutex<HashMap<String, tokio::task::JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            tasks: StdMutex::new(HashMap::new()),
        }
    }

    /// Register a job under `job_id`, replacing any existing registration.
    pub fn register(&self, job_id: &str, schedule: cron::Schedule, job: Arc<dyn Job>) {
        self.unregister(job_id);
        let id = job_id.to_string();
        let handle = tokio::spawn(run_loop(id.clone(), schedule, job));
        self.tasks
            .lock()
            .expect("scheduler lock poisoned")
            .insert(id.clone(), handle);
        info!(job_id = %id, "job registered");
    }

    /// Parse a 5-field POSIX cron expression and register.
    pub fn register_expr(&self, job_id: &str, expression: &str, job: Arc<dyn Job>) -> Result<()> {
        let schedule = parse_cron(expression)?;
        self.register(job_id, schedule, job);
        Ok(())
    }

    /// Remove a job.  Returns false when the id was not registered.
    pub fn unregister(&self, job_id: &str) -> bool {
        let removed = self
            .tasks
            .lock()
            .expect("scheduler lock poisoned")
            .remove(job_id);
        match removed {
            Some(handle) => {
                handle.abort();
                info!(job_id, "job unregistered");
                true
            }
            None => false,
        }
    }

    pub fn job_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .lock()
            .expect("scheduler lock poisoned")
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Abort every job task.  Called once at shutdown.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        for (job_id, handle) in tasks.drain() {
            handle.abort();
            debug!(job_id, "job task aborted");
        }
        info!("scheduler shut down");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        for (_, handle) in self
            .tasks
            .lock()
            .expect("scheduler lock poisoned")
            .drain()
        {
            handle.abort();
        }
    }
}

async fn run_loop(job_id: String, schedule: cron::Schedule, job: Arc<dyn Job>) {
    loop {
        let Some(next) = schedule.upcoming(Utc).next() else {
            warn!(job_id, "schedule has no upcoming fire time; job loop ends");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;

        debug!(job_id, job = job.name(), "job firing");
        if let Err(e) = job.run().await {
            error!(job_id, job = job.name(), error = %e, "job run failed");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
