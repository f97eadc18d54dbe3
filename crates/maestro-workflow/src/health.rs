//! Automation health scoring.
//!
//! Health feeds the dashboard and the auto-disable pass: an automation in
//! `error` that is still enabled gets switched off during enrichment rather
//! than burning scheduler slots on a workflow that cannot succeed.

use chrono::Utc;
use maestro_domain::{Automation, Execution, ExecutionStatus, Trigger, TriggerType, WorkflowStep};
use serde_json::Value;

use crate::parse_cron;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub should_disable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct AutomationStats {
    pub total_executions: usize,
    pub success_count: usize,
    pub failed_count: usize,
    /// Percentage with two decimals over the whole execution log.
    pub success_rate: f64,
}

/// Failure-rate window: only the most recent executions count.
const RECENT_WINDOW: usize = 10;
const ERROR_FAILURE_RATE: f64 = 0.8;
const WARNING_FAILURE_RATE: f64 = 0.5;
const STALE_DAYS: i64 = 30;

/// Score one automation.  `executions` must be most-recent-first, as the
/// store returns them.
pub fn evaluate_health(
    automation: &Automation,
    executions: &[Execution],
    triggers: &[Trigger],
    steps: &[WorkflowStep],
) -> HealthReport {
    let mut issues = Vec::new();
    let mut status = HealthStatus::Healthy;
    let mut should_disable = false;

    let mut raise = |status: &mut HealthStatus, to: HealthStatus| {
        if (*status == HealthStatus::Healthy) || (to == HealthStatus::Error) {
            *status = to;
        }
    };

    if !triggers.iter().any(|t| t.enabled) {
        issues.push("no active trigger".into());
        raise(&mut status, HealthStatus::Warning);
    }

    if steps.is_empty() {
        issues.push("no steps configured".into());
        raise(&mut status, HealthStatus::Error);
        should_disable = true;
    } else if steps.iter().all(|s| !s.enabled) {
        issues.push("all steps are disabled".into());
        raise(&mut status, HealthStatus::Error);
        should_disable = true;
    }

    if executions.len() >= RECENT_WINDOW {
        let recent = &executions[..RECENT_WINDOW];
        let failed = recent
            .iter()
            .filter(|e| e.status == ExecutionStatus::Failed)
            .count();
        let rate = failed as f64 / recent.len() as f64;
        if rate >= ERROR_FAILURE_RATE {
            issues.push(format!("high failure rate: {:.0}%", rate * 100.0));
            raise(&mut status, HealthStatus::Error);
            should_disable = true;
        } else if rate >= WARNING_FAILURE_RATE {
            issues.push(format!("elevated failure rate: {:.0}%", rate * 100.0));
            raise(&mut status, HealthStatus::Warning);
        }
    }

    if automation.enabled {
        if let Some(last) = executions.first() {
            let days_since = (Utc::now() - last.started_at).num_days();
            if days_since > STALE_DAYS {
                issues.push(format!("no execution for {days_since} days"));
                raise(&mut status, HealthStatus::Warning);
            }
        }
    }

    for trigger in triggers {
        if trigger.trigger_type != TriggerType::Cron || !trigger.enabled {
            continue;
        }
        match trigger.config.get("cron_expression").and_then(Value::as_str) {
            None => {
                issues.push("cron trigger without expression".into());
                raise(&mut status, HealthStatus::Error);
                should_disable = true;
            }
            Some(expr) => {
                if parse_cron(expr).is_err() {
                    issues.push(format!("invalid cron expression: {expr}"));
                    raise(&mut status, HealthStatus::Error);
                    should_disable = true;
                }
            }
        }
    }

    HealthReport {
        status,
        issues,
        should_disable,
    }
}

/// Aggregate execution statistics over the full log.
pub fn automation_stats(executions: &[Execution]) -> AutomationStats {
    let total = executions.len();
    let success_count = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Success)
        .count();
    let failed_count = executions
        .iter()
        .filter(|e| e.status == ExecutionStatus::Failed)
        .count();
    let success_rate = if total > 0 {
        (success_count as f64 / total as f64 * 10_000.0).round() / 100.0
    } else {
        0.0
    };
    AutomationStats {
        total_executions: total,
        success_count,
        failed_count,
        success_rate,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn automation() -> Automation {
        Automation {
            id: "auto_a1b2c3".into(),
            user_id: "usr_test01".into(),
            name: "daily brief".into(),
            description: String::new(),
            enabled: true,
            is_system: false,
        }
    }

    fn step(order: u32, enabled: bool) -> WorkflowStep {
        WorkflowStep {
            id: format!("step_{order:06}"),
            automation_id: "auto_a1b2c3".into(),
            order,
            subtype: maestro_domain::StepSubtype::Delay,
            config: json!({ "duration_ms": 1 }),
            enabled,
            continue_on_error: false,
        }
    }

    fn trigger(enabled: bool, config: Value) -> Trigger {
        Trigger {
            id: "trg_abc123".into(),
            automation_id: "auto_a1b2c3".into(),
            trigger_type: TriggerType::Cron,
            config,
            enabled,
        }
    }

    fn execution(status: ExecutionStatus, age_days: i64) -> Execution {
        Execution {
            id: "exec_abc123".into(),
            automation_id: "auto_a1b2c3".into(),
            trigger_id: None,
            status,
            started_at: Utc::now() - Duration::days(age_days),
            completed_at: None,
            failed_step: None,
        }
    }

    #[test]
    fn healthy_automation_reports_healthy() {
        let report = evaluate_health(
            &automation(),
            &[execution(ExecutionStatus::Success, 0)],
            &[trigger(true, json!({ "cron_expression": "0 9 * * *" }))],
            &[step(0, true)],
        );
        assert_eq!(report.status, HealthStatus::Healthy);
        assert!(report.issues.is_empty());
        assert!(!report.should_disable);
    }

    #[test]
    fn no_steps_is_an_error_and_disables() {
        let report = evaluate_health(&automation(), &[], &[trigger(true, json!({"cron_expression": "0 9 * * *"}))], &[]);
        assert_eq!(report.status, HealthStatus::Error);
        assert!(report.should_disable);
    }

    #[test]
    fn all_steps_disabled_is_an_error() {
        let report = evaluate_health(
            &automation(),
            &[],
            &[trigger(true, json!({"cron_expression": "0 9 * * *"}))],
            &[step(0, false), step(1, false)],
        );
        assert_eq!(report.status, HealthStatus::Error);
        assert!(report.should_disable);
    }

    #[test]
    fn eighty_percent_failures_over_window_disables() {
        let mut executions: Vec<Execution> = (0..8)
            .map(|_| execution(ExecutionStatus::Failed, 0))
            .collect();
        executions.extend((0..2).map(|_| execution(ExecutionStatus::Success, 0)));
        let report = evaluate_health(
            &automation(),
            &executions,
            &[trigger(true, json!({"cron_expression": "0 9 * * *"}))],
            &[step(0, true)],
        );
        assert_eq!(report.status, HealthStatus::Error);
        assert!(report.should_disable);
    }

    #[test]
    fn half_failures_is_only_a_warning() {
        let mut executions: Vec<Execution> = (0..5)
            .map(|_| execution(ExecutionStatus::Failed, 0))
            .collect();
        executions.extend((0..5).map(|_| execution(ExecutionStatus::Success, 0)));
        let report = evaluate_health(
            &automation(),
            &executions,
            &[trigger(true, json!({"cron_expression": "0 9 * * *"}))],
            &[step(0, true)],
        );
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(!report.should_disable);
    }

    #[test]
    fn fewer_than_ten_executions_never_trip_the_rate_check() {
        let executions: Vec<Execution> = (0..9)
            .map(|_| execution(ExecutionStatus::Failed, 0))
            .collect();
        let report = evaluate_health(
            &automation(),
            &executions,
            &[trigger(true, json!({"cron_expression": "0 9 * * *"}))],
            &[step(0, true)],
        );
        assert_ne!(report.status, HealthStatus::Error);
    }

    #[test]
    fn stale_last_execution_warns() {
        let report = evaluate_health(
            &automation(),
            &[execution(ExecutionStatus::Success, 45)],
            &[trigger(true, json!({"cron_expression": "0 9 * * *"}))],
            &[step(0, true)],
        );
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(report.issues.iter().any(|i| i.contains("45 days")));
    }

    #[test]
    fn invalid_cron_expression_is_an_error() {
        let report = evaluate_health(
            &automation(),
            &[],
            &[trigger(true, json!({ "cron_expression": "nonsense" }))],
            &[step(0, true)],
        );
        assert_eq!(report.status, HealthStatus::Error);
        assert!(report.should_disable);
    }

    #[test]
    fn missing_trigger_only_warns() {
        let report = evaluate_health(&automation(), &[], &[], &[step(0, true)]);
        assert_eq!(report.status, HealthStatus::Warning);
        assert!(report.issues.iter().any(|i| i.contains("trigger")));
    }

    #[test]
    fn stats_compute_success_rate() {
        let executions = vec![
            execution(ExecutionStatus::Success, 0),
            execution(ExecutionStatus::Success, 0),
            execution(ExecutionStatus::Failed, 0),
        ];
        let stats = automation_stats(&executions);
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.failed_count, 1);
        assert_eq!(stats.success_rate, 66.67);
    }

    #[test]
    fn stats_on_empty_log_are_zero() {
        let stats = automation_stats(&[]);
        assert_eq!(stats.total_executions, 0);
        assert_eq!(stats.success_rate, 0.0);
    }
}
