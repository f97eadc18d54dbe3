//! Workflow engine: `{{path}}` templates, a whitelist-only boolean
//! expression evaluator, the step executor behind automations, and the
//! trigger plumbing (cron expressions, webhook secrets, health scoring).

mod executor;
mod expr;
mod health;
mod run_tool;
mod template;
mod webhook;

pub use executor::{ExecutionSummary, WorkflowExecutor};
pub use run_tool::RunAutomationTool;
pub use expr::{evaluate_condition, evaluate_expression};
pub use health::{
    automation_stats, evaluate_health, AutomationStats, HealthReport, HealthStatus,
};
pub use template::{get_nested_value, resolve_all, resolve_template};
pub use webhook::{hash_webhook_secret, verify_webhook_secret};

use maestro_domain::{Error, Result};
use std::str::FromStr;

/// Parse a 5-field POSIX cron expression.
///
/// The `cron` crate wants a seconds field, so `M H DoM Mon DoW` input gets a
/// `0` prepended; expressions that already carry six or seven fields pass
/// through unchanged.
pub fn parse_cron(expression: &str) -> Result<cron::Schedule> {
    let trimmed = expression.trim();
    let field_count = trimmed.split_whitespace().count();
    let normalized = if field_count == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    };
    cron::Schedule::from_str(&normalized)
        .map_err(|e| Error::Validation(format!("invalid cron expression '{expression}': {e}")))
}

#[cfg(test)]
mod cron_tests {
    use super::*;

    #[test]
    fn five_field_posix_form_is_accepted() {
        assert!(parse_cron("0 9 * * 1-5").is_ok());
        assert!(parse_cron("*/15 * * * *").is_ok());
    }

    #[test]
    fn six_field_form_passes_through() {
        assert!(parse_cron("30 0 9 * * Mon").is_ok());
    }

    #[test]
    fn garbage_is_a_validation_error() {
        let err = parse_cron("every tuesday at noon").unwrap_err();
        assert_eq!(err.status(), 400);
        assert!(err.to_string().contains("every tuesday"));
    }

    #[test]
    fn next_fire_time_is_computable() {
        let schedule = parse_cron("0 0 * * *").unwrap();
        assert!(schedule.upcoming(chrono::Utc).next().is_some());
    }
}
