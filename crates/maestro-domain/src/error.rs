use serde::Serialize;
use serde_json::Value;

pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy.  Errors are tagged by kind, not by the type that produced
/// them; the kind alone decides HTTP mapping and retry behaviour.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Permission(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{message}")]
    Conflict {
        message: String,
        /// Present when a cascading delete needs confirmation; describes what
        /// would be destroyed.
        impact: Option<Value>,
    },

    #[error("{0}")]
    Quota(String),

    #[error("{message}")]
    RateLimit {
        message: String,
        /// Server-provided Retry-After, seconds.
        retry_after: Option<u64>,
    },

    #[error("{0}")]
    Transient(String),

    #[error("provider {provider} is temporarily unavailable; retry in {retry_in}s")]
    CircuitOpen { provider: String, retry_in: u64 },

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Authentication,
    Permission,
    NotFound,
    Conflict,
    Quota,
    RateLimit,
    Transient,
    CircuitOpen,
    ToolExecution,
    Internal,
}

impl Error {
    pub fn conflict(message: impl Into<String>) -> Self {
        Error::Conflict {
            message: message.into(),
            impact: None,
        }
    }

    /// Per-user creation quota check, used by every `create` path.
    /// Admins are exempt at the call site.
    pub fn check_quota(what: &str, current: usize, max: usize) -> Result<()> {
        if current >= max {
            return Err(Error::Quota(format!(
                "{what} quota exceeded: maximum {max} allowed, you have {current}"
            )));
        }
        Ok(())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) => ErrorKind::Validation,
            Error::Authentication(_) => ErrorKind::Authentication,
            Error::Permission(_) => ErrorKind::Permission,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Conflict { .. } => ErrorKind::Conflict,
            Error::Quota(_) => ErrorKind::Quota,
            Error::RateLimit { .. } => ErrorKind::RateLimit,
            Error::Transient(_) => ErrorKind::Transient,
            Error::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Error::ToolExecution(_) => ErrorKind::ToolExecution,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for errors the gateway may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::RateLimit)
    }

    /// HTTP status this error maps to at the API boundary.
    pub fn status(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            ErrorKind::Authentication => 401,
            ErrorKind::Permission => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Quota | ErrorKind::RateLimit => 429,
            ErrorKind::Transient => 503,
            ErrorKind::CircuitOpen => 503,
            ErrorKind::ToolExecution | ErrorKind::Internal => 500,
        }
    }

    /// RFC 7807 problem-details body for this error.
    pub fn to_problem(&self) -> Problem {
        let (type_tag, title) = match self.kind() {
            ErrorKind::Validation => ("validation_error", "Invalid input"),
            ErrorKind::Authentication => ("authentication_error", "Authentication required"),
            ErrorKind::Permission => ("permission_denied", "Permission denied"),
            ErrorKind::NotFound => ("not_found", "Resource not found"),
            ErrorKind::Conflict => match self {
                Error::Conflict { impact: Some(_), .. } => {
                    ("confirmation_required", "Confirmation required")
                }
                _ => ("conflict", "Conflict"),
            },
            ErrorKind::Quota => ("quota_exceeded", "Quota exceeded"),
            ErrorKind::RateLimit => ("rate_limited", "Rate limited"),
            ErrorKind::Transient => ("service_unavailable", "Service unavailable"),
            ErrorKind::CircuitOpen => ("circuit_open", "Provider unavailable"),
            ErrorKind::ToolExecution => ("tool_execution_error", "Tool execution failed"),
            ErrorKind::Internal => ("internal_error", "Internal error"),
        };
        let mut problem = Problem {
            r#type: type_tag.to_string(),
            title: title.to_string(),
            status: self.status(),
            detail: self.to_string(),
            impact: None,
            retry_after: None,
        };
        match self {
            Error::Conflict { impact, .. } => problem.impact = impact.clone(),
            Error::RateLimit { retry_after, .. } => problem.retry_after = *retry_after,
            Error::CircuitOpen { retry_in, .. } => problem.retry_after = Some(*retry_in),
            _ => {}
        }
        problem
    }
}

/// RFC 7807 problem details with maestro extensions.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub impact: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_mapping_follows_the_taxonomy() {
        assert_eq!(Error::Validation("x".into()).status(), 400);
        assert_eq!(Error::Authentication("x".into()).status(), 401);
        assert_eq!(Error::Permission("x".into()).status(), 403);
        assert_eq!(Error::NotFound("x".into()).status(), 404);
        assert_eq!(Error::conflict("x").status(), 409);
        assert_eq!(Error::Quota("x".into()).status(), 429);
        assert_eq!(
            Error::CircuitOpen {
                provider: "p".into(),
                retry_in: 3
            }
            .status(),
            503
        );
    }

    #[test]
    fn quota_check_rejects_at_the_limit() {
        assert!(Error::check_quota("agent", 99, 100).is_ok());
        let err = Error::check_quota("agent", 100, 100).unwrap_err();
        assert_eq!(err.status(), 429);
        assert!(err.to_string().contains("agent quota exceeded"));
    }

    #[test]
    fn only_transient_and_rate_limit_are_retryable() {
        assert!(Error::Transient("x".into()).is_retryable());
        assert!(Error::RateLimit {
            message: "x".into(),
            retry_after: None
        }
        .is_retryable());
        assert!(!Error::Validation("x".into()).is_retryable());
        assert!(!Error::CircuitOpen {
            provider: "p".into(),
            retry_in: 1
        }
        .is_retryable());
    }

    #[test]
    fn cascade_conflict_becomes_confirmation_required() {
        let err = Error::Conflict {
            message: "agent has 3 chats".into(),
            impact: Some(json!({ "chats": 3 })),
        };
        let p = err.to_problem();
        assert_eq!(p.r#type, "confirmation_required");
        assert_eq!(p.status, 409);
        assert_eq!(p.impact.unwrap()["chats"], 3);
    }

    #[test]
    fn plain_conflict_keeps_conflict_type() {
        let p = Error::conflict("name taken").to_problem();
        assert_eq!(p.r#type, "conflict");
        assert!(p.impact.is_none());
    }

    #[test]
    fn circuit_open_carries_retry_hint() {
        let p = Error::CircuitOpen {
            provider: "anthropic".into(),
            retry_in: 42,
        }
        .to_problem();
        assert_eq!(p.retry_after, Some(42));
        assert!(p.detail.contains("42"));
    }

    #[test]
    fn problem_serializes_without_empty_extensions() {
        let p = Error::NotFound("chat not found".into()).to_problem();
        let v = serde_json::to_value(&p).unwrap();
        assert!(v.get("impact").is_none());
        assert!(v.get("retry_after").is_none());
        assert_eq!(v["status"], 404);
    }
}
