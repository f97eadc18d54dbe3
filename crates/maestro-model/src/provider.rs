use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use maestro_domain::{Error, ModelInfo, Result};

use crate::types::{ChatRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseEvent>> + Send>>;

/// One provider family (Anthropic, OpenAI-compatible, mock).
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Stable provider id used for routing and circuit breakers.
    fn name(&self) -> &str;

    /// Models currently advertised by this provider.
    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Open a streaming completion.  The returned stream yields normalised
    /// [`ResponseEvent`]s and ends after `Done`.
    async fn stream(&self, req: ChatRequest) -> Result<ResponseStream>;

    /// Rebuild this adapter on a different HTTP client (the shared pool).
    /// Adapters without an HTTP surface return `None`.
    fn rebind_client(&self, _client: reqwest::Client) -> Option<std::sync::Arc<dyn ModelProvider>> {
        None
    }
}

/// Map a non-success provider response onto the error taxonomy.
///
/// 401/403 are authentication problems, 429 is a rate limit (carrying the
/// server's Retry-After when present), and 5xx is transient so the gateway's
/// retry envelope picks it up.  Anything else is a validation error — bad
/// request shape, unknown model, oversized context.
pub(crate) fn error_for_response(
    provider: &str,
    status: reqwest::StatusCode,
    retry_after: Option<u64>,
    body: String,
) -> Error {
    let detail = format!("{provider} error {status}: {body}");
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        Error::RateLimit {
            message: detail,
            retry_after,
        }
    } else if status == reqwest::StatusCode::UNAUTHORIZED
        || status == reqwest::StatusCode::FORBIDDEN
    {
        Error::Authentication(detail)
    } else if status.is_server_error() {
        Error::Transient(detail)
    } else {
        Error::Validation(detail)
    }
}

/// Extract `Retry-After` seconds from a response, when present and numeric.
pub(crate) fn retry_after_secs(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
