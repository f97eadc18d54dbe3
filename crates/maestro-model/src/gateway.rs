use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use maestro_config::{RetrySettings, Settings};
use maestro_domain::{Error, ModelInfo, Result};
use tracing::warn;

use crate::anthropic::AnthropicAdapter;
use crate::breaker::CircuitBreaker;
use crate::openai::OpenAiAdapter;
use crate::provider::{ModelProvider, ResponseStream};
use crate::retry::retry_with_backoff;
use crate::types::{ChatRequest, ResponseEvent};

/// Routes requests by model name to a provider adapter, wrapping every
/// invocation with that provider's circuit breaker and the retry envelope.
pub struct Gateway {
    providers: HashMap<String, Arc<dyn ModelProvider>>,
    default_provider: String,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    retry: RetrySettings,
    breaker_failure_threshold: u32,
    breaker_recovery_timeout: Duration,
    breaker_success_threshold: u32,
}

impl Gateway {
    pub fn new(
        providers: Vec<Arc<dyn ModelProvider>>,
        default_provider: impl Into<String>,
        retry: RetrySettings,
        breaker_failure_threshold: u32,
        breaker_recovery_timeout: Duration,
        breaker_success_threshold: u32,
    ) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| (p.name().to_string(), p))
                .collect(),
            default_provider: default_provider.into(),
            breakers: Mutex::new(HashMap::new()),
            retry,
            breaker_failure_threshold,
            breaker_recovery_timeout,
            breaker_success_threshold,
        }
    }

    /// Wire the standard provider set from settings onto `client`.
    pub fn from_settings(settings: &Settings, client: reqwest::Client) -> Self {
        let providers: Vec<Arc<dyn ModelProvider>> = vec![
            Arc::new(AnthropicAdapter::new(
                settings.anthropic.api_key.clone(),
                settings.anthropic.base_url.clone(),
                client.clone(),
            )),
            Arc::new(OpenAiAdapter::new(
                settings.openai.api_key.clone(),
                settings.openai.base_url.clone(),
                client,
            )),
        ];
        Self::new(
            providers,
            settings.default_provider.clone(),
            settings.retry.clone(),
            settings.breaker_failure_threshold,
            Duration::from_secs(settings.breaker_recovery_timeout_secs),
            settings.breaker_success_threshold,
        )
    }

    /// Provider id a model name routes to.
    pub fn route(&self, model: &str) -> &str {
        let lower = model.to_ascii_lowercase();
        if lower.starts_with("claude") {
            "anthropic"
        } else if lower.starts_with("gpt")
            || lower.starts_with("o1")
            || lower.starts_with("o3")
            || lower.starts_with("o4")
            || lower.starts_with("chatgpt")
        {
            "openai"
        } else if lower.starts_with("mock") {
            "mock"
        } else {
            &self.default_provider
        }
    }

    fn provider_for(&self, model: &str) -> Result<Arc<dyn ModelProvider>> {
        let name = self.route(model);
        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Validation(format!("no provider configured for model {model}")))
    }

    fn breaker_for(&self, provider: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().expect("breaker map lock poisoned");
        breakers
            .entry(provider.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    provider,
                    self.breaker_failure_threshold,
                    self.breaker_recovery_timeout,
                    self.breaker_success_threshold,
                ))
            })
            .clone()
    }

    /// Open a streaming completion with tools, with breaker + retry applied
    /// to the connection attempt.
    pub async fn stream(&self, req: ChatRequest) -> Result<ResponseStream> {
        let provider = self.provider_for(&req.model)?;
        let breaker = self.breaker_for(provider.name());
        retry_with_backoff(&self.retry, "gateway.stream", || {
            let provider = provider.clone();
            let breaker = breaker.clone();
            let req = req.clone();
            async move { breaker.call(|| provider.stream(req)).await }
        })
        .await
    }

    /// Non-streaming completion: drive the stream to the end and return the
    /// concatenated text.  Used by workflow AI actions.
    pub async fn collect_text(&self, req: ChatRequest) -> Result<String> {
        let mut stream = self.stream(req).await?;
        let mut text = String::new();
        while let Some(event) = stream.next().await {
            match event? {
                ResponseEvent::TextDelta(delta) => text.push_str(&delta),
                ResponseEvent::Done { .. } => break,
                ResponseEvent::ToolCall { .. } => {}
            }
        }
        Ok(text)
    }

    /// List models, fanning out across configured providers.  A provider
    /// failure degrades to a warning rather than failing the whole listing.
    pub async fn list_models(&self, provider: Option<&str>) -> Result<Vec<ModelInfo>> {
        let mut out = Vec::new();
        for (name, p) in &self.providers {
            if let Some(filter) = provider {
                if filter != name {
                    continue;
                }
            }
            match p.list_models().await {
                Ok(mut models) => out.append(&mut models),
                Err(e) => warn!(provider = %name, error = %e, "model listing failed"),
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Provider ids currently registered.
    pub fn provider_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.providers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Rebuild HTTP-backed adapters onto the shared pooled client.  Called
    /// once after startup when the pool exists; adapters without an HTTP
    /// surface are left untouched.
    pub fn reinit_with_pooled_client(&mut self, client: reqwest::Client) {
        for provider in self.providers.values_mut() {
            if let Some(rebound) = provider.rebind_client(client.clone()) {
                *provider = rebound;
            }
        }
    }

    /// Snapshot all circuit breakers, for health reporting.
    pub fn circuit_snapshots(&self) -> Vec<crate::breaker::CircuitSnapshot> {
        self.breakers
            .lock()
            .expect("breaker map lock poisoned")
            .values()
            .map(|b| b.snapshot())
            .collect()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
