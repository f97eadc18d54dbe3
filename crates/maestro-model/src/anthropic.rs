use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use maestro_domain::{Error, ModelInfo, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::provider::{error_for_response, retry_after_secs, ModelProvider, ResponseStream};
use crate::types::{ChatRequest, Message, MessageContent, ResponseEvent, Role};

/// Adapter for the Anthropic Messages API.
///
/// Anthropic expects the system prompt as a top-level `system` field, tool
/// calls as `tool_use` content blocks, and tool results as `tool_result`
/// blocks inside a user message.  Streaming arrives as SSE
/// `content_block_*` / `message_*` events.
pub struct AnthropicAdapter {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

impl AnthropicAdapter {
    pub fn new(api_key: Option<String>, base_url: Option<String>, client: reqwest::Client) -> Self {
        Self {
            api_key,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.into()),
            client,
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| Error::Authentication("anthropic API key not configured".into()))
    }
}

#[async_trait]
impl ModelProvider for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let key = self.key()?;
        let resp = self
            .client
            .get(format!("{}/v1/models", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("anthropic model list failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = retry_after_secs(&resp);
            let body = resp.text().await.unwrap_or_default();
            return Err(error_for_response("anthropic", status, retry_after, body));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::Transient(format!("anthropic model list decode failed: {e}")))?;
        let mut models: Vec<ModelInfo> = body["data"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| {
                let id = item["id"].as_str()?.to_string();
                Some(ModelInfo {
                    display_name: item["display_name"].as_str().unwrap_or(&id).to_string(),
                    id,
                    provider: "anthropic".into(),
                })
            })
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    async fn stream(&self, req: ChatRequest) -> Result<ResponseStream> {
        let key = self.key()?;
        let messages = build_anthropic_messages(&req.messages);

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(4096),
            "stream": true,
        });
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(system) = &req.system_prompt {
            if !system.is_empty() {
                body["system"] = json!(system);
            }
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t.description,
                        "input_schema": t.parameters,
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        debug!(model = %req.model, tool_count = req.tools.len(), "sending anthropic request");

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("anthropic request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = retry_after_secs(&resp);
            let text = resp.text().await.unwrap_or_default();
            return Err(error_for_response("anthropic", status, retry_after, text));
        }

        // SSE lines can be split across TCP chunks; carry the incomplete tail
        // forward and only parse whole lines.
        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<Result<ResponseEvent>> = match chunk {
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        let mut out = Vec::new();
                        while let Some(pos) = buf.find('\n') {
                            let line = buf[..pos].trim_end_matches('\r').to_string();
                            buf.drain(..=pos);
                            if let Some(data) = line.strip_prefix("data: ") {
                                if let Ok(v) = serde_json::from_str::<Value>(data.trim()) {
                                    out.extend(parse_anthropic_event(&v).map(Ok));
                                }
                            }
                        }
                        out
                    }
                    Err(e) => vec![Err(Error::Transient(format!("anthropic stream error: {e}")))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }

    fn rebind_client(&self, client: reqwest::Client) -> Option<Arc<dyn ModelProvider>> {
        Some(Arc::new(Self {
            api_key: self.api_key.clone(),
            base_url: self.base_url.clone(),
            client,
        }))
    }
}

/// Translate one SSE payload into at most one [`ResponseEvent`].
fn parse_anthropic_event(v: &Value) -> Option<ResponseEvent> {
    match v["type"].as_str().unwrap_or("") {
        "content_block_start" => {
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                Some(ResponseEvent::ToolCall {
                    index: v["index"].as_u64().unwrap_or(0) as u32,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                    arguments: String::new(),
                })
            } else {
                None
            }
        }
        "content_block_delta" => {
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("");
                    (!text.is_empty()).then(|| ResponseEvent::TextDelta(text.to_string()))
                }
                "input_json_delta" => Some(ResponseEvent::ToolCall {
                    index: v["index"].as_u64().unwrap_or(0) as u32,
                    id: String::new(),
                    name: String::new(),
                    arguments: delta["partial_json"].as_str().unwrap_or("").to_string(),
                }),
                _ => None,
            }
        }
        "message_delta" => {
            // Final stop_reason arrives here; surface it with Done so the
            // orchestrator can distinguish `tool_use` from `end_turn`.
            v["delta"]["stop_reason"].as_str().map(|reason| ResponseEvent::Done {
                finish_reason: Some(reason.to_string()),
            })
        }
        "message_stop" => Some(ResponseEvent::Done {
            finish_reason: None,
        }),
        _ => None,
    }
}

/// Convert neutral messages to the Anthropic wire format.
fn build_anthropic_messages(messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len());
    for m in messages {
        let role = match m.role {
            Role::User | Role::Tool => "user",
            Role::Assistant => "assistant",
        };
        match &m.content {
            MessageContent::Text(t) => {
                out.push(json!({ "role": role, "content": t }));
            }
            MessageContent::ToolCall {
                tool_call_id,
                name,
                arguments,
            } => {
                out.push(json!({
                    "role": "assistant",
                    "content": [{
                        "type": "tool_use",
                        "id": tool_call_id,
                        "name": name,
                        "input": serde_json::from_str::<Value>(arguments).unwrap_or(json!({})),
                    }]
                }));
            }
            MessageContent::ToolResult {
                tool_call_id,
                content,
            } => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": tool_call_id,
                        "content": content,
                    }]
                }));
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
