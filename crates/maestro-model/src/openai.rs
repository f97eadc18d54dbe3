use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use maestro_domain::{Error, ModelInfo, Result};
use serde_json::{json, Value};
use tracing::debug;

use crate::provider::{error_for_response, retry_after_secs, ModelProvider, ResponseStream};
use crate::types::{ChatRequest, Message, MessageContent, ResponseEvent, Role};

/// Adapter for OpenAI and OpenAI-compatible `/chat/completions` servers.
///
/// The system prompt travels in-band as the first message; tool calls stream
/// as indexed `tool_calls` deltas and the stream ends with a `[DONE]`
/// sentinel line.
pub struct OpenAiAdapter {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

impl OpenAiAdapter {
    pub fn new(api_key: Option<String>, base_url: Option<String>, client: reqwest::Client) -> Self {
        Self {
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.into())
                .trim_end_matches('/')
                .to_string(),
            client,
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| Error::Authentication("openai API key not configured".into()))
    }
}

#[async_trait]
impl ModelProvider for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let key = self.key()?;
        let resp = self
            .client
            .get(format!("{}/models", self.base_url))
            .bearer_auth(key)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("openai model list failed: {e}")))?;
        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = retry_after_secs(&resp);
            let body = resp.text().await.unwrap_or_default();
            return Err(error_for_response("openai", status, retry_after, body));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::Transient(format!("openai model list decode failed: {e}")))?;
        let mut models: Vec<ModelInfo> = body["data"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|item| {
                let id = item["id"].as_str()?.to_string();
                Some(ModelInfo {
                    display_name: id.clone(),
                    id,
                    provider: "openai".into(),
                })
            })
            .collect();
        models.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(models)
    }

    async fn stream(&self, req: ChatRequest) -> Result<ResponseStream> {
        let key = self.key()?;
        let messages = build_openai_messages(req.system_prompt.as_deref(), &req.messages);

        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(mt) = req.max_tokens {
            body["max_completion_tokens"] = json!(mt);
        }
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if !req.tools.is_empty() {
            let tools: Vec<Value> = req
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": t.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = json!(tools);
        }

        debug!(model = %req.model, tool_count = req.tools.len(), "sending openai request");

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("openai request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let retry_after = retry_after_secs(&resp);
            let text = resp.text().await.unwrap_or_default();
            return Err(error_for_response("openai", status, retry_after, text));
        }

        let byte_stream = resp.bytes_stream();
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<Result<ResponseEvent>> = match chunk {
                    Ok(bytes) => {
                        buf.push_str(&String::from_utf8_lossy(&bytes));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(Error::Transient(format!("openai stream error: {e}")))],
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

/// Drain all complete `\n`-terminated SSE lines from `buf`, leaving any
/// incomplete tail for the next chunk.
fn drain_complete_sse_lines(buf: &mut String) -> Vec<Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(pos) = buf.find('\n') {
        let line = buf[..pos].trim_end_matches('\r').to_string();
        *buf = buf[pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(Ok(ev));
        }
    }
    events
}

fn parse_sse_data_line(line: &str) -> Option<ResponseEvent> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(ResponseEvent::Done {
            finish_reason: None,
        });
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_sse_chunk(&v)
}

fn parse_sse_chunk(v: &Value) -> Option<ResponseEvent> {
    let choice = &v["choices"][0];
    let delta = &choice["delta"];

    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return Some(ResponseEvent::ToolCall {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
        });
    }

    if let Some(reason) = choice["finish_reason"].as_str() {
        // The [DONE] sentinel still follows; surface the reason now so the
        // consumer learns `tool_calls` vs `stop` as soon as it is known.
        return Some(ResponseEvent::Done {
            finish_reason: Some(reason.to_string()),
        });
    }

    let text = delta.get("content").and_then(|c| c.as_str())?;
    (!text.is_empty()).then(|| ResponseEvent::TextDelta(text.to_string()))
}

/// Convert neutral messages to the OpenAI wire format, prepending the system
/// prompt when present.
fn build_openai_messages(system_prompt: Option<&str>, messages: &[Message]) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(messages.len() + 1);
    if let Some(system) = system_prompt {
        if !system.is_empty() {
            out.push(json!({ "role": "system", "content": system }));
        }
    }
    for m in messages {
        match &m.content {
            MessageContent::Text(t) => {
                let role = match m.role {
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                };
                out.push(json!({ "role": role, "content": t }));
            }
            MessageContent::ToolCall {
                tool_call_id,
                name,
                arguments,
            } => {
                out.push(json!({
                    "role": "assistant",
                    "tool_calls": [{
                        "id": tool_call_id,
                        "type": "function",
                        "function": { "name": name, "arguments": arguments },
                    }]
                }));
            }
            MessageContent::ToolResult {
                tool_call_id,
                content,
            } => {
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_call_id,
                    "content": content,
                }));
            }
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
