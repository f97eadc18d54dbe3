use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A single message in the conversation sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::Text(text.into()),
        }
    }

    /// Assistant message recording a tool invocation request.
    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, arguments: &Value) -> Self {
        Self {
            role: Role::Assistant,
            content: MessageContent::ToolCall {
                tool_call_id: id.into(),
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }

    pub fn tool_result(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: MessageContent::ToolResult {
                tool_call_id: id.into(),
                content: content.into(),
            },
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(t) => Some(t),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    ToolCall {
        tool_call_id: String,
        name: String,
        /// JSON-encoded argument object.
        arguments: String,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

/// A tool schema advertised to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: Value,
}

/// Request handed to an adapter.  The system prompt is carried separately
/// because providers disagree about where it belongs on the wire.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// One normalised event from a provider stream.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    TextDelta(String),
    /// A tool-call fragment.  `arguments` may arrive across many deltas for
    /// the same `index`; id and name are present on the first fragment.
    ToolCall {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// The stream finished normally.
    Done { finish_reason: Option<String> },
}

/// A tool call with fully assembled arguments, ready to dispatch.
#[derive(Debug, Clone)]
pub struct CompletedToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// Accumulates [`ResponseEvent::ToolCall`] fragments keyed by the provider's
/// parallel-tool-call index, and assembles completed calls once the stream
/// segment ends.  A call only surfaces when its argument JSON is complete.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    pending: HashMap<u32, PendingToolCall>,
}

#[derive(Debug, Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, index: u32, id: String, name: String, arguments: String) {
        let slot = self.pending.entry(index).or_default();
        if !id.is_empty() {
            slot.id = id;
        }
        if !name.is_empty() {
            slot.name = name;
        }
        slot.args_buf.push_str(&arguments);
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drain accumulated fragments into completed calls, ordered by index.
    ///
    /// Calls with an empty name cannot be dispatched and are dropped; an
    /// empty id gets a synthetic fallback so the conversation history stays
    /// well-formed.  Unparseable argument JSON degrades to `{}`.
    pub fn finish(self) -> Vec<CompletedToolCall> {
        let mut sorted: Vec<(u32, PendingToolCall)> = self.pending.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);

        let mut out = Vec::with_capacity(sorted.len());
        for (i, (_, pending)) in sorted.into_iter().enumerate() {
            if pending.name.is_empty() {
                warn!(tool_call_id = %pending.id, "dropping tool call with empty name");
                continue;
            }
            let arguments = if pending.args_buf.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                match serde_json::from_str(&pending.args_buf) {
                    Ok(v) => v,
                    Err(e) => {
                        warn!(
                            tool_name = %pending.name,
                            error = %e,
                            "tool call arguments are not valid JSON; substituting {{}}"
                        );
                        Value::Object(Default::default())
                    }
                }
            };
            let id = if pending.id.is_empty() {
                format!("tc_synthetic_{i}")
            } else {
                pending.id
            };
            out.push(CompletedToolCall {
                id,
                name: pending.name,
                arguments,
            });
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
