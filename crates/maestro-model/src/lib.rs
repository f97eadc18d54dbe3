//! LLM layer: provider adapters that normalise streaming wire formats into a
//! single event stream, and the gateway that routes by model name inside a
//! retry + circuit-breaker envelope.

mod anthropic;
mod breaker;
mod gateway;
mod mock;
mod openai;
mod provider;
mod retry;
mod types;

pub use anthropic::AnthropicAdapter;
pub use breaker::{CircuitBreaker, CircuitSnapshot, CircuitState};
pub use gateway::Gateway;
pub use mock::ScriptedMockAdapter;
pub use openai::OpenAiAdapter;
pub use provider::{ModelProvider, ResponseStream};
pub use retry::retry_with_backoff;
pub use types::{
    ChatRequest, CompletedToolCall, Message, MessageContent, ResponseEvent, Role, ToolCallAccumulator,
    ToolSchema,
};
