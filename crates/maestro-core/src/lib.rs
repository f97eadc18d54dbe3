//! Core orchestration: per-chat stream sessions with stop and validation
//! latches, the validation broker that gates every tool call on a human
//! decision, the turn context builder, and the orchestrator that drives the
//! LLM ↔ tool loop while emitting SSE.

mod broker;
mod context;
mod orchestrator;
mod rag;
mod session;
mod sse;

pub use broker::{ValidationBroker, ValidationPayload};
pub use context::{ContextBuilder, ToolRoute, TurnContext};
pub use orchestrator::{ChatOrchestrator, TurnContinuation};
pub use rag::{RagSearchTool, Retriever, SourceChunk};
pub use session::{SessionManager, StreamSession, ValidationOutcome};
pub use sse::{ChannelSink, EventSink, NullSink, SseEvent};
