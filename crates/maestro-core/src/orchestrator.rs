//! The chat turn orchestrator.
//!
//! One entry point per user message: persist it, open the stream session,
//! build the turn context, then drive the LLM ↔ tool loop.  Text deltas
//! stream out as SSE; every tool call suspends the turn on a validation
//! rendezvous and resumes with the approved result, human feedback, or a
//! rejection.  Stop trips at the next suspension point, persisting whatever
//! text accumulated.  The background continuation after a disconnect is the
//! same loop with a discarding sink.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use maestro_domain::{Error, MessageRole, Result, Validation};
use maestro_model::{
    ChatRequest, CompletedToolCall, Gateway, Message, ResponseEvent, ToolCallAccumulator,
};
use maestro_store::{new_message, ChatStore};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use crate::broker::{ValidationBroker, ValidationPayload};
use crate::context::{ContextBuilder, ToolRoute, TurnContext};
use crate::rag::RagSearchTool;
use crate::session::{SessionManager, StreamSession, ValidationOutcome};
use crate::sse::{EventSink, NullSink, SseEvent};

/// Resumes a paused chat after its validation resolves without a live
/// client.  Implemented by the orchestrator; the broker calls through it.
#[async_trait]
pub trait TurnContinuation: Send + Sync {
    async fn resume(&self, validation: Validation, outcome: ValidationOutcome);
}

const REJECTION_TEXT: &str = "The requested tool call was not approved, so I stopped here.";

enum TurnEnd {
    Done,
    Stopped,
}

/// Mutable state of one turn, threaded through the loop so partial output
/// survives errors and stops.
struct TurnState {
    full_text: String,
    validation_ids: Vec<String>,
    turn_messages: Vec<Message>,
    history: Vec<Message>,
}

pub struct ChatOrchestrator {
    chats: Arc<dyn ChatStore>,
    context: ContextBuilder,
    gateway: Arc<Gateway>,
    sessions: Arc<SessionManager>,
    broker: Arc<ValidationBroker>,
}

impl ChatOrchestrator {
    pub fn new(
        chats: Arc<dyn ChatStore>,
        context: ContextBuilder,
        gateway: Arc<Gateway>,
        sessions: Arc<SessionManager>,
        broker: Arc<ValidationBroker>,
    ) -> Self {
        Self {
            chats,
            context,
            gateway,
            sessions,
            broker,
        }
    }

    /// Run one chat turn for a new user message.
    pub async fn run_turn(
        &self,
        chat_id: &str,
        user_id: &str,
        text: &str,
        sink: Arc<dyn EventSink>,
    ) -> Result<()> {
        let chat = self
            .chats
            .get_chat(chat_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("chat {chat_id} not found")))?;
        if chat.user_id != user_id {
            return Err(Error::Permission(
                "you do not have access to this chat".into(),
            ));
        }
        if chat.is_generating || self.sessions.is_stream_active(chat_id) {
            return Err(Error::conflict(format!(
                "chat {chat_id} is already generating a response"
            )));
        }

        self.chats
            .append_message(new_message(chat_id, MessageRole::User, text, None))
            .await?;
        let ctx = self.context.build(&chat).await?;

        let session = self.sessions.start_session(chat_id, user_id);
        session.reset_sources();
        self.chats.set_generating(chat_id, true).await?;

        let mut state = TurnState {
            full_text: String::new(),
            validation_ids: Vec::new(),
            turn_messages: Vec::new(),
            history: ctx.history.clone(),
        };

        let outcome = self
            .drive(&chat.model, &ctx, &session, sink.as_ref(), &mut state)
            .await;
        self.finalize(chat_id, &session, sink.as_ref(), state, outcome)
            .await
    }

    /// The LLM ↔ tool loop.  Suspension points: the adapter stream, the MCP
    /// call (inside the broker), and the validation latch.
    async fn drive(
        &self,
        model: &str,
        ctx: &TurnContext,
        session: &StreamSession,
        sink: &dyn EventSink,
        state: &mut TurnState,
    ) -> Result<TurnEnd> {
        loop {
            let mut messages = state.history.clone();
            messages.extend(state.turn_messages.iter().cloned());
            let request = ChatRequest {
                model: model.to_string(),
                system_prompt: Some(ctx.system_prompt.clone()),
                messages,
                tools: ctx.tools.clone(),
                max_tokens: None,
                temperature: None,
            };

            let mut stream = self.gateway.stream(request).await?;
            let mut accumulator = ToolCallAccumulator::new();

            loop {
                tokio::select! {
                    biased;
                    _ = session.stopped() => return Ok(TurnEnd::Stopped),
                    event = stream.next() => match event {
                        None => break,
                        Some(Err(e)) => return Err(e),
                        Some(Ok(ResponseEvent::TextDelta(delta))) => {
                            state.full_text.push_str(&delta);
                            sink.send(SseEvent::Chunk { content: delta });
                        }
                        Some(Ok(ResponseEvent::ToolCall { index, id, name, arguments })) => {
                            accumulator.push(index, id, name, arguments);
                        }
                        Some(Ok(ResponseEvent::Done { .. })) => break,
                    }
                }
            }

            let mut calls = accumulator.finish();
            if calls.is_empty() {
                return Ok(TurnEnd::Done);
            }
            // One tool call at a time per turn; a model that emitted several
            // gets the first one now and may re-issue the rest after the
            // result lands in its context.
            if calls.len() > 1 {
                warn!(
                    chat_id = %session.chat_id,
                    dropped = calls.len() - 1,
                    "model emitted parallel tool calls; processing the first"
                );
            }
            let call = calls.remove(0);

            match self.gate_tool_call(ctx, session, sink, state, call).await? {
                Some(TurnEnd::Stopped) => return Ok(TurnEnd::Stopped),
                Some(TurnEnd::Done) => return Ok(TurnEnd::Done),
                // Result absorbed: restart the adapter stream with the
                // updated conversation.
                None => continue,
            }
        }
    }

    /// Open a validation for a tool call and park on the session latch.
    /// `None` means: result absorbed, restart the adapter stream.
    async fn gate_tool_call(
        &self,
        ctx: &TurnContext,
        session: &StreamSession,
        sink: &dyn EventSink,
        state: &mut TurnState,
        call: CompletedToolCall,
    ) -> Result<Option<TurnEnd>> {
        // Unknown names fall through to the internal registry, which answers
        // with an error envelope — still behind the validation gate, so no
        // tool result ever reaches the model unapproved.
        let server_id = match ctx.routes.get(&call.name) {
            Some(ToolRoute::Server(id)) => Some(id.clone()),
            Some(ToolRoute::Internal) => None,
            None => {
                warn!(tool = %call.name, "tool call to unknown tool; routing to registry");
                None
            }
        };
        let mut arguments = call.arguments.clone();
        // The RAG tool searches the agent's attached resources unless the
        // model narrowed the set itself.
        if call.name == RagSearchTool::NAME && arguments.get("resource_ids").is_none() {
            arguments["resource_ids"] = json!(ctx.resource_ids);
        }
        let payload = ValidationPayload {
            tool_name: call.name.clone(),
            arguments,
            server_id,
        };
        let validation = self
            .broker
            .create(
                &session.user_id,
                "tool_call",
                &call.name,
                ctx.agent_id.as_deref(),
                Some(&session.chat_id),
                &payload,
            )
            .await?;
        session.set_pending_validation(Some(validation.id.clone()));
        sink.send(SseEvent::ValidationRequired {
            validation_id: validation.id.clone(),
        });
        info!(chat_id = %session.chat_id, validation_id = %validation.id, tool = %call.name,
              "turn suspended awaiting validation");

        let outcome = session.wait_validation().await;
        session.reset_validation();

        match outcome {
            None => Ok(Some(TurnEnd::Stopped)),
            Some(ValidationOutcome::Approved {
                validation_id,
                data,
            }) => {
                state.validation_ids.push(validation_id);
                self.capture_sources(session, sink, &call.name, &data);
                state
                    .turn_messages
                    .push(Message::tool_call(&call.id, &call.name, &call.arguments));
                state
                    .turn_messages
                    .push(Message::tool_result(&call.id, data.to_string()));
                Ok(None)
            }
            Some(ValidationOutcome::Feedback { feedback, .. }) => {
                self.chats
                    .append_message(new_message(
                        &session.chat_id,
                        MessageRole::User,
                        &feedback,
                        None,
                    ))
                    .await?;
                state.history.push(Message::user(feedback));
                Ok(None)
            }
            Some(ValidationOutcome::Rejected { .. })
            | Some(ValidationOutcome::Cancelled { .. }) => {
                if !state.full_text.is_empty() {
                    state.full_text.push('\n');
                }
                state.full_text.push_str(REJECTION_TEXT);
                sink.send(SseEvent::Chunk {
                    content: REJECTION_TEXT.to_string(),
                });
                Ok(Some(TurnEnd::Done))
            }
        }
    }

    /// RAG results feed the turn's source map and the `sources` SSE event.
    fn capture_sources(
        &self,
        session: &StreamSession,
        sink: &dyn EventSink,
        tool_name: &str,
        data: &Value,
    ) {
        if tool_name != RagSearchTool::NAME {
            return;
        }
        let Some(matches) = data["matches"].as_array() else {
            return;
        };
        for entry in matches {
            if let Some(resource_id) = entry["resource_id"].as_str() {
                session.record_source(resource_id, entry.clone());
            }
        }
        let resources: Vec<Value> = session.sources().into_values().collect();
        if !resources.is_empty() {
            sink.send(SseEvent::Sources {
                resources: Value::Array(resources),
            });
        }
    }

    /// Persist the turn's output and tear the session down, for every way a
    /// turn can end.
    async fn finalize(
        &self,
        chat_id: &str,
        session: &StreamSession,
        sink: &dyn EventSink,
        state: TurnState,
        outcome: Result<TurnEnd>,
    ) -> Result<()> {
        let result = match outcome {
            Ok(TurnEnd::Done) => {
                sink.send(SseEvent::Done);
                if !state.full_text.is_empty() || !state.validation_ids.is_empty() {
                    let metadata = self.turn_metadata(session, &state);
                    self.chats
                        .append_message(new_message(
                            chat_id,
                            MessageRole::Assistant,
                            state.full_text,
                            Some(metadata),
                        ))
                        .await?;
                }
                Ok(())
            }
            Ok(TurnEnd::Stopped) => {
                info!(chat_id, "turn stopped by user");
                sink.send(SseEvent::Stopped);
                if !state.full_text.is_empty() {
                    let metadata = self.turn_metadata(session, &state);
                    self.chats
                        .append_message(new_message(
                            chat_id,
                            MessageRole::Assistant,
                            state.full_text,
                            Some(metadata),
                        ))
                        .await?;
                }
                Ok(())
            }
            Err(e) => {
                error!(chat_id, error = %e, "turn failed");
                self.fail_turn(chat_id, sink, &state.full_text, &e).await;
                Err(e)
            }
        };

        if let Err(e) = self.chats.set_generating(chat_id, false).await {
            warn!(chat_id, error = %e, "failed to clear is_generating");
        }
        self.sessions.end_session(chat_id);
        result
    }

    fn turn_metadata(&self, session: &StreamSession, state: &TurnState) -> Value {
        let sources: Vec<Value> = session.sources().into_values().collect();
        json!({
            "validation_ids": state.validation_ids,
            "sources": sources,
        })
    }

    /// A stream that failed after emitting deltas still persists what it
    /// emitted, plus an error marker message.
    async fn fail_turn(&self, chat_id: &str, sink: &dyn EventSink, partial: &str, err: &Error) {
        sink.send(SseEvent::Error {
            message: err.to_string(),
        });
        let content = if partial.is_empty() {
            format!("Generation failed: {err}")
        } else {
            format!("{partial}\n\nGeneration failed: {err}")
        };
        let persist = self
            .chats
            .append_message(new_message(
                chat_id,
                MessageRole::Assistant,
                content,
                Some(json!({ "error": true })),
            ))
            .await;
        if let Err(e) = persist {
            error!(chat_id, error = %e, "failed to persist error message");
        }
    }
}

#[async_trait]
impl TurnContinuation for ChatOrchestrator {
    /// Resume a paused chat whose validation resolved after the client went
    /// away.  Same loop, discarding sink; the approved tool exchange seeds
    /// the turn and the final assistant message lands in persistence.
    async fn resume(&self, validation: Validation, outcome: ValidationOutcome) {
        let ValidationOutcome::Approved {
            validation_id,
            data,
        } = outcome
        else {
            return;
        };
        let Some(chat_id) = validation.chat_id.clone() else {
            return;
        };
        let chat = match self.chats.get_chat(&chat_id).await {
            Ok(Some(chat)) => chat,
            Ok(None) => {
                warn!(chat_id, "cannot resume: chat is gone");
                return;
            }
            Err(e) => {
                warn!(chat_id, error = %e, "cannot resume: chat lookup failed");
                return;
            }
        };
        let Ok(payload) = ValidationPayload::from_value(&validation.payload) else {
            warn!(chat_id, "cannot resume: malformed validation payload");
            return;
        };

        info!(chat_id, validation_id, "resuming turn in the background");
        let session = self.sessions.start_session(&chat_id, &chat.user_id);
        if let Err(e) = self.chats.set_generating(&chat_id, true).await {
            warn!(chat_id, error = %e, "failed to mark chat generating");
        }

        let sink = NullSink;
        let ctx = match self.context.build(&chat).await {
            Ok(ctx) => ctx,
            Err(e) => {
                self.fail_turn(&chat_id, &sink, "", &e).await;
                let _ = self.chats.set_generating(&chat_id, false).await;
                self.sessions.end_session(&chat_id);
                return;
            }
        };

        // Seed the approved exchange; the validation id doubles as the tool
        // call id, which satisfies provider id constraints.
        let mut state = TurnState {
            full_text: String::new(),
            validation_ids: vec![validation_id.clone()],
            turn_messages: vec![
                Message::tool_call(&validation_id, &payload.tool_name, &payload.arguments),
                Message::tool_result(&validation_id, data.to_string()),
            ],
            history: ctx.history.clone(),
        };

        let outcome = self
            .drive(&chat.model, &ctx, &session, &sink, &mut state)
            .await;
        if let Err(e) = self.finalize(&chat_id, &session, &sink, state, outcome).await {
            warn!(chat_id, error = %e, "background continuation failed");
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
