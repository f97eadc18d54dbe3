//! Server-Sent Events encoding and the sink seam.
//!
//! Each event is `event: <type>\ndata: <json>\n\n`.  The orchestrator writes
//! to an [`EventSink`]; the HTTP layer hands it a channel-backed sink, and
//! the background continuation after a disconnect uses [`NullSink`] — same
//! turn logic, emissions dropped.

use serde_json::{json, Value};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Chunk { content: String },
    Sources { resources: Value },
    ValidationRequired { validation_id: String },
    Stopped,
    Error { message: String },
    Done,
}

impl SseEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            SseEvent::Chunk { .. } => "chunk",
            SseEvent::Sources { .. } => "sources",
            SseEvent::ValidationRequired { .. } => "validation_required",
            SseEvent::Stopped => "stopped",
            SseEvent::Error { .. } => "error",
            SseEvent::Done => "done",
        }
    }

    fn data(&self) -> Value {
        match self {
            SseEvent::Chunk { content } => json!({ "content": content }),
            SseEvent::Sources { resources } => json!({ "resources": resources }),
            SseEvent::ValidationRequired { validation_id } => {
                json!({ "validation_id": validation_id })
            }
            SseEvent::Stopped | SseEvent::Done => json!({}),
            SseEvent::Error { message } => json!({ "message": message }),
        }
    }

    /// Wire encoding, double newline terminated.
    pub fn encode(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event_type(), self.data())
    }
}

/// Where a turn's events go.  Sends never fail: a gone client must not abort
/// the turn (the session-survival rules decide that).
pub trait EventSink: Send + Sync {
    fn send(&self, event: SseEvent);
}

/// Forwards encoded events into an unbounded channel, typically drained by
/// an HTTP response body.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn send(&self, event: SseEvent) {
        let _ = self.tx.send(event.encode());
    }
}

/// Swallows everything.  Used by background continuations.
pub struct NullSink;

impl EventSink for NullSink {
    fn send(&self, _event: SseEvent) {}
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
