use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream;
use maestro_domain::{Error, ModelInfo, Result};

use crate::provider::{ModelProvider, ResponseStream};
use crate::types::{ChatRequest, ResponseEvent};

/// A pre-scripted adapter for tests.  Each `stream` call pops the next event
/// script from the front of the queue, so a test can drive a whole tool loop
/// — tool call round, then the post-result round — without network access.
pub struct ScriptedMockAdapter {
    scripts: Mutex<Vec<Vec<ResponseEvent>>>,
    /// Every request seen, in order, for assertions on transformed history.
    pub requests: Arc<Mutex<Vec<ChatRequest>>>,
}

impl ScriptedMockAdapter {
    pub fn new(scripts: Vec<Vec<ResponseEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Adapter that always answers with a single text reply.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let text = reply.into();
        Self::new(vec![vec![
            ResponseEvent::TextDelta(text),
            ResponseEvent::Done {
                finish_reason: Some("stop".into()),
            },
        ]])
    }

    /// Adapter that emits one tool call, then a final text reply on the
    /// second round.
    pub fn tool_then_text(
        tool_id: impl Into<String>,
        tool_name: impl Into<String>,
        args_json: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ResponseEvent::ToolCall {
                    index: 0,
                    id: tool_id.into(),
                    name: tool_name.into(),
                    arguments: args_json.into(),
                },
                ResponseEvent::Done {
                    finish_reason: Some("tool_use".into()),
                },
            ],
            vec![
                ResponseEvent::TextDelta(final_text.into()),
                ResponseEvent::Done {
                    finish_reason: Some("stop".into()),
                },
            ],
        ])
    }
}

#[async_trait]
impl ModelProvider for ScriptedMockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "mock-model".into(),
            display_name: "Mock".into(),
            provider: "mock".into(),
        }])
    }

    async fn stream(&self, req: ChatRequest) -> Result<ResponseStream> {
        self.requests.lock().expect("mock lock").push(req);
        let script = {
            let mut scripts = self.scripts.lock().expect("mock lock");
            if scripts.is_empty() {
                return Err(Error::Internal(anyhow::anyhow!(
                    "scripted mock exhausted: no script for this call"
                )));
            }
            scripts.remove(0)
        };
        let events: Vec<Result<ResponseEvent>> = script.into_iter().map(Ok).collect();
        Ok(Box::pin(stream::iter(events)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn scripts_pop_in_order() {
        let mock = ScriptedMockAdapter::new(vec![
            vec![ResponseEvent::TextDelta("one".into())],
            vec![ResponseEvent::TextDelta("two".into())],
        ]);
        let mut first = mock.stream(ChatRequest::default()).await.unwrap();
        match first.next().await.unwrap().unwrap() {
            ResponseEvent::TextDelta(t) => assert_eq!(t, "one"),
            other => panic!("unexpected {other:?}"),
        }
        let mut second = mock.stream(ChatRequest::default()).await.unwrap();
        match second.next().await.unwrap().unwrap() {
            ResponseEvent::TextDelta(t) => assert_eq!(t, "two"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn exhausted_mock_errors() {
        let mock = ScriptedMockAdapter::new(vec![]);
        assert!(mock.stream(ChatRequest::default()).await.is_err());
    }

    #[tokio::test]
    async fn requests_are_recorded() {
        let mock = ScriptedMockAdapter::always_text("hi");
        let req = ChatRequest {
            model: "mock-model".into(),
            ..Default::default()
        };
        let _ = mock.stream(req).await.unwrap();
        assert_eq!(mock.requests.lock().unwrap()[0].model, "mock-model");
    }
}
