//! The internal RAG tool.
//!
//! The vector index itself lives behind the [`Retriever`] seam — maestro
//! only defines the contract and exposes retrieval as an internal tool that
//! the context builder auto-attaches when an agent has ready resources.

use std::sync::Arc;

use async_trait::async_trait;
use maestro_domain::Result;
use maestro_tools::{InternalTool, InternalToolOutput};
use serde_json::{json, Value};

/// One retrieved chunk with its provenance.
#[derive(Debug, Clone)]
pub struct SourceChunk {
    pub resource_id: String,
    pub content: String,
    pub score: f64,
}

/// Semantic search over ingested resources.  Implemented by the embedding
/// backend; maestro never computes similarity itself.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        resource_ids: &[String],
        query: &str,
        top_k: usize,
    ) -> Result<Vec<SourceChunk>>;
}

/// `rag.search` — the tool the model calls to pull context from resources.
pub struct RagSearchTool {
    retriever: Arc<dyn Retriever>,
}

impl RagSearchTool {
    pub const NAME: &'static str = "rag.search";

    pub fn new(retriever: Arc<dyn Retriever>) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl InternalTool for RagSearchTool {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Search the agent's attached resources for passages relevant to a query"
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Natural-language search query" },
                "resource_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Resources to search; empty searches all attached resources"
                },
                "top_k": { "type": "integer", "default": 5 }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, arguments: &Value) -> InternalToolOutput {
        let Some(query) = arguments["query"].as_str() else {
            return InternalToolOutput::err("rag.search requires a query");
        };
        let resource_ids: Vec<String> = arguments["resource_ids"]
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(|v| v.as_str().map(|s| s.to_string()))
            .collect();
        let top_k = arguments["top_k"].as_u64().unwrap_or(5) as usize;

        match self.retriever.search(&resource_ids, query, top_k).await {
            Ok(chunks) => {
                let matches: Vec<Value> = chunks
                    .iter()
                    .map(|c| {
                        json!({
                            "resource_id": c.resource_id,
                            "content": c.content,
                            "score": c.score,
                        })
                    })
                    .collect();
                InternalToolOutput::ok(json!({ "matches": matches }))
            }
            Err(e) => InternalToolOutput::err(format!("retrieval failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedRetriever;

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(
            &self,
            _resource_ids: &[String],
            query: &str,
            top_k: usize,
        ) -> Result<Vec<SourceChunk>> {
            Ok((0..top_k.min(2))
                .map(|i| SourceChunk {
                    resource_id: "res_abc123".into(),
                    content: format!("chunk {i} about {query}"),
                    score: 0.9 - i as f64 * 0.1,
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn search_returns_scored_matches() {
        let tool = RagSearchTool::new(Arc::new(FixedRetriever));
        let out = tool
            .execute(&json!({ "query": "rust", "top_k": 2 }))
            .await;
        assert!(out.success);
        let matches = out.result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["resource_id"], "res_abc123");
        assert!(matches[0]["content"].as_str().unwrap().contains("rust"));
    }

    #[tokio::test]
    async fn missing_query_is_an_error() {
        let tool = RagSearchTool::new(Arc::new(FixedRetriever));
        let out = tool.execute(&json!({})).await;
        assert!(!out.success);
    }
}
