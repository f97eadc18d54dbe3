//! Built-in definitions synced idempotently at startup.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use maestro_core::{Retriever, SourceChunk};
use maestro_domain::{Agent, Result};
use maestro_store::{sync_definitions, AgentStore, MemoryStore};
use serde_json::json;

pub const SYSTEM_AGENT_ID: &str = "agt_system0001";

/// Default retriever for the single-process build: no vector backend is
/// wired, so every search comes back empty.  Deployments plug their index in
/// through the [`Retriever`] seam.
pub struct UnindexedRetriever;

#[async_trait]
impl Retriever for UnindexedRetriever {
    async fn search(
        &self,
        _resource_ids: &[String],
        _query: &str,
        _top_k: usize,
    ) -> Result<Vec<SourceChunk>> {
        Ok(Vec::new())
    }
}

/// Seed the system agent.  Re-running with unchanged definitions performs
/// zero writes — the digest in `sync_state` short-circuits.
pub async fn sync_system_definitions(store: &Arc<MemoryStore>) -> Result<()> {
    let defs = json!([{
        "id": SYSTEM_AGENT_ID,
        "name": "Assistant",
        "system_prompt": "You are a helpful assistant. Use the available tools when they help.",
        "is_system": true,
    }]);

    let agents = store.clone();
    sync_definitions(store.as_ref(), "system_agents", &defs, || async move {
        agents
            .create_agent(Agent {
                id: SYSTEM_AGENT_ID.to_string(),
                user_id: "usr_system0001".to_string(),
                name: "Assistant".to_string(),
                system_prompt: "You are a helpful assistant. Use the available tools when they help."
                    .to_string(),
                tags: vec!["system".to_string()],
                server_ids: Vec::new(),
                resource_ids: Vec::new(),
                is_system: true,
                created_at: Utc::now(),
            })
            .await
    })
    .await?;
    Ok(())
}

// Keep the id namespace honest: the constant must validate as an agent id.
#[cfg(test)]
mod tests {
    use super::*;
    use maestro_domain::id::{is_valid, IdKind};

    #[test]
    fn system_agent_id_is_well_formed() {
        assert!(is_valid(SYSTEM_AGENT_ID, IdKind::Agent));
    }

    #[tokio::test]
    async fn second_sync_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        sync_system_definitions(&store).await.unwrap();
        assert!(store.get_agent(SYSTEM_AGENT_ID).await.unwrap().is_some());
        sync_system_definitions(&store).await.unwrap();
    }
}
