//! Idempotent infrastructure sync.
//!
//! Built-in definition sets (system agents, internal servers, seed services)
//! are synced at startup.  A SHA-256 digest of the canonical JSON of each set
//! is kept in the `sync_state` namespace; when the digest matches, the sync
//! performs zero writes.

use maestro_domain::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::traits::SyncStateStore;

/// Render a JSON value with object keys sorted, so the digest is independent
/// of map iteration order.
pub fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        other => other.to_string(),
    }
}

/// SHA-256 digest (hex) of a definition set.
pub fn definitions_digest(defs: &Value) -> String {
    let canonical = canonical_json(defs);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Digest matched; nothing written.
    Unchanged,
    /// Definitions applied and the digest updated.
    Applied,
}

/// Run one named sync step.  `apply` is only invoked when the stored digest
/// differs from the digest of `defs`.
pub async fn sync_definitions<F, Fut>(
    store: &dyn SyncStateStore,
    name: &str,
    defs: &Value,
    apply: F,
) -> Result<SyncOutcome>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<()>>,
{
    let digest = definitions_digest(defs);
    if store.get_digest(name).await?.as_deref() == Some(digest.as_str()) {
        debug!(name, "definitions unchanged, skipping sync");
        return Ok(SyncOutcome::Unchanged);
    }
    apply().await?;
    store.put_digest(name, &digest).await?;
    info!(name, "definitions synced");
    Ok(SyncOutcome::Applied)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
