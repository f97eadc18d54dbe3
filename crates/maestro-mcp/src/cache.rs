//! Cache-aside TTL cache for OAuth discovery documents.
//!
//! One global mutex serializes structural changes, which also coalesces the
//! initial fill: concurrent first readers of the same URL line up behind the
//! fetch instead of racing it.

use std::collections::HashMap;
use std::future::Future;
use std::time::{Duration, Instant};

use maestro_domain::Result;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

struct Entry {
    value: Value,
    expires_at: Instant,
}

pub struct MetadataCache {
    entries: Mutex<HashMap<String, Entry>>,
    ttl: Duration,
}

impl MetadataCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Fetch-through with stale-on-error fallback.
    ///
    /// 1. Unexpired entry → return it.
    /// 2. Miss or expired → run `fetcher`, store, return.
    /// 3. Fetch failure with a stale entry → warn and return the stale value.
    /// 4. Fetch failure with no entry → propagate the error.
    pub async fn get_or_fetch<F, Fut>(&self, url: &str, fetcher: F) -> Result<Value>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<Value>>,
    {
        let mut entries = self.entries.lock().await;

        if let Some(entry) = entries.get(url) {
            if entry.expires_at > Instant::now() {
                debug!(url, "metadata cache hit");
                return Ok(entry.value.clone());
            }
        }

        debug!(url, "metadata cache miss, fetching");
        match fetcher(url.to_string()).await {
            Ok(value) => {
                entries.insert(
                    url.to_string(),
                    Entry {
                        value: value.clone(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
                Ok(value)
            }
            Err(e) => {
                if let Some(stale) = entries.get(url) {
                    warn!(url, error = %e, "metadata fetch failed, serving stale cache entry");
                    return Ok(stale.value.clone());
                }
                error!(url, error = %e, "metadata fetch failed with no cached fallback");
                Err(e)
            }
        }
    }

    /// Drop one entry, or everything when `url` is `None`.
    pub async fn clear(&self, url: Option<&str>) {
        let mut entries = self.entries.lock().await;
        match url {
            Some(u) => {
                entries.remove(u);
            }
            None => entries.clear(),
        }
    }

    /// Force an entry to be expired, without removing it.  Test hook for the
    /// stale-fallback path.
    #[cfg(test)]
    pub async fn expire(&self, url: &str) {
        if let Some(entry) = self.entries.lock().await.get_mut(url) {
            entry.expires_at = Instant::now() - Duration::from_secs(1);
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
