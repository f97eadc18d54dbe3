//! The one and only outbound HTTP client.
//!
//! All MCP HTTP calls and OAuth requests go through this pooled client;
//! creating per-request clients anywhere else is a bug.  HTTP/2 is
//! negotiated via ALPN where the peer supports it, with transparent
//! HTTP/1.1 fallback.

use maestro_config::HttpPoolSettings;
use maestro_domain::{Error, Result};
use tracing::info;

pub fn build_pool(settings: &HttpPoolSettings) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .pool_max_idle_per_host(settings.max_idle_per_host)
        .connect_timeout(settings.connect_timeout())
        .timeout(settings.timeout())
        .build()
        .map_err(|e| Error::Internal(anyhow::anyhow!("failed to build HTTP pool: {e}")))?;
    info!(
        max_idle_per_host = settings.max_idle_per_host,
        connect_timeout_secs = settings.connect_timeout_secs,
        timeout_secs = settings.timeout_secs,
        "HTTP client pool initialized"
    );
    Ok(client)
}
