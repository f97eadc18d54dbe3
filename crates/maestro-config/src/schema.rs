use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Shared HTTP client pool parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpPoolSettings {
    /// Keep-alive connections retained per host.
    pub max_idle_per_host: usize,
    /// TCP connect timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Overall request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for HttpPoolSettings {
    fn default() -> Self {
        Self {
            max_idle_per_host: 20,
            connect_timeout_secs: 10,
            timeout_secs: 60,
        }
    }
}

impl HttpPoolSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Gateway retry envelope for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_attempts: u32,
    /// Backoff base; attempt N waits up to `base * 2^N` with full jitter.
    pub base_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

/// Per-user creation quotas.  Admin accounts are exempt at the manager layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quotas {
    pub max_agents: usize,
    pub max_servers: usize,
    pub max_resources: usize,
    pub max_automations: usize,
}

impl Default for Quotas {
    fn default() -> Self {
        Self {
            max_agents: 100,
            max_servers: 100,
            max_resources: 50,
            max_automations: 50,
        }
    }
}

/// Credentials and endpoints for one LLM provider family.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

/// All tunables for one maestro process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Base64 master key for API-key encryption at rest (32 bytes decoded).
    /// Absent means encrypted-secret features refuse to operate.
    pub encryption_master_key: Option<String>,

    pub http: HttpPoolSettings,
    pub retry: RetrySettings,
    pub quotas: Quotas,

    pub anthropic: ProviderSettings,
    pub openai: ProviderSettings,
    /// Provider used when a model name matches no routing prefix.
    pub default_provider: String,

    /// Circuit breaker: consecutive failures before the circuit opens.
    pub breaker_failure_threshold: u32,
    /// Circuit breaker: seconds the circuit stays open before a probe.
    pub breaker_recovery_timeout_secs: u64,
    /// Circuit breaker: successes in half-open required to close.
    pub breaker_success_threshold: u32,

    /// OAuth discovery metadata cache TTL in seconds.
    pub oauth_metadata_cache_ttl_secs: u64,
    /// URL the browser is sent to after a successful OAuth callback.
    pub oauth_success_redirect: String,

    /// Hard deadline for MCP `verify` round-trips.
    pub mcp_verify_timeout_secs: u64,
    /// Read deadline for stdio MCP tool calls (HTTP uses the pool timeout).
    pub mcp_call_timeout_secs: u64,

    /// Messages of history included in a chat turn.
    pub chat_history_limit: usize,
    /// Active stream sessions older than this are reaped by cleanup.
    pub session_max_age_secs: u64,
    /// Pending validations expire this many seconds after creation.
    pub validation_ttl_secs: u64,
    /// Interval of the validation expiry sweep.
    pub validation_sweep_interval_secs: u64,
    /// Empty chats older than this many days are garbage-collected.
    pub chat_gc_days: i64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            encryption_master_key: None,
            http: HttpPoolSettings::default(),
            retry: RetrySettings::default(),
            quotas: Quotas::default(),
            anthropic: ProviderSettings::default(),
            openai: ProviderSettings::default(),
            default_provider: "openai".into(),
            breaker_failure_threshold: 5,
            breaker_recovery_timeout_secs: 60,
            breaker_success_threshold: 1,
            oauth_metadata_cache_ttl_secs: 3600,
            oauth_success_redirect: "http://localhost:3000/oauth/success".into(),
            mcp_verify_timeout_secs: 30,
            mcp_call_timeout_secs: 60,
            chat_history_limit: 50,
            session_max_age_secs: 3600,
            validation_ttl_secs: 7200,
            validation_sweep_interval_secs: 900,
            chat_gc_days: 30,
        }
    }
}

impl Settings {
    /// Build settings from a key lookup function.
    ///
    /// Extracted from `std::env` so tests can drive it with a map instead of
    /// mutating process state.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut s = Settings::default();

        s.encryption_master_key = get("MAESTRO_ENCRYPTION_MASTER_KEY");

        set_num(&get, "MAESTRO_HTTP_MAX_IDLE_PER_HOST", &mut s.http.max_idle_per_host)?;
        set_num(&get, "MAESTRO_HTTP_CONNECT_TIMEOUT_SECS", &mut s.http.connect_timeout_secs)?;
        set_num(&get, "MAESTRO_HTTP_TIMEOUT_SECS", &mut s.http.timeout_secs)?;

        set_num(&get, "MAESTRO_RETRY_MAX_ATTEMPTS", &mut s.retry.max_attempts)?;
        set_num(&get, "MAESTRO_RETRY_BASE_DELAY_MS", &mut s.retry.base_delay_ms)?;

        set_num(&get, "MAESTRO_QUOTA_AGENTS", &mut s.quotas.max_agents)?;
        set_num(&get, "MAESTRO_QUOTA_SERVERS", &mut s.quotas.max_servers)?;
        set_num(&get, "MAESTRO_QUOTA_RESOURCES", &mut s.quotas.max_resources)?;
        set_num(&get, "MAESTRO_QUOTA_AUTOMATIONS", &mut s.quotas.max_automations)?;

        s.anthropic.api_key = get("ANTHROPIC_API_KEY");
        s.anthropic.base_url = get("MAESTRO_ANTHROPIC_BASE_URL");
        s.openai.api_key = get("OPENAI_API_KEY");
        s.openai.base_url = get("MAESTRO_OPENAI_BASE_URL");
        if let Some(p) = get("MAESTRO_DEFAULT_PROVIDER") {
            s.default_provider = p;
        }

        set_num(&get, "MAESTRO_BREAKER_FAILURE_THRESHOLD", &mut s.breaker_failure_threshold)?;
        set_num(&get, "MAESTRO_BREAKER_RECOVERY_TIMEOUT_SECS", &mut s.breaker_recovery_timeout_secs)?;
        set_num(&get, "MAESTRO_BREAKER_SUCCESS_THRESHOLD", &mut s.breaker_success_threshold)?;

        set_num(&get, "MAESTRO_OAUTH_METADATA_CACHE_TTL_SECS", &mut s.oauth_metadata_cache_ttl_secs)?;
        if let Some(u) = get("MAESTRO_OAUTH_SUCCESS_REDIRECT") {
            s.oauth_success_redirect = u;
        }

        set_num(&get, "MAESTRO_MCP_VERIFY_TIMEOUT_SECS", &mut s.mcp_verify_timeout_secs)?;
        set_num(&get, "MAESTRO_MCP_CALL_TIMEOUT_SECS", &mut s.mcp_call_timeout_secs)?;

        set_num(&get, "MAESTRO_CHAT_HISTORY_LIMIT", &mut s.chat_history_limit)?;
        set_num(&get, "MAESTRO_SESSION_MAX_AGE_SECS", &mut s.session_max_age_secs)?;
        set_num(&get, "MAESTRO_VALIDATION_TTL_SECS", &mut s.validation_ttl_secs)?;
        set_num(&get, "MAESTRO_VALIDATION_SWEEP_INTERVAL_SECS", &mut s.validation_sweep_interval_secs)?;
        set_num(&get, "MAESTRO_CHAT_GC_DAYS", &mut s.chat_gc_days)?;

        Ok(s)
    }
}

fn set_num<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) -> anyhow::Result<()>
where
    T::Err: std::fmt::Display,
{
    if let Some(raw) = get(key) {
        *slot = raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key}: {e}"))?;
    }
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
