//! OAuth 2.1 authorization for remote MCP servers.
//!
//! RFC 7636 S256 PKCE, RFC 8414 authorization-server metadata, and the
//! `.well-known/oauth-protected-resource` resource-first discovery hop.
//! Discovery documents go through the metadata cache; tokens are persisted
//! through the OAuth store and never logged.

use std::sync::{Arc, Mutex as StdMutex};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{Duration as ChronoDuration, Utc};
use maestro_domain::{Error, McpServer, OAuthSession, OAuthTokens, Result};
use maestro_store::{OAuthStore, ServerStore};
use rand::rngs::OsRng;
use rand::{Rng, RngCore};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use url::Url;

use crate::cache::MetadataCache;
use crate::client::ServerVerifier;

/// RFC 3986 unreserved characters — the PKCE verifier alphabet.
const UNRESERVED: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";
const VERIFIER_LEN: usize = 128;

#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

/// Generate an RFC 7636 verifier/challenge pair.
///
/// The verifier is 128 characters drawn uniformly from the unreserved
/// alphabet; the challenge is `base64url_nopad(SHA256(verifier))`, 43 chars.
pub fn generate_pkce() -> PkcePair {
    let mut rng = OsRng;
    let verifier: String = (0..VERIFIER_LEN)
        .map(|_| UNRESERVED[rng.gen_range(0..UNRESERVED.len())] as char)
        .collect();
    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    PkcePair {
        verifier,
        challenge,
    }
}

/// Cryptographically random opaque state token.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Standard authorization-request URL with S256 PKCE.
pub fn build_auth_url(
    authorization_endpoint: &str,
    client_id: &str,
    redirect_uri: &str,
    code_challenge: &str,
    state: &str,
    scope: Option<&str>,
) -> Result<String> {
    let mut url = Url::parse(authorization_endpoint)
        .map_err(|e| Error::Validation(format!("invalid authorization endpoint: {e}")))?;
    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("response_type", "code")
            .append_pair("client_id", client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256")
            .append_pair("state", state);
        if let Some(scope) = scope {
            query.append_pair("scope", scope);
        }
    }
    Ok(url.to_string())
}

/// The subset of RFC 8414 metadata maestro consumes.
#[derive(Debug, Clone)]
pub struct AuthServerMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
}

pub struct OAuthManager {
    http: reqwest::Client,
    cache: Arc<MetadataCache>,
    store: Arc<dyn OAuthStore>,
    servers: Arc<dyn ServerStore>,
    success_redirect: String,
    /// Set after construction to break the manager ↔ factory cycle.
    verifier: StdMutex<Option<Arc<dyn ServerVerifier>>>,
}

impl OAuthManager {
    pub fn new(
        http: reqwest::Client,
        cache: Arc<MetadataCache>,
        store: Arc<dyn OAuthStore>,
        servers: Arc<dyn ServerStore>,
        success_redirect: impl Into<String>,
    ) -> Self {
        Self {
            http,
            cache,
            store,
            servers,
            success_redirect: success_redirect.into(),
            verifier: StdMutex::new(None),
        }
    }

    /// Wire the verify hook invoked after a successful callback.
    pub fn set_verifier(&self, verifier: Arc<dyn ServerVerifier>) {
        *self.verifier.lock().expect("verifier lock poisoned") = Some(verifier);
    }

    async fn fetch_json(&self, url: String) -> Result<Value> {
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("metadata fetch failed for {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Transient(format!(
                "metadata fetch for {url} returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| Error::Transient(format!("metadata for {url} is not JSON: {e}")))
    }

    /// Resource-first discovery: the protected-resource document names its
    /// authorization servers; the first one's RFC 8414 document carries the
    /// endpoints.  Both documents come through the TTL cache.
    pub async fn discover(&self, server_url: &str) -> Result<AuthServerMetadata> {
        let origin = origin_of(server_url)?;
        let resource_url = format!("{origin}/.well-known/oauth-protected-resource");
        let resource = self
            .cache
            .get_or_fetch(&resource_url, |u| self.fetch_json(u))
            .await?;

        let auth_server = resource["authorization_servers"]
            .as_array()
            .and_then(|a| a.first())
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                Error::Validation(format!("{resource_url} lists no authorization servers"))
            })?
            .trim_end_matches('/')
            .to_string();

        let metadata_url = format!("{auth_server}/.well-known/oauth-authorization-server");
        let metadata = self
            .cache
            .get_or_fetch(&metadata_url, |u| self.fetch_json(u))
            .await?;

        let authorization_endpoint = metadata["authorization_endpoint"]
            .as_str()
            .ok_or_else(|| Error::Validation("metadata lacks authorization_endpoint".into()))?
            .to_string();
        let token_endpoint = metadata["token_endpoint"]
            .as_str()
            .ok_or_else(|| Error::Validation("metadata lacks token_endpoint".into()))?
            .to_string();

        Ok(AuthServerMetadata {
            authorization_endpoint,
            token_endpoint,
        })
    }

    async fn discover_for_server_id(&self, server_id: &str) -> Result<AuthServerMetadata> {
        let server = self
            .servers
            .get_server(server_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("server {server_id} not found")))?;
        let url = server
            .url
            .as_deref()
            .ok_or_else(|| Error::Validation(format!("server {server_id} has no URL")))?;
        self.discover(url).await
    }

    /// Start the authorization flow for a server: discover, generate PKCE and
    /// state, persist the flow session, and return the URL to send the user
    /// to.
    pub async fn begin_authorization(
        &self,
        server: &McpServer,
        client_id: &str,
        redirect_uri: &str,
        scope: Option<&str>,
    ) -> Result<String> {
        let server_url = server
            .url
            .as_deref()
            .ok_or_else(|| Error::Validation("server has no URL to authorize against".into()))?;
        let metadata = self.discover(server_url).await?;

        let pkce = generate_pkce();
        let state = generate_state();
        self.store
            .put_session(OAuthSession {
                state: state.clone(),
                code_verifier: pkce.verifier,
                server_id: server.id.clone(),
                redirect_uri: redirect_uri.to_string(),
                created_at: Utc::now(),
            })
            .await?;

        build_auth_url(
            &metadata.authorization_endpoint,
            client_id,
            redirect_uri,
            &pkce.challenge,
            &state,
            scope,
        )
    }

    /// Exchange an authorization code for tokens.  Token values never reach
    /// the logs.
    pub async fn exchange_code(
        &self,
        token_endpoint: &str,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
        client_id: &str,
    ) -> Result<Value> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
            ("client_id", client_id),
        ];
        let resp = self
            .http
            .post(token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("token request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Authentication(format!(
                "token endpoint returned {}",
                resp.status()
            )));
        }
        resp.json()
            .await
            .map_err(|e| Error::Transient(format!("token response is not JSON: {e}")))
    }

    fn tokens_from_response(
        server_id: &str,
        body: &Value,
        fallback_refresh: Option<String>,
    ) -> OAuthTokens {
        OAuthTokens {
            server_id: server_id.to_string(),
            access_token: body["access_token"].as_str().unwrap_or("").to_string(),
            refresh_token: body["refresh_token"]
                .as_str()
                .map(|s| s.to_string())
                .or(fallback_refresh),
            expires_at: body["expires_in"]
                .as_i64()
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs)),
            scope: body["scope"].as_str().map(|s| s.to_string()),
        }
    }

    /// Redirect handler: look up the flow session by state (single-use),
    /// re-discover metadata through the cache, exchange the code, persist the
    /// tokens, kick off an immediate verify, and return the success URL.
    pub async fn handle_callback(
        &self,
        state: &str,
        code: &str,
        client_id: &str,
    ) -> Result<String> {
        let session = self
            .store
            .take_session(state)
            .await?
            .ok_or_else(|| Error::NotFound("unknown or expired OAuth state".into()))?;

        let metadata = self.discover_for_server_id(&session.server_id).await?;
        let body = self
            .exchange_code(
                &metadata.token_endpoint,
                code,
                &session.redirect_uri,
                &session.code_verifier,
                client_id,
            )
            .await?;

        let tokens = Self::tokens_from_response(&session.server_id, &body, None);
        if tokens.access_token.is_empty() {
            return Err(Error::Authentication(
                "token endpoint returned no access token".into(),
            ));
        }
        self.store.put_tokens(tokens).await?;
        info!(server_id = %session.server_id, "OAuth tokens stored");

        // Verify in the background so the redirect stays immediate.
        let verifier = self.verifier.lock().expect("verifier lock poisoned").clone();
        if let Some(verifier) = verifier {
            let server_id = session.server_id.clone();
            tokio::spawn(async move {
                if let Err(e) = verifier.verify_server(&server_id).await {
                    warn!(server_id, error = %e, "post-authorization verify failed");
                }
            });
        }

        Ok(self.success_redirect.clone())
    }

    /// Current access token for a server, refreshing when expired.
    pub async fn access_token(&self, server_id: &str) -> Result<String> {
        let tokens = self.store.get_tokens(server_id).await?.ok_or_else(|| {
            Error::Authentication(format!("server {server_id} has no OAuth tokens"))
        })?;
        let expired = tokens
            .expires_at
            .map(|at| at <= Utc::now())
            .unwrap_or(false);
        if expired && tokens.refresh_token.is_some() {
            return Ok(self.refresh(server_id).await?.access_token);
        }
        Ok(tokens.access_token)
    }

    /// Refresh using the stored refresh token; persists the new token set
    /// atomically on success.  The token endpoint is rediscovered through
    /// the cache so refresh keeps working long after the original flow.
    pub async fn refresh(&self, server_id: &str) -> Result<OAuthTokens> {
        let current = self.store.get_tokens(server_id).await?.ok_or_else(|| {
            Error::Authentication(format!("server {server_id} has no OAuth tokens"))
        })?;
        let refresh_token = current.refresh_token.clone().ok_or_else(|| {
            Error::Authentication(format!("server {server_id} has no refresh token"))
        })?;

        let metadata = self.discover_for_server_id(server_id).await?;
        let form = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        let resp = self
            .http
            .post(&metadata.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Transient(format!("refresh request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(Error::Authentication(format!(
                "refresh endpoint returned {}",
                resp.status()
            )));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::Transient(format!("refresh response is not JSON: {e}")))?;
        let tokens = Self::tokens_from_response(server_id, &body, Some(refresh_token));
        self.store.put_tokens(tokens.clone()).await?;
        info!(server_id, "OAuth tokens refreshed");
        Ok(tokens)
    }
}

fn origin_of(server_url: &str) -> Result<String> {
    let url = Url::parse(server_url)
        .map_err(|e| Error::Validation(format!("invalid server URL {server_url}: {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| Error::Validation(format!("server URL {server_url} has no host")))?;
    let origin = match url.port() {
        Some(port) => format!("{}://{host}:{port}", url.scheme()),
        None => format!("{}://{host}", url.scheme()),
    };
    Ok(origin)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use maestro_store::MemoryStore;

    #[test]
    fn pkce_verifier_is_128_unreserved_chars() {
        let pkce = generate_pkce();
        assert_eq!(pkce.verifier.len(), 128);
        assert!(
            pkce.verifier.bytes().all(|b| UNRESERVED.contains(&b)),
            "verifier chars outside unreserved set"
        );
    }

    #[test]
    fn pkce_challenge_is_s256_of_verifier() {
        let pkce = generate_pkce();
        assert_eq!(pkce.challenge.len(), 43);
        let expected = URL_SAFE_NO_PAD.encode(Sha256::digest(pkce.verifier.as_bytes()));
        assert_eq!(pkce.challenge, expected);
        // No padding characters allowed.
        assert!(!pkce.challenge.contains('='));
    }

    #[test]
    fn pkce_pairs_are_unique() {
        let a = generate_pkce();
        let b = generate_pkce();
        assert_ne!(a.verifier, b.verifier);
        assert_ne!(a.challenge, b.challenge);
    }

    #[test]
    fn state_tokens_are_unique_and_url_safe() {
        let a = generate_state();
        let b = generate_state();
        assert_ne!(a, b);
        assert!(!a.contains('+') && !a.contains('/') && !a.contains('='));
    }

    #[test]
    fn auth_url_carries_all_required_parameters() {
        let url = build_auth_url(
            "https://auth.example.com/authorize",
            "client-1",
            "https://app.example.com/callback",
            "challenge43",
            "state-xyz",
            Some("tools:read"),
        )
        .unwrap();
        let parsed = Url::parse(&url).unwrap();
        let pairs: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(pairs["response_type"], "code");
        assert_eq!(pairs["client_id"], "client-1");
        assert_eq!(pairs["code_challenge"], "challenge43");
        assert_eq!(pairs["code_challenge_method"], "S256");
        assert_eq!(pairs["state"], "state-xyz");
        assert_eq!(pairs["scope"], "tools:read");
    }

    #[test]
    fn auth_url_without_scope_omits_it() {
        let url = build_auth_url(
            "https://auth.example.com/authorize",
            "c",
            "https://cb",
            "ch",
            "st",
            None,
        )
        .unwrap();
        assert!(!url.contains("scope="));
    }

    #[test]
    fn origin_strips_path_and_keeps_port() {
        assert_eq!(
            origin_of("https://mcp.example.com/api/v1/rpc").unwrap(),
            "https://mcp.example.com"
        );
        assert_eq!(
            origin_of("http://localhost:8931/mcp").unwrap(),
            "http://localhost:8931"
        );
        assert!(origin_of("not a url").is_err());
    }

    fn manager(store: Arc<MemoryStore>) -> OAuthManager {
        OAuthManager::new(
            reqwest::Client::new(),
            Arc::new(MetadataCache::new(std::time::Duration::from_secs(60))),
            store.clone(),
            store,
            "http://app/success",
        )
    }

    #[tokio::test]
    async fn unknown_state_is_not_found() {
        let manager = manager(Arc::new(MemoryStore::new()));
        let err = manager
            .handle_callback("missing-state", "code", "client")
            .await
            .unwrap_err();
        assert_eq!(err.status(), 404);
    }

    #[tokio::test]
    async fn access_token_without_tokens_is_authentication_error() {
        let manager = manager(Arc::new(MemoryStore::new()));
        let err = manager.access_token("srv_abc123").await.unwrap_err();
        assert_eq!(err.status(), 401);
    }

    #[tokio::test]
    async fn unexpired_token_is_returned_without_refresh() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_tokens(OAuthTokens {
                server_id: "srv_abc123".into(),
                access_token: "tok-live".into(),
                refresh_token: Some("ref".into()),
                expires_at: Some(Utc::now() + ChronoDuration::hours(1)),
                scope: None,
            })
            .await
            .unwrap();
        let manager = manager(store);
        assert_eq!(manager.access_token("srv_abc123").await.unwrap(), "tok-live");
    }

    #[tokio::test]
    async fn refresh_without_refresh_token_fails() {
        let store = Arc::new(MemoryStore::new());
        store
            .put_tokens(OAuthTokens {
                server_id: "srv_abc123".into(),
                access_token: "tok".into(),
                refresh_token: None,
                expires_at: None,
                scope: None,
            })
            .await
            .unwrap();
        let manager = manager(store);
        let err = manager.refresh("srv_abc123").await.unwrap_err();
        assert_eq!(err.status(), 401);
    }
}
