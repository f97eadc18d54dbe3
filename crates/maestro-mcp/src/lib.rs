//! MCP connectivity layer.
//!
//! Transport-agnostic clients (HTTP JSON-RPC and stdio subprocess) behind one
//! trait, the OAuth 2.1 + PKCE manager for remote servers, and the resilience
//! plumbing they share: the process-wide HTTP pool and the discovery-metadata
//! cache.

mod cache;
mod client;
mod factory;
mod http;
mod jsonrpc;
mod oauth;
mod pool;
mod stdio;
mod validate;

pub use cache::MetadataCache;
pub use client::{
    verify_and_persist, McpClient, McpToolInfo, ServerVerifier, ToolCallResult, ToolListResult,
    VerifyOutcome, VerifyStatus,
};
pub use factory::ClientFactory;
pub use http::{HttpAuth, HttpMcpClient};
pub use oauth::{
    build_auth_url, generate_pkce, generate_state, AuthServerMetadata, OAuthManager, PkcePair,
};
pub use pool::build_pool;
pub use stdio::StdioMcpClient;
pub use validate::{expand_env_args, validate_server_config};
