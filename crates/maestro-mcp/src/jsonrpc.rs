//! Minimal JSON-RPC 2.0 request/response shapes for the MCP wire protocol.
//!
//! Request ids are monotonically increasing integers per connection; the
//! stdio transport matches responses to requests by id on a dispatch map.

use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2025-03-26";

pub fn request(id: i64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

pub fn notification(method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

pub fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": { "name": "maestro", "version": env!("CARGO_PKG_VERSION") },
    })
}

/// Extract the result of a JSON-RPC response, turning an `error` member into
/// a readable message.
pub fn into_result(response: Value) -> Result<Value, String> {
    if let Some(err) = response.get("error").filter(|e| !e.is_null()) {
        let code = err["code"].as_i64().unwrap_or(0);
        let message = err["message"].as_str().unwrap_or("unknown error");
        return Err(format!("JSON-RPC error {code}: {message}"));
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
