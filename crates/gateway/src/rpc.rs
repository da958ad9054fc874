//! JSON-RPC 2.0 framing over the MCP schema.
//!
//! One dispatcher serves both wire transports; the transport adapters in
//! `server` only differ in how a [`JsonRpcResponse`] travels back.

use crate::dispatch;
use crate::server::AppState;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";
pub const SERVER_NAME: &str = "oic-monitor-gateway";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    /// Absent for notifications.
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Option<Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
}

impl JsonRpcResponse {
    pub fn result(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(JsonRpcError {
                code,
                message: message.into(),
            }),
        }
    }
}

pub fn parse_error_response() -> JsonRpcResponse {
    JsonRpcResponse::error(Value::Null, PARSE_ERROR, "Parse error")
}

/// Handle one raw JSON-RPC message body. `None` means no reply is owed
/// (the message was a notification).
pub async fn handle_raw(state: &AppState, raw: &[u8]) -> Option<JsonRpcResponse> {
    match serde_json::from_slice::<Value>(raw) {
        Ok(value) => handle_value(state, value).await,
        Err(_) => Some(parse_error_response()),
    }
}

pub async fn handle_value(state: &AppState, value: Value) -> Option<JsonRpcResponse> {
    // Keep the id for error replies even when the envelope shape is off.
    let raw_id = value.get("id").cloned();
    let request: JsonRpcRequest = match serde_json::from_value(value) {
        Ok(r) => r,
        Err(e) => {
            return Some(JsonRpcResponse::error(
                raw_id.unwrap_or(Value::Null),
                INVALID_REQUEST,
                format!("Invalid request: {e}"),
            ));
        }
    };

    if request.jsonrpc.as_deref() != Some("2.0") {
        return request.id.map(|id| {
            JsonRpcResponse::error(id, INVALID_REQUEST, "invalid json-rpc version")
        });
    }

    let id = request.id;
    match request.method.as_str() {
        "initialize" => id.map(|id| initialize_response(id, request.params.as_ref())),
        "notifications/initialized" | "notifications/cancelled" => None,
        "ping" => id.map(|id| JsonRpcResponse::result(id, json!({}))),
        "tools/list" => {
            id.map(|id| JsonRpcResponse::result(id, json!({ "tools": state.catalog.listing() })))
        }
        "tools/call" => {
            let id = id?;
            let params = request.params.unwrap_or(Value::Null);
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Some(JsonRpcResponse::error(
                    id,
                    INVALID_PARAMS,
                    "tools/call requires a 'name' parameter",
                ));
            };
            let envelope = dispatch::dispatch_tool_call(
                &state.catalog,
                &state.tenants,
                &state.upstream,
                name,
                params.get("arguments"),
            )
            .await;
            Some(JsonRpcResponse::result(id, envelope))
        }
        other => {
            id.map(|id| {
                JsonRpcResponse::error(id, METHOD_NOT_FOUND, format!("Method not found: {other}"))
            })
        }
    }
}

fn initialize_response(id: Value, params: Option<&Value>) -> JsonRpcResponse {
    let protocol = params
        .and_then(|p| p.get("protocolVersion"))
        .and_then(Value::as_str)
        .unwrap_or(PROTOCOL_VERSION);
    // Only the tools capability is advertised.
    JsonRpcResponse::result(
        id,
        json!({
            "protocolVersion": protocol,
            "capabilities": { "tools": {} },
            "serverInfo": { "name": SERVER_NAME, "version": crate::VERSION },
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::AppState;
    use crate::tenant::TenantRegistry;

    fn state(dir: &std::path::Path) -> AppState {
        AppState::new(TenantRegistry::from_pairs(Vec::new()), dir.to_path_buf())
    }

    #[tokio::test]
    async fn malformed_json_yields_parse_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());
        let reply = handle_raw(&state, b"{not json").await.expect("reply");
        assert_eq!(reply.error.as_ref().expect("error").code, PARSE_ERROR);
        assert_eq!(reply.id, Value::Null);
    }

    #[tokio::test]
    async fn unknown_method_yields_method_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());
        let reply = handle_raw(
            &state,
            br#"{"jsonrpc":"2.0","id":3,"method":"resources/list"}"#,
        )
        .await
        .expect("reply");
        let error = reply.error.expect("error");
        assert_eq!(error.code, METHOD_NOT_FOUND);
        assert_eq!(error.message, "Method not found: resources/list");
    }

    #[tokio::test]
    async fn initialize_echoes_protocol_version_and_advertises_tools_only() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());
        let reply = handle_raw(
            &state,
            br#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{}}}"#,
        )
        .await
        .expect("reply");
        let result = reply.result.expect("result");
        assert_eq!(result["protocolVersion"], "2025-03-26");
        assert_eq!(result["capabilities"], json!({ "tools": {} }));
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
    }

    #[tokio::test]
    async fn initialized_notification_gets_no_reply() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());
        let reply = handle_raw(
            &state,
            br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
        )
        .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn tools_list_returns_the_full_catalog() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());
        let reply = handle_raw(&state, br#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#)
            .await
            .expect("reply");
        let tools = reply.result.expect("result")["tools"]
            .as_array()
            .expect("tools")
            .len();
        assert_eq!(tools, state.catalog.len());
    }

    #[tokio::test]
    async fn tools_call_without_name_is_invalid_params() {
        let dir = tempfile::tempdir().expect("tempdir");
        let state = state(dir.path());
        let reply = handle_raw(
            &state,
            br#"{"jsonrpc":"2.0","id":4,"method":"tools/call","params":{}}"#,
        )
        .await
        .expect("reply");
        assert_eq!(reply.error.expect("error").code, INVALID_PARAMS);
    }
}
