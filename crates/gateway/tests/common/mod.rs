#![allow(dead_code)]

use anyhow::Context as _;
use oic_monitor_gateway::server::{router, AppState, SESSION_HEADER};
use oic_monitor_gateway::tenant::TenantRegistry;
use serde_json::{json, Value};
use std::sync::Arc;

pub const TENANT_NAMES: [&str; 4] = ["dev", "qa3", "prod1", "prod3"];

/// Bind an in-process axum app on an ephemeral loopback port.
pub async fn serve(app: axum::Router) -> anyhow::Result<String> {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .context("bind mock listener")?;
    let addr = listener.local_addr().context("mock local addr")?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

pub struct TestGateway {
    pub base: String,
    pub state: Arc<AppState>,
    _cache_dir: tempfile::TempDir,
}

/// Build a gateway whose tenants all point at the given mock upstream and
/// token endpoints, and serve it in-process.
pub async fn spawn_gateway(upstream_base: &str, token_base: &str) -> anyhow::Result<TestGateway> {
    let cache_dir = tempfile::tempdir().context("token cache tempdir")?;

    let mut pairs = Vec::new();
    for name in TENANT_NAMES {
        let suffix = name.to_uppercase();
        pairs.push((format!("OIC_CLIENT_ID_{suffix}"), format!("client-{name}")));
        pairs.push((
            format!("OIC_CLIENT_SECRET_{suffix}"),
            format!("secret-{name}"),
        ));
        pairs.push((
            format!("OIC_TOKEN_URL_{suffix}"),
            format!("{token_base}/token"),
        ));
        pairs.push((
            format!("OIC_API_BASE_URL_{suffix}"),
            upstream_base.to_string(),
        ));
        pairs.push((
            format!("OIC_INTEGRATION_INSTANCE_{suffix}"),
            format!("oic-{name}"),
        ));
    }
    let tenants = TenantRegistry::from_pairs(pairs);

    let state = Arc::new(AppState::new(tenants, cache_dir.path().to_path_buf()));
    let base = serve(router(state.clone())).await?;
    Ok(TestGateway {
        base,
        state,
        _cache_dir: cache_dir,
    })
}

/// Minimal MCP client over the streamable HTTP transport.
pub struct McpClient {
    http: reqwest::Client,
    base: String,
    pub session: Option<String>,
    next_id: i64,
}

impl McpClient {
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.to_string(),
            session: None,
            next_id: 1,
        }
    }

    pub async fn initialize(&mut self) -> anyhow::Result<Value> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": { "name": "gateway-tests", "version": "0" }
            }
        });
        let resp = self
            .http
            .post(format!("{}/stream", self.base))
            .json(&body)
            .send()
            .await
            .context("POST initialize")?;
        anyhow::ensure!(resp.status().is_success(), "initialize: {}", resp.status());
        let session = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .context("missing session header")?
            .to_string();
        self.session = Some(session);
        let reply: Value = resp.json().await.context("initialize body")?;
        Ok(reply)
    }

    pub async fn request(&mut self, method: &str, params: Value) -> anyhow::Result<Value> {
        let id = self.next_id;
        self.next_id += 1;
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        let mut req = self.http.post(format!("{}/stream", self.base)).json(&body);
        if let Some(session) = &self.session {
            req = req.header(SESSION_HEADER, session);
        }
        let resp = req.send().await.with_context(|| format!("POST {method}"))?;
        anyhow::ensure!(resp.status().is_success(), "{method}: {}", resp.status());
        let reply: Value = resp.json().await.with_context(|| format!("{method} body"))?;
        anyhow::ensure!(reply["id"] == json!(id), "response id mismatch: {reply}");
        Ok(reply)
    }

    /// `tools/call`; returns the MCP content envelope.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> anyhow::Result<Value> {
        let reply = self
            .request("tools/call", json!({ "name": name, "arguments": arguments }))
            .await?;
        anyhow::ensure!(
            reply.get("error").is_none(),
            "tools/call returned a JSON-RPC error: {reply}"
        );
        Ok(reply["result"].clone())
    }
}

/// Text of the first content block in a tool-call envelope.
pub fn envelope_text(envelope: &Value) -> &str {
    envelope["content"][0]["text"]
        .as_str()
        .expect("envelope text block")
}

/// Parse the envelope's text block as JSON (the payload serialization).
pub fn envelope_payload(envelope: &Value) -> Value {
    serde_json::from_str(envelope_text(envelope)).expect("payload json")
}

/// Incremental reader for a `text/event-stream` response.
pub struct SseReader {
    resp: reqwest::Response,
    buf: String,
}

impl SseReader {
    pub fn new(resp: reqwest::Response) -> Self {
        Self {
            resp,
            buf: String::new(),
        }
    }

    /// Next `(event, data)` block, skipping comments and keep-alives.
    pub async fn next_event(&mut self) -> anyhow::Result<(String, String)> {
        loop {
            if let Some(pos) = self.buf.find("\n\n") {
                let block = self.buf[..pos].to_string();
                self.buf.drain(..pos + 2);
                let mut event = String::new();
                let mut data = Vec::new();
                for line in block.lines() {
                    if let Some(rest) = line.strip_prefix("event:") {
                        event = rest.trim().to_string();
                    } else if let Some(rest) = line.strip_prefix("data:") {
                        data.push(rest.trim().to_string());
                    }
                }
                if data.is_empty() {
                    // Comment-only block (keep-alive); read on.
                    continue;
                }
                return Ok((event, data.join("\n")));
            }

            let chunk = self
                .resp
                .chunk()
                .await
                .context("read sse chunk")?
                .context("sse stream ended")?;
            self.buf.push_str(&String::from_utf8_lossy(&chunk));
        }
    }
}
