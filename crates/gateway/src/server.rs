//! HTTP surface: both MCP wire transports, plus health and identity routes.
//!
//! Transport A (legacy): `GET /sse` opens the push stream, `POST /messages`
//! submits requests whose replies ride that stream. Transport B (preferred):
//! `/stream` accepts POST for requests (responses inlined), GET for a
//! server-push channel, DELETE to end the session. Both feed the same
//! JSON-RPC dispatcher.

use crate::catalog::Catalog;
use crate::rpc;
use crate::session::SessionRegistry;
use crate::tenant::TenantRegistry;
use crate::token_cache::TokenCache;
use crate::upstream::UpstreamClient;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::StreamExt as _;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

pub const SESSION_HEADER: &str = "Mcp-Session-Id";

pub struct AppState {
    pub catalog: Catalog,
    pub tenants: TenantRegistry,
    pub upstream: UpstreamClient,
    pub sessions: SessionRegistry,
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(tenants: TenantRegistry, token_cache_dir: PathBuf) -> Self {
        let http = reqwest::Client::new();
        let tokens = Arc::new(TokenCache::new(http.clone(), token_cache_dir));
        Self::with_parts(tenants, UpstreamClient::new(http, tokens))
    }

    pub fn with_parts(tenants: TenantRegistry, upstream: UpstreamClient) -> Self {
        Self {
            catalog: Catalog::new(),
            tenants,
            upstream,
            sessions: SessionRegistry::default(),
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/sse", get(open_sse))
        .route("/messages", post(post_messages))
        .route(
            "/stream",
            get(open_stream_channel)
                .post(post_stream)
                .delete(delete_stream),
        )
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    timestamp: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: crate::VERSION,
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "name": rpc::SERVER_NAME,
        "version": crate::VERSION,
        "protocol": "mcp",
        "transports": { "sse": "/sse", "streamableHttp": "/stream" },
        "tools": {
            "count": state.catalog.len(),
            "names": state.catalog.names(),
        },
    }))
}

/// Transport A: open the event-stream push channel.
///
/// The first event names the message intake endpoint for this session; every
/// later event carries one JSON-RPC message.
async fn open_sse(State(state): State<Arc<AppState>>) -> Response {
    let (session_id, rx) = state.sessions.open_sse();
    tracing::info!(session_id = %session_id, "event-stream session opened");

    let endpoint = format!("/messages?sessionId={session_id}");
    let first = futures::stream::once(async move {
        Ok::<_, Infallible>(Event::default().event("endpoint").data(endpoint))
    });
    let messages = ReceiverStream::new(rx).map(|msg: Value| {
        Ok::<_, Infallible>(Event::default().event("message").data(msg.to_string()))
    });

    let shutdown = state.shutdown.clone();
    let stream = first
        .chain(messages)
        .take_until(async move { shutdown.cancelled().await });
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    #[serde(rename = "sessionId")]
    session_id: Option<String>,
}

/// Transport A: submit one JSON-RPC request. The reply is pushed onto the
/// named session's event stream, or the most recently opened one.
async fn post_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessagesQuery>,
    body: Bytes,
) -> Response {
    let Some((session_id, tx, work)) = state.sessions.sse_target(query.session_id.as_deref())
    else {
        return (StatusCode::BAD_REQUEST, "no active event-stream session").into_response();
    };

    let span = tracing::info_span!("mcp.messages", session_id = %session_id);
    async move {
        // One request at a time per session: replies keep request order.
        let _work = work.lock().await;
        let Some(reply) = rpc::handle_raw(&state, &body).await else {
            return StatusCode::ACCEPTED.into_response();
        };

        state
            .sessions
            .record_sse_response_id(&session_id, reply.id.clone());
        let value = match serde_json::to_value(&reply) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize JSON-RPC reply");
                return (StatusCode::INTERNAL_SERVER_ERROR, "serialization failed")
                    .into_response();
            }
        };
        if tx.send(value).await.is_err() {
            // Client went away; retire the session.
            state.sessions.close_sse(&session_id);
            return (StatusCode::GONE, "event-stream session closed").into_response();
        }
        StatusCode::ACCEPTED.into_response()
    }
    .instrument(span)
    .await
}

fn session_header(headers: &HeaderMap) -> Option<String> {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Transport B: submit a JSON-RPC request; the response is inlined.
///
/// `initialize` mints the session and returns its id in the
/// `Mcp-Session-Id` response header; every later request must carry it.
async fn post_stream(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let value: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return Json(rpc::parse_error_response()).into_response(),
    };

    let is_initialize = value.get("method").and_then(Value::as_str) == Some("initialize");
    if is_initialize {
        let session_id = state.sessions.create_stream();
        tracing::info!(session_id = %session_id, "stream session initialized");
        let reply = rpc::handle_value(&state, value).await;
        let mut response = match reply {
            Some(reply) => Json(reply).into_response(),
            None => StatusCode::ACCEPTED.into_response(),
        };
        if let Ok(header) = HeaderValue::from_str(&session_id) {
            response.headers_mut().insert(SESSION_HEADER, header);
        }
        return response;
    }

    let Some(session_id) = session_header(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            "Mcp-Session-Id header is required",
        )
            .into_response();
    };
    if !state.sessions.stream_exists(&session_id) {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    }

    let span = tracing::info_span!("mcp.stream", session_id = %session_id);
    async move {
        match rpc::handle_value(&state, value).await {
            Some(reply) => {
                state
                    .sessions
                    .record_stream_response_id(&session_id, reply.id.clone());
                Json(reply).into_response()
            }
            None => StatusCode::ACCEPTED.into_response(),
        }
    }
    .instrument(span)
    .await
}

/// Transport B: open the server-push notification channel for a session.
async fn open_stream_channel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            "Mcp-Session-Id header is required",
        )
            .into_response();
    };
    let Some(rx) = state.sessions.attach_stream_notifier(&session_id) else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let shutdown = state.shutdown.clone();
    let stream = ReceiverStream::new(rx)
        .map(|msg: Value| {
            Ok::<_, Infallible>(Event::default().event("message").data(msg.to_string()))
        })
        .take_until(async move { shutdown.cancelled().await });
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// Transport B: terminate a session.
async fn delete_stream(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let Some(session_id) = session_header(&headers) else {
        return (
            StatusCode::BAD_REQUEST,
            "Mcp-Session-Id header is required",
        )
            .into_response();
    };
    if state.sessions.remove_stream(&session_id) {
        tracing::info!(session_id = %session_id, "stream session terminated");
        StatusCode::NO_CONTENT.into_response()
    } else {
        (StatusCode::NOT_FOUND, "session not found").into_response()
    }
}
