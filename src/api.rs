//! Local Gateway
//!
//! `axum` JSON-over-HTTP + WebSocket gateway generalizing the teacher's
//! `Router`/`AppState`/`ws_handler` shape (`server.rs`) to the method
//! surface of spec §6. Every response uses the uniform envelope
//! `{ok, data?, error?}`.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::chain::ChainStore;
use crate::error::AgencyError;
use crate::event_bus::AgencyEvent;
use crate::hardening::config_guard::ConfigGuard;
use crate::router::{AiOperationRouter, ApprovalGate, OperationRequest};
use crate::sync::{Origin, Session, SessionSyncEngine};

#[derive(Debug, Serialize)]
pub struct Envelope<T: Serialize> {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub kind: crate::error::ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(e: AgencyError) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: e.kind,
                message: e.message,
                retry_after: e.retry_after.map(|d| d.as_millis() as u64),
            }),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub router: Arc<AiOperationRouter>,
    pub chain: Arc<ChainStore>,
    pub approval_gate: Arc<ApprovalGate>,
    pub config_guard: Arc<ConfigGuard>,
    pub sync_engine: Arc<SessionSyncEngine>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/ops/execute", post(ops_execute))
        .route("/v1/ops/stream", post(ops_stream))
        .route("/v1/sessions/create", post(sessions_create))
        .route("/v1/sessions/resume", post(sessions_resume))
        .route("/v1/sessions/transfer", post(sessions_transfer))
        .route("/v1/memory/search", post(memory_search))
        .route("/v1/memory/delete", post(memory_delete))
        .route("/v1/approval/decide", post(approval_decide))
        .route("/v1/config/set", post(config_set))
        .route("/v1/chain/verify", post(chain_verify))
        .route("/ws", axum::routing::get(ws_upgrade))
        .with_state(state)
}

async fn ops_execute(State(state): State<AppState>, Json(req): Json<OperationRequest>) -> Response {
    match state.router.route(req).await {
        Ok(outcome) => (axum::http::StatusCode::OK, Json(Envelope::ok(serde_json::json!({
            "text": outcome.text,
            "record": outcome.record,
        })))).into_response(),
        Err(e) => {
            let status = match e.kind {
                crate::error::ErrorKind::BudgetExceeded
                | crate::error::ErrorKind::ApprovalDenied
                | crate::error::ErrorKind::EscalationBlocked
                | crate::error::ErrorKind::ConfigRefused => axum::http::StatusCode::FORBIDDEN,
                crate::error::ErrorKind::RateLimited => axum::http::StatusCode::TOO_MANY_REQUESTS,
                _ => axum::http::StatusCode::SERVICE_UNAVAILABLE,
            };
            (status, Json(Envelope::<Value>::err(e))).into_response()
        }
    }
}

/// Streaming variant of `ops.execute`. The underlying `ProviderAdapter`
/// returns a complete response rather than a token stream, so this
/// chunks the finished text over the event bus instead of blocking the
/// HTTP response on the full operation; clients that want the stream
/// subscribe on `/ws` and match chunks by `op_id`.
async fn ops_stream(State(state): State<AppState>, Json(req): Json<OperationRequest>) -> Response {
    let op_id = req.op_id.clone();
    let response_op_id = op_id.clone();
    tokio::spawn(async move {
        match state.router.route(req).await {
            Ok(outcome) => {
                const CHUNK_BYTES: usize = 120;
                let bytes = outcome.text.as_bytes();
                let chunks: Vec<&[u8]> = bytes.chunks(CHUNK_BYTES).collect();
                let total = chunks.len().max(1);
                for (i, chunk) in chunks.iter().enumerate() {
                    crate::event_bus::AGENCY_EVENT_BUS.publish(AgencyEvent::OpsStreamChunk {
                        op_id: op_id.clone(),
                        seq: i as u32,
                        text: String::from_utf8_lossy(chunk).into_owned(),
                        done: i + 1 == total,
                    });
                }
                if chunks.is_empty() {
                    crate::event_bus::AGENCY_EVENT_BUS.publish(AgencyEvent::OpsStreamChunk {
                        op_id: op_id.clone(),
                        seq: 0,
                        text: String::new(),
                        done: true,
                    });
                }
            }
            Err(e) => {
                warn!("ops.stream failed for {op_id}: {e}");
            }
        }
    });
    Json(Envelope::ok(serde_json::json!({ "accepted": true, "op_id": response_op_id }))).into_response()
}

#[derive(Deserialize)]
struct SessionCreateRequest {
    session_id: Option<String>,
    user_id: String,
    #[serde(default = "default_origin")]
    origin: Origin,
}

fn default_origin() -> Origin {
    Origin::Local
}

async fn sessions_create(State(state): State<AppState>, Json(body): Json<SessionCreateRequest>) -> Response {
    let session_id = body.session_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let session = Session::new(session_id.clone(), body.user_id, body.origin);
    match state.sync_engine.register(session).await {
        Ok(()) => Json(Envelope::ok(serde_json::json!({ "session_id": session_id }))).into_response(),
        Err(e) => Json(Envelope::<Value>::err(e)).into_response(),
    }
}

#[derive(Deserialize)]
struct SessionResumeRequest {
    session_id: String,
    canonical: Session,
}

async fn sessions_resume(State(state): State<AppState>, Json(body): Json<SessionResumeRequest>) -> Response {
    match state.sync_engine.resume(&body.session_id, body.canonical).await {
        Ok(()) => Json(Envelope::ok(serde_json::json!({ "session_id": body.session_id }))).into_response(),
        Err(e) => Json(Envelope::<Value>::err(e)).into_response(),
    }
}

#[derive(Deserialize)]
struct SessionTransferRequest {
    session_id: String,
    to_origin: Origin,
}

async fn sessions_transfer(State(state): State<AppState>, Json(body): Json<SessionTransferRequest>) -> Response {
    match state.sync_engine.transfer(&body.session_id, body.to_origin).await {
        Ok(()) => Json(Envelope::ok(serde_json::json!({ "session_id": body.session_id }))).into_response(),
        Err(e) => Json(Envelope::<Value>::err(e)).into_response(),
    }
}

#[derive(Deserialize)]
struct MemorySearchRequest {
    session_id: String,
    query: String,
}

async fn memory_search(State(state): State<AppState>, Json(body): Json<MemorySearchRequest>) -> Response {
    match state.sync_engine.search_messages(&body.session_id, &body.query).await {
        Ok(messages) => Json(Envelope::ok(serde_json::json!({ "messages": messages }))).into_response(),
        Err(e) => Json(Envelope::<Value>::err(e)).into_response(),
    }
}

#[derive(Deserialize)]
struct MemoryDeleteRequest {
    session_id: String,
    message_ids: Vec<String>,
}

async fn memory_delete(State(state): State<AppState>, Json(body): Json<MemoryDeleteRequest>) -> Response {
    match state.sync_engine.delete_messages(&body.session_id, &body.message_ids).await {
        Ok(removed) => Json(Envelope::ok(serde_json::json!({ "removed": removed }))).into_response(),
        Err(e) => Json(Envelope::<Value>::err(e)).into_response(),
    }
}

#[derive(Deserialize)]
struct DecideRequest {
    req_id: String,
    approved: bool,
    decider: String,
}

async fn approval_decide(State(state): State<AppState>, Json(body): Json<DecideRequest>) -> Response {
    let decided = state.approval_gate.decide(&body.req_id, body.approved, &body.decider).await;
    Json(Envelope::ok(serde_json::json!({ "decided": decided }))).into_response()
}

#[derive(Deserialize)]
struct ConfigSetRequest {
    key: String,
    value: String,
    reason: Option<String>,
    actor: String,
}

async fn config_set(State(state): State<AppState>, Json(body): Json<ConfigSetRequest>) -> Response {
    match state
        .config_guard
        .set(&body.key, &body.value, body.reason.as_deref(), &body.actor)
        .await
    {
        Ok(()) => Json(Envelope::ok(serde_json::json!({ "key": body.key }))).into_response(),
        Err(e) => Json(Envelope::<Value>::err(e)).into_response(),
    }
}

async fn chain_verify(State(state): State<AppState>) -> Response {
    match state.chain.verify().await {
        Ok(()) => Json(Envelope::ok(serde_json::json!({ "verified": true }))).into_response(),
        Err(failure) => Json(Envelope::ok(serde_json::json!({ "verified": false, "fail_at": failure.fail_at }))).into_response(),
    }
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| ws_handler(socket, state))
}

/// Forwards chain-append and approval-decision events to the socket,
/// matching the teacher's `ws_handler` broadcast-forwarding shape
/// (`server.rs`).
async fn ws_handler(mut socket: WebSocket, state: AppState) {
    let mut events = crate::event_bus::AGENCY_EVENT_BUS.subscribe();
    let _ = &state;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("ws client lagged by {n} events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("ws receive error: {e}");
                        break;
                    }
                }
            }
        }
    }
    info!("ws connection closed");
}
