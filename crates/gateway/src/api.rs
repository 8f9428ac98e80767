//! The chat HTTP API.
//!
//! - `POST /api/stream`   — run one turn, answer streamed as plain text
//! - `GET  /api/messages` — latest messages of a session
//! - `POST /api/session`  — register a visitor session

use axum::{
    Json,
    body::Body,
    extract::{ConnectInfo, Query, State, rejection::JsonRejection},
    http::{Extensions, HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use sagebot_agent::{SinkClosed, StreamSink, TurnOutcome, TurnRequest};
use sagebot_core::error::TurnError;
use sagebot_core::store::{HistoryEntry, Session, StoredMessage};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::SharedState;

/// How many messages `GET /api/messages` returns.
pub const MESSAGES_PAGE: usize = 20;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorResponse {
                error: self.message,
            }),
        )
            .into_response()
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

// ── Streaming turn ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub page_url: Option<String>,
}

type BodyChunk = Result<String, Infallible>;

/// Writes turn output into the response body.
struct ChannelSink {
    tx: mpsc::Sender<BodyChunk>,
}

#[async_trait::async_trait]
impl StreamSink for ChannelSink {
    async fn on_chunk(&mut self, text: &str) -> Result<(), SinkClosed> {
        self.tx
            .send(Ok(text.to_string()))
            .await
            .map_err(|_| SinkClosed)
    }

    async fn on_error(&mut self, error: &TurnError) {
        if self.tx.send(Ok(error.terminal_fragment())).await.is_err() {
            debug!("Caller gone before the error fragment was written");
        }
    }
}

/// `POST /api/stream`
pub async fn stream_handler(
    State(state): State<SharedState>,
    payload: Result<Json<StreamRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let prompt = non_blank(payload.prompt)
        .ok_or_else(|| ApiError::bad_request("Prompt is required and must be a string."))?;
    let session_id = non_blank(payload.session_id)
        .ok_or_else(|| ApiError::bad_request("sessionId is required"))?;

    info!(session_id = %session_id, page_url = ?payload.page_url, "Stream request");

    let history = match state.messages.recent(&session_id, state.history_limit).await {
        Ok(recent) => HistoryEntry::from_recent(&recent),
        Err(e) => {
            warn!(session_id = %session_id, error = %e, "History unavailable, continuing without it");
            Vec::new()
        }
    };

    if let Err(e) = state
        .messages
        .append(StoredMessage::user(&session_id, &prompt))
        .await
    {
        warn!(session_id = %session_id, error = %e, "Failed to store user message");
    }

    let turn = TurnRequest {
        query: prompt,
        history,
        page_url: non_blank(payload.page_url),
    };

    let (tx, rx) = mpsc::channel::<BodyChunk>(64);
    tokio::spawn(run_turn(state, session_id, turn, tx));

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(ReceiverStream::new(rx)),
    )
        .into_response())
}

/// Run the turn and persist the answer. The body ends when the sink drops.
async fn run_turn(
    state: SharedState,
    session_id: String,
    turn: TurnRequest,
    tx: mpsc::Sender<BodyChunk>,
) {
    let mut sink = ChannelSink { tx };
    let outcome = state.engine.run(&turn, &mut sink).await;

    let answer = match &outcome {
        TurnOutcome::Answered { text, .. } => Some(StoredMessage::bot(&session_id, text)),
        TurnOutcome::Failed { partial, .. } if !partial.is_empty() => {
            Some(StoredMessage::bot(&session_id, partial).mark_partial())
        }
        TurnOutcome::Failed { .. } => None,
    };

    if let Some(message) = answer
        && let Err(e) = state.messages.append(message).await
    {
        warn!(session_id = %session_id, error = %e, "Failed to store bot message");
    }

    drop(sink);
}

// ── Messages ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesQuery {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesResponse {
    pub session_id: String,
    pub count: usize,
    pub messages: Vec<StoredMessage>,
}

/// `GET /api/messages?sessionId=`, newest first.
pub async fn messages_handler(
    State(state): State<SharedState>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessagesResponse>, ApiError> {
    let session_id = non_blank(query.session_id)
        .ok_or_else(|| ApiError::bad_request("sessionId is required"))?;

    let messages = state
        .messages
        .recent(&session_id, MESSAGES_PAGE)
        .await
        .map_err(|e| {
            warn!(error = %e, "Listing messages failed");
            ApiError::internal("Internal server error.")
        })?;

    Ok(Json(MessagesResponse {
        session_id,
        count: messages.len(),
        messages,
    }))
}

// ── Sessions ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub start_page: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// `true` when created, `"already-exists"` otherwise.
    pub message: serde_json::Value,
    pub device_id: String,
}

/// Coarse device class from a User-Agent string.
pub fn device_class(user_agent: &str) -> &'static str {
    let ua = user_agent.to_ascii_lowercase();
    if ua.contains("ipad") || ua.contains("tablet") {
        "tablet"
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        "mobile"
    } else {
        "desktop"
    }
}

/// `X-Forwarded-For` (first hop), else the peer address.
fn client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .or_else(|| {
            extensions
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
        .unwrap_or_else(|| "0.0.0.0".into())
}

fn header_str(headers: &HeaderMap, name: header::HeaderName) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// `POST /api/session`
pub async fn session_handler(
    State(state): State<SharedState>,
    headers: HeaderMap,
    extensions: Extensions,
    payload: Result<Json<SessionRequest>, JsonRejection>,
) -> Result<Json<SessionResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let device_id = non_blank(payload.device_id)
        .ok_or_else(|| ApiError::bad_request("deviceId is required"))?;

    let existing = state.sessions.get(&device_id).await.map_err(|e| {
        warn!(error = %e, "Session lookup failed");
        ApiError::internal("Server Error")
    })?;
    if existing.is_some() {
        return Ok(Json(SessionResponse {
            message: serde_json::Value::String("already-exists".into()),
            device_id,
        }));
    }

    let user_agent = header_str(&headers, header::USER_AGENT).unwrap_or_default();
    let language = non_blank(payload.language)
        .or_else(|| header_str(&headers, header::ACCEPT_LANGUAGE))
        .unwrap_or_default();
    let start_page = non_blank(payload.start_page);
    let now = Utc::now();

    let session = Session {
        session_id: device_id.clone(),
        user_id: payload.user_id,
        ip: client_ip(&headers, &extensions),
        device: device_class(&user_agent).to_string(),
        user_agent,
        language,
        referrer: non_blank(payload.referrer),
        pages: start_page.iter().cloned().collect(),
        start_page,
        created_at: now,
        updated_at: now,
    };

    state.sessions.create(session).await.map_err(|e| {
        warn!(error = %e, "Session create failed");
        ApiError::internal("Server Error")
    })?;
    info!(device_id = %device_id, "Session created");

    Ok(Json(SessionResponse {
        message: serde_json::Value::Bool(true),
        device_id,
    }))
}
