//! HTTP surface: the WebSocket upgrade, health, and read-only message views.
//!
//! Endpoints:
//! - GET /ws: relay socket (token via `?token=`, header, or first frame)
//! - GET /health: liveness
//! - GET /api/stats: live connection count and uptime
//! - GET /api/messages/conversation/{userId}: caller's conversation, soft-deleted rows hidden
//! - GET /api/messages/conversations: caller's partners with their latest message
//! - GET /api/admin/messages: moderation view, soft-deleted rows included

use axum::{
    Json, Router,
    extract::{
        Path, Query, State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use panopticon_core::{Identity, parse_id};

use crate::auth::bearer_token;
use crate::error::{AuthError, StoreError};
use crate::relay::{self, RelayState};
use crate::store::{MessageFilter, MessageStore};

const DEFAULT_PAGE: usize = 100;
const MAX_PAGE: usize = 500;

/// Build the full application router.
pub fn router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/messages/conversation/{user_id}", get(conversation))
        .route("/api/messages/conversations", get(conversations))
        .route("/api/admin/messages", get(admin_messages))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Failures of an HTTP request, rendered as `{success:false,error}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Access token required")]
    MissingToken,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Account is deactivated")]
    Deactivated,

    #[error("Admin access required")]
    Forbidden,

    #[error("{0}")]
    BadRequest(&'static str),

    #[error("Internal server error")]
    Store(#[from] StoreError),
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingToken | AuthError::Timeout => ApiError::MissingToken,
            AuthError::InvalidToken(_) | AuthError::UnknownUser => ApiError::InvalidToken,
            AuthError::AccountDeactivated => ApiError::Deactivated,
            AuthError::Store(e) => ApiError::Store(e),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::MissingToken | ApiError::InvalidToken => StatusCode::UNAUTHORIZED,
            ApiError::Deactivated | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Store(e) => {
                error!("HTTP request failed: {e}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let body = Json(json!({ "success": false, "error": self.to_string() }));
        (status, body).into_response()
    }
}

/// Query params for GET /ws.
#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

/// Query params for GET /api/admin/messages.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminMessagesQuery {
    pub user_id: Option<String>,
    #[serde(default)]
    pub show_deleted_only: bool,
    /// Max rows to return (default 100, capped at 500).
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/stats
async fn stats(State(state): State<Arc<RelayState>>) -> impl IntoResponse {
    Json(json!({
        "connections": state.registry.connection_count().await,
        "uptimeSecs": state.start_time.elapsed().as_secs(),
    }))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let token = params.token.or_else(|| header_token(&headers).map(str::to_string));
    ws.on_upgrade(move |socket| handle_socket(socket, state, token))
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>, token: Option<String>) {
    relay::handle_connection(socket, state, token).await;
}

fn header_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(bearer_token)
}

/// Resolve the bearer token on an HTTP request to a current identity.
fn caller(state: &RelayState, headers: &HeaderMap) -> Result<Identity, ApiError> {
    let token = header_token(headers).ok_or(ApiError::MissingToken)?;
    Ok(state.verifier.authenticate(token, &*state.store)?)
}

/// GET /api/messages/conversation/{userId}
async fn conversation(
    State(state): State<Arc<RelayState>>,
    Path(user_id): Path<String>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let me = caller(&state, &headers)?;
    let other = parse_id(&user_id).map_err(|_| ApiError::BadRequest("Invalid user ID"))?;
    let messages = state.store.conversation(me.id, other)?;
    Ok(Json(json!({ "success": true, "messages": messages })))
}

/// GET /api/messages/conversations
async fn conversations(
    State(state): State<Arc<RelayState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let me = caller(&state, &headers)?;
    let conversations = state.store.conversations(me.id)?;
    Ok(Json(json!({ "success": true, "conversations": conversations })))
}

/// GET /api/admin/messages
async fn admin_messages(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<AdminMessagesQuery>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let me = caller(&state, &headers)?;
    if !me.role.can_moderate() {
        warn!("{} requested the admin message view", me.username);
        return Err(ApiError::Forbidden);
    }

    let user_id = match query.user_id.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => Some(parse_id(raw).map_err(|_| ApiError::BadRequest("Invalid user ID"))?),
        None => None,
    };
    let filter = MessageFilter {
        user_id,
        show_deleted_only: query.show_deleted_only,
    };
    let limit = query.limit.unwrap_or(DEFAULT_PAGE).min(MAX_PAGE);
    let offset = query.offset.unwrap_or(0);

    let messages = state.store.all_messages(&filter, limit, offset)?;
    Ok(Json(json!({
        "success": true,
        "count": messages.len(),
        "messages": messages,
    })))
}
