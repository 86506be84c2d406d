//! Core relay: connection lifecycle and per-event dispatch.
//!
//! Each connection authenticates once, joins its rooms, then has its inbound
//! frames handled strictly in arrival order by a single task. Outbound frames
//! travel through an unbounded channel owned by the membership registry, so a
//! slow socket never stalls a fan-out to anyone else.

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitStream;
use futures::{SinkExt, Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use panopticon_core::{ActionType, AuditEntry, Identity};

use crate::audit;
use crate::auth::IdentityVerifier;
use crate::config::RelayConfig;
use crate::error::{AuthError, RelayError};
use crate::protocol::{ClientEvent, ServerEvent};
use crate::registry::{ConnectionId, MembershipRegistry};
use crate::router::INVALID_MESSAGE_DATA;
use crate::store::{AccountStore, Persistence, StoreResult};

/// Shared relay state.
pub struct RelayState {
    /// Accounts, messages and the audit log.
    pub store: Arc<dyn Persistence>,
    /// Live connections and their rooms.
    pub registry: MembershipRegistry,
    pub verifier: IdentityVerifier,
    /// Bound on the time from upgrade to admission.
    pub handshake_timeout: Duration,
    /// Server start time (for uptime reporting).
    pub start_time: Instant,
}

/// One admitted connection. `identity` is the handshake snapshot.
#[derive(Debug, Clone)]
pub struct Session {
    pub connection: ConnectionId,
    pub identity: Identity,
}

impl RelayState {
    pub fn new(store: Arc<dyn Persistence>, config: &RelayConfig) -> Self {
        Self {
            store,
            registry: MembershipRegistry::new(),
            verifier: IdentityVerifier::new(&config.jwt),
            handshake_timeout: config.handshake_timeout,
            start_time: Instant::now(),
        }
    }

    /// The caller's account as stored now, if still active.
    pub(crate) fn current_identity(&self, session: &Session) -> StoreResult<Option<Identity>> {
        self.store.find_active_by_id(session.identity.id)
    }

    pub(crate) async fn reply(&self, session: &Session, event: ServerEvent) {
        if !self.registry.emit_to_connection(session.connection, &event).await {
            debug!("Reply to {} dropped, connection gone", session.connection);
        }
    }

    /// Handle one inbound text frame. Never fails the connection.
    pub async fn dispatch(&self, session: &Session, text: &str) {
        let value = match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(e) => {
                warn!(
                    "Ignoring unparseable frame from {}: {e}",
                    session.identity.username
                );
                return;
            }
        };
        let event = match ClientEvent::deserialize(&value) {
            Ok(event) => event,
            Err(e) => {
                let kind = value.get("type").and_then(Value::as_str).unwrap_or_default();
                warn!(
                    "Malformed {kind:?} frame from {}: {e}",
                    session.identity.username
                );
                self.reject_malformed(session, kind).await;
                return;
            }
        };
        let name = event.name();

        match event {
            ClientEvent::Authenticate { .. } => {
                debug!("{} re-sent authenticate, ignoring", session.identity.username);
            }
            ClientEvent::SendMessage { receiver_id, content } => {
                let result = self
                    .route_message(session, receiver_id.as_deref(), content.as_deref())
                    .await;
                if let Err(e) = result {
                    log_failure(session, name, &e);
                    let error = e.client_message().to_string();
                    self.reply(session, ServerEvent::MessageError { error }).await;
                }
            }
            ClientEvent::DeleteMessage { message_id } => {
                if let Err(e) = self.delete_message(session, message_id.as_deref()).await {
                    log_failure(session, name, &e);
                    let error = e.client_message().to_string();
                    self.reply(session, ServerEvent::DeleteError { error }).await;
                }
            }
            ClientEvent::Typing { receiver_id } => {
                self.signal_typing(session, receiver_id.as_deref(), true).await;
            }
            ClientEvent::StopTyping { receiver_id } => {
                self.signal_typing(session, receiver_id.as_deref(), false).await;
            }
            ClientEvent::MarkRead { message_id } => {
                self.mark_read(session, message_id.as_deref()).await;
            }
            ClientEvent::GetActiveUsers {} => {
                let result = self.active_users(session).await;
                self.finish_admin(session, name, result).await;
            }
            ClientEvent::GetAllMessages { user_id, show_deleted_only } => {
                let result = self
                    .all_messages(session, user_id.as_deref(), show_deleted_only)
                    .await;
                self.finish_admin(session, name, result).await;
            }
            ClientEvent::ToggleShadowBan { user_id, shadow_ban } => {
                let result = self
                    .toggle_shadow_ban(session, user_id.as_deref(), shadow_ban)
                    .await;
                self.finish_admin(session, name, result).await;
            }
            ClientEvent::GetLogs { user_id, action_type, severity } => {
                let result = self
                    .audit_logs(session, user_id.as_deref(), action_type, severity)
                    .await;
                self.finish_admin(session, name, result).await;
            }
        }
    }

    /// Answer a known event whose body did not decode. Unknown event types
    /// and ephemeral signals get no reply.
    async fn reject_malformed(&self, session: &Session, kind: &str) {
        let reply = match kind {
            "send_message" => ServerEvent::MessageError { error: INVALID_MESSAGE_DATA.to_string() },
            "delete_message" => ServerEvent::DeleteError { error: "Message ID required".to_string() },
            admin if admin.starts_with("admin:") => ServerEvent::Error {
                message: "Invalid request data".to_string(),
            },
            _ => return,
        };
        self.reply(session, reply).await;
    }

    async fn finish_admin(&self, session: &Session, name: &str, result: Result<(), RelayError>) {
        if let Err(e) = result {
            log_failure(session, name, &e);
            let message = e.client_message().to_string();
            self.reply(session, ServerEvent::Error { message }).await;
        }
    }
}

fn log_failure(session: &Session, event: &str, err: &RelayError) {
    let user = &session.identity.username;
    match err {
        RelayError::SendFailed(_) | RelayError::DeleteFailed(_) | RelayError::AdminFailed(..) => {
            error!("{event} from {user} failed: {err}");
        }
        _ => warn!("{event} from {user} rejected: {err}"),
    }
}

/// Drive one upgraded WebSocket from handshake to close.
///
/// `token` is the credential found on the upgrade request, if any. Without
/// one, the first frame must be `authenticate`.
pub async fn handle_connection(socket: WebSocket, state: Arc<RelayState>, token: Option<String>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let admitted = tokio::time::timeout(
        state.handshake_timeout,
        authenticate_socket(&state, token, &mut ws_rx),
    )
    .await
    .unwrap_or(Err(AuthError::Timeout));

    let identity = match admitted {
        Ok(identity) => identity,
        Err(e) => {
            match &e {
                AuthError::Store(_) => error!("Connection rejected: {e}"),
                _ => warn!("Connection rejected: {e}"),
            }
            let frame = CloseFrame {
                code: e.close_code(),
                reason: e.reason().into(),
            };
            let _ = ws_tx.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection = state.registry.join(&identity, tx).await;
    if let Err(e) = state.store.record_login(identity.id) {
        warn!("Failed to record login for {}: {e}", identity.username);
    }
    audit::record(
        &*state.store,
        AuditEntry::new(identity.id, ActionType::SocketConnected),
    );
    info!(
        "Connected: {} ({}) as {connection}",
        identity.username, identity.role
    );

    let session = Session { connection, identity };

    // Forward registry frames to this client.
    let mut send_task = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    // Read incoming frames, one at a time, in order.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let recv_state = state.clone();
    let recv_session = session.clone();
    let mut recv_task = tokio::spawn(async move {
        pump_frames(&recv_state, &recv_session, ws_rx, shutdown_rx).await;
    });

    // Wait for either task to finish. A frame already in dispatch is never
    // cut short: the reader is asked to stop and then awaited.
    tokio::select! {
        _ = &mut send_task => {
            let _ = shutdown_tx.send(true);
            let _ = recv_task.await;
        }
        _ = &mut recv_task => send_task.abort(),
    }

    state.registry.leave(session.connection).await;
    audit::record(
        &*state.store,
        AuditEntry::new(session.identity.id, ActionType::SocketDisconnected),
    );
    info!("Disconnected: {} ({})", session.identity.username, session.connection);
}

/// Dispatch inbound frames in arrival order until the client closes or
/// `shutdown` fires. Shutdown is only observed between frames.
async fn pump_frames<S>(
    state: &RelayState,
    session: &Session,
    mut frames: S,
    mut shutdown: watch::Receiver<bool>,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            frame = frames.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => state.dispatch(session, &text).await,
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
            Some(Ok(_)) => {}
        }
    }
}

async fn authenticate_socket(
    state: &RelayState,
    token: Option<String>,
    ws_rx: &mut SplitStream<WebSocket>,
) -> Result<Identity, AuthError> {
    let token = match token {
        Some(token) => token,
        None => await_credential(ws_rx).await?,
    };
    if token.trim().is_empty() {
        return Err(AuthError::MissingToken);
    }
    state.verifier.authenticate(token.trim(), &*state.store)
}

/// Wait for the first text frame and take its token.
async fn await_credential(ws_rx: &mut SplitStream<WebSocket>) -> Result<String, AuthError> {
    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Text(text) => {
                return match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(ClientEvent::Authenticate { token }) => Ok(token),
                    _ => Err(AuthError::MissingToken),
                };
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    Err(AuthError::MissingToken)
}
