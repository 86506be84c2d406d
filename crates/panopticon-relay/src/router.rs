//! Message router: one sender, one receiver, and the monitors watching both.

use chrono::Utc;
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use panopticon_core::audit::{CONTENT_PREVIEW_CHARS, preview};
use panopticon_core::{ActionType, AuditEntry, Identity, MessageId, Severity, UserId, parse_id};

use crate::audit;
use crate::error::RelayError;
use crate::protocol::{MessagePayload, ServerEvent, UserRef};
use crate::registry::RoomKey;
use crate::relay::{RelayState, Session};
use crate::store::{AccountStore, MessageStore};

pub(crate) const INVALID_MESSAGE_DATA: &str = "Invalid message data";

/// What happened to an accepted send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// Stored and fanned out.
    Delivered(MessageId),
    /// Sender is shadow-banned. Only the sender's ack and the monitors saw it.
    Suppressed(Uuid),
}

impl RelayState {
    /// Route `content` from the session's user to `receiver_id`.
    ///
    /// On success the sender ack, the receiver room and the monitoring room are
    /// served in that order, all with the same payload.
    pub async fn route_message(
        &self,
        session: &Session,
        receiver_id: Option<&str>,
        content: Option<&str>,
    ) -> Result<RouteOutcome, RelayError> {
        let content = content
            .filter(|c| !c.trim().is_empty())
            .ok_or(RelayError::InvalidPayload(INVALID_MESSAGE_DATA))?;
        let receiver_id = receiver_id
            .and_then(|raw| parse_id(raw).ok())
            .ok_or(RelayError::InvalidPayload(INVALID_MESSAGE_DATA))?;

        let sender = self
            .current_identity(session)
            .map_err(RelayError::SendFailed)?
            .ok_or(RelayError::SenderMissing)?;

        if sender.shadow_banned {
            return Ok(self.suppress(session, &sender, receiver_id, content).await);
        }

        let receiver = self
            .store
            .find_active_by_id(receiver_id)
            .map_err(RelayError::SendFailed)?
            .ok_or(RelayError::ReceiverNotFound)?;

        let message = self
            .store
            .insert_message(sender.id, receiver.id, content)
            .map_err(RelayError::SendFailed)?;

        audit::record(
            &*self.store,
            AuditEntry::new(sender.id, ActionType::MessageSent)
                .target_user(receiver.id)
                .target_message(message.id)
                .metadata(json!({ "contentLength": content.chars().count() })),
        );

        let payload = MessagePayload::from_message(&message, &sender.username);
        self.registry
            .emit_to_connection(session.connection, &ServerEvent::MessageSent(payload.clone()))
            .await;
        self.registry
            .emit_to_room(RoomKey::Own(receiver.id), &ServerEvent::NewMessage(payload.clone()))
            .await;
        let monitors = self
            .registry
            .emit_to_room(
                RoomKey::Monitor,
                &ServerEvent::InterceptedMessage {
                    message: payload,
                    intercepted: true,
                    timestamp: Utc::now(),
                },
            )
            .await;

        debug!(
            "Message {} {} -> {} ({monitors} monitors)",
            message.id, sender.username, receiver.username
        );
        Ok(RouteOutcome::Delivered(message.id))
    }

    /// Fake a successful send to a shadow-banned sender and show monitors the truth.
    async fn suppress(
        &self,
        session: &Session,
        sender: &Identity,
        receiver_id: UserId,
        content: &str,
    ) -> RouteOutcome {
        let ack = MessagePayload::ephemeral(sender, receiver_id, content);
        let ephemeral_id = ack.id;
        self.registry
            .emit_to_connection(session.connection, &ServerEvent::MessageSent(ack))
            .await;

        audit::record(
            &*self.store,
            AuditEntry::new(sender.id, ActionType::ShadowBannedMessageBlocked)
                .severity(Severity::Warning)
                .target_user(receiver_id)
                .metadata(json!({ "content": preview(content, CONTENT_PREVIEW_CHARS) })),
        );

        self.registry
            .emit_to_room(
                RoomKey::Monitor,
                &ServerEvent::ShadowBannedMessage {
                    id: ephemeral_id,
                    sender: UserRef::from(sender),
                    receiver_id,
                    content: content.to_string(),
                    blocked: true,
                    timestamp: Utc::now(),
                },
            )
            .await;

        info!(
            "Blocked message from shadow-banned {} to {receiver_id}",
            sender.username
        );
        RouteOutcome::Suppressed(ephemeral_id)
    }
}
