//! Deletion propagator.
//!
//! Participants learn only that a message is gone. Monitors learn who removed
//! it and under which role.

use chrono::Utc;
use serde_json::json;
use tracing::info;

use panopticon_core::{ActionType, AuditEntry, Severity, parse_id};

use crate::audit;
use crate::error::RelayError;
use crate::protocol::{ActorRef, ServerEvent};
use crate::registry::RoomKey;
use crate::relay::{RelayState, Session};
use crate::store::MessageStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// This call set the flag.
    Deleted,
    /// The flag was already set; nothing changed.
    AlreadyDeleted,
}

impl RelayState {
    pub async fn delete_message(
        &self,
        session: &Session,
        message_id: Option<&str>,
    ) -> Result<DeleteOutcome, RelayError> {
        let raw = message_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(RelayError::InvalidPayload("Message ID required"))?;
        let message_id = parse_id(raw).map_err(|_| RelayError::MessageNotFound)?;

        let message = self
            .store
            .find_message(message_id)
            .map_err(RelayError::DeleteFailed)?
            .ok_or(RelayError::MessageNotFound)?;

        let actor = self
            .current_identity(session)
            .map_err(RelayError::DeleteFailed)?
            .ok_or(RelayError::Unauthorized)?;

        if !actor.may_delete_from(message.sender_id) {
            audit::record(
                &*self.store,
                AuditEntry::new(actor.id, ActionType::UnauthorizedDeleteAttempt)
                    .severity(Severity::Warning)
                    .target_user(message.sender_id)
                    .target_message(message.id)
                    .metadata(json!({ "role": actor.role })),
            );
            return Err(RelayError::Unauthorized);
        }

        let applied = self
            .store
            .soft_delete(message.id, actor.id)
            .map_err(RelayError::DeleteFailed)?;

        audit::record(
            &*self.store,
            AuditEntry::new(actor.id, ActionType::MessageDeleted)
                .target_user(message.sender_id)
                .target_message(message.id)
                .metadata(json!({ "deletedBy": actor.role, "alreadyDeleted": !applied })),
        );

        let deleted = ServerEvent::MessageDeleted { message_id: message.id };
        self.registry.emit_to_connection(session.connection, &deleted).await;

        if !applied {
            info!("{} re-deleted message {}", actor.username, message.id);
            return Ok(DeleteOutcome::AlreadyDeleted);
        }

        self.registry
            .emit_to_room(RoomKey::Own(message.receiver_id), &deleted)
            .await;
        self.registry
            .emit_to_room(
                RoomKey::Monitor,
                &ServerEvent::MessageDeletedEvent {
                    message_id: message.id,
                    deleted_by: ActorRef::from(&actor),
                    timestamp: Utc::now(),
                },
            )
            .await;

        info!("Message {} deleted by {} ({})", message.id, actor.username, actor.role);
        Ok(DeleteOutcome::Deleted)
    }
}
