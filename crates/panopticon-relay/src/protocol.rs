//! Wire protocol: JSON frames tagged by `"type"`.
//!
//! Event names are part of the client contract and are spelled exactly as
//! clients expect them, including the `admin:` prefix on privileged events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use panopticon_core::{
    AccountSummary, AuditRecord, Identity, Message, MessageId, MessageRecord, Role, UserId,
};

/// Frames a client may send.
///
/// Identifier fields stay as raw strings here; handlers parse them so a bad
/// id can be answered with the right error instead of dropping the frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ClientEvent {
    #[serde(rename = "authenticate")]
    Authenticate { token: String },

    #[serde(rename = "send_message")]
    SendMessage {
        receiver_id: Option<String>,
        content: Option<String>,
    },

    #[serde(rename = "delete_message")]
    DeleteMessage { message_id: Option<String> },

    #[serde(rename = "typing")]
    Typing { receiver_id: Option<String> },

    #[serde(rename = "stop_typing")]
    StopTyping { receiver_id: Option<String> },

    #[serde(rename = "mark_read")]
    MarkRead { message_id: Option<String> },

    #[serde(rename = "admin:get_active_users")]
    GetActiveUsers {},

    #[serde(rename = "admin:get_all_messages")]
    GetAllMessages {
        user_id: Option<String>,
        #[serde(default)]
        show_deleted_only: bool,
    },

    #[serde(rename = "admin:toggle_shadow_ban")]
    ToggleShadowBan {
        user_id: Option<String>,
        shadow_ban: bool,
    },

    #[serde(rename = "admin:get_logs")]
    GetLogs {
        user_id: Option<String>,
        action_type: Option<String>,
        severity: Option<String>,
    },
}

impl ClientEvent {
    /// Event name as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Authenticate { .. } => "authenticate",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::DeleteMessage { .. } => "delete_message",
            ClientEvent::Typing { .. } => "typing",
            ClientEvent::StopTyping { .. } => "stop_typing",
            ClientEvent::MarkRead { .. } => "mark_read",
            ClientEvent::GetActiveUsers {} => "admin:get_active_users",
            ClientEvent::GetAllMessages { .. } => "admin:get_all_messages",
            ClientEvent::ToggleShadowBan { .. } => "admin:toggle_shadow_ban",
            ClientEvent::GetLogs { .. } => "admin:get_logs",
        }
    }
}

/// Delivery state reported with a message. Only one value ever goes out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Delivered,
}

/// The message shape shared by `message_sent`, `new_message` and
/// `intercepted_message`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: MessageId,
    pub sender_id: UserId,
    pub sender_username: String,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub status: DeliveryStatus,
}

impl MessagePayload {
    pub fn from_message(message: &Message, sender_username: &str) -> Self {
        Self {
            id: message.id,
            sender_id: message.sender_id,
            sender_username: sender_username.to_string(),
            receiver_id: message.receiver_id,
            content: message.content.clone(),
            created_at: message.created_at,
            status: DeliveryStatus::Delivered,
        }
    }

    /// An acknowledgment for a message that was never stored.
    pub fn ephemeral(sender: &Identity, receiver_id: UserId, content: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_id: sender.id,
            sender_username: sender.username.clone(),
            receiver_id,
            content: content.to_string(),
            created_at: Utc::now(),
            status: DeliveryStatus::Delivered,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: UserId,
    pub username: String,
}

/// Who performed a moderation action and under which role.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorRef {
    pub id: UserId,
    pub username: String,
    pub role: Role,
}

impl From<&Identity> for UserRef {
    fn from(identity: &Identity) -> Self {
        Self { id: identity.id, username: identity.username.clone() }
    }
}

impl From<&Identity> for ActorRef {
    fn from(identity: &Identity) -> Self {
        Self {
            id: identity.id,
            username: identity.username.clone(),
            role: identity.role,
        }
    }
}

/// Frames the relay sends.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    #[serde(rename = "monitoring_active")]
    MonitoringActive {
        message: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "message_sent")]
    MessageSent(MessagePayload),

    #[serde(rename = "new_message")]
    NewMessage(MessagePayload),

    #[serde(rename = "intercepted_message")]
    InterceptedMessage {
        #[serde(flatten)]
        message: MessagePayload,
        intercepted: bool,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "shadow_banned_message")]
    ShadowBannedMessage {
        id: Uuid,
        sender: UserRef,
        receiver_id: UserId,
        content: String,
        blocked: bool,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "message_error")]
    MessageError { error: String },

    #[serde(rename = "message_deleted")]
    MessageDeleted { message_id: MessageId },

    #[serde(rename = "message_deleted_event")]
    MessageDeletedEvent {
        message_id: MessageId,
        deleted_by: ActorRef,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "delete_error")]
    DeleteError { error: String },

    #[serde(rename = "user_typing")]
    UserTyping { user_id: UserId, username: String },

    #[serde(rename = "user_stop_typing")]
    UserStopTyping { user_id: UserId, username: String },

    #[serde(rename = "typing_event")]
    TypingEvent {
        sender: UserRef,
        receiver_id: UserId,
        typing: bool,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "message_read")]
    MessageRead {
        message_id: MessageId,
        read_by: UserId,
        read_at: DateTime<Utc>,
    },

    #[serde(rename = "message_read_event")]
    MessageReadEvent {
        message_id: MessageId,
        read_by: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "admin:active_users")]
    ActiveUsers {
        users: Vec<AccountSummary>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "admin:all_messages")]
    AllMessages {
        messages: Vec<MessageRecord>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "admin:logs")]
    Logs {
        logs: Vec<AuditRecord>,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "admin:shadow_ban_updated")]
    ShadowBanUpdated {
        user_id: UserId,
        shadow_ban: bool,
        performed_by: String,
        timestamp: DateTime<Utc>,
    },

    #[serde(rename = "admin:shadow_ban_success")]
    ShadowBanSuccess {
        user_id: UserId,
        shadow_ban: bool,
        message: String,
    },

    #[serde(rename = "error")]
    Error { message: String },
}
