//! Append-only audit entries.
//!
//! Every state-changing relay operation leaves one of these behind. The relay
//! only ever writes them; the admin log view reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::identity::UserId;
use crate::message::MessageId;

/// Blocked-message audits keep at most this many characters of content.
pub const CONTENT_PREVIEW_CHARS: usize = 100;

/// How loudly an entry should surface in reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl FromStr for Severity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Severity::Info),
            "WARNING" => Ok(Severity::Warning),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(Error::UnknownSeverity(other.to_string())),
        }
    }
}

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    SocketConnected,
    SocketDisconnected,
    MessageSent,
    ShadowBannedMessageBlocked,
    MessageDeleted,
    UnauthorizedDeleteAttempt,
    UnauthorizedAdminAccess,
    AdminViewedAllMessages,
    UserShadowBanned,
    UserShadowUnbanned,
}

const ACTIONS: [(ActionType, &str); 10] = [
    (ActionType::SocketConnected, "SOCKET_CONNECTED"),
    (ActionType::SocketDisconnected, "SOCKET_DISCONNECTED"),
    (ActionType::MessageSent, "MESSAGE_SENT"),
    (ActionType::ShadowBannedMessageBlocked, "SHADOW_BANNED_MESSAGE_BLOCKED"),
    (ActionType::MessageDeleted, "MESSAGE_DELETED"),
    (ActionType::UnauthorizedDeleteAttempt, "UNAUTHORIZED_DELETE_ATTEMPT"),
    (ActionType::UnauthorizedAdminAccess, "UNAUTHORIZED_ADMIN_ACCESS"),
    (ActionType::AdminViewedAllMessages, "ADMIN_VIEWED_ALL_MESSAGES"),
    (ActionType::UserShadowBanned, "USER_SHADOW_BANNED"),
    (ActionType::UserShadowUnbanned, "USER_SHADOW_UNBANNED"),
];

impl ActionType {
    pub fn as_str(self) -> &'static str {
        ACTIONS
            .iter()
            .find(|(action, _)| *action == self)
            .map(|(_, name)| *name)
            .unwrap_or("UNKNOWN")
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ACTIONS
            .iter()
            .find(|(_, name)| *name == s)
            .map(|(action, _)| *action)
            .ok_or_else(|| Error::UnknownAction(s.to_string()))
    }
}

/// One audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub actor_id: UserId,
    pub action_type: ActionType,
    pub target_user_id: Option<UserId>,
    pub target_message_id: Option<MessageId>,
    pub severity: Severity,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    /// Start an INFO entry with empty metadata.
    pub fn new(actor_id: UserId, action_type: ActionType) -> Self {
        Self {
            actor_id,
            action_type,
            target_user_id: None,
            target_message_id: None,
            severity: Severity::Info,
            metadata: Value::Object(Default::default()),
            created_at: Utc::now(),
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn target_user(mut self, user: UserId) -> Self {
        self.target_user_id = Some(user);
        self
    }

    pub fn target_message(mut self, message: MessageId) -> Self {
        self.target_message_id = Some(message);
        self
    }

    pub fn metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// A stored entry as the admin log view returns it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub id: i64,
    #[serde(flatten)]
    pub entry: AuditEntry,
    pub actor_username: Option<String>,
}

/// The first `max_chars` characters of `content`, cut on a char boundary.
pub fn preview(content: &str, max_chars: usize) -> String {
    content.chars().take(max_chars).collect()
}
