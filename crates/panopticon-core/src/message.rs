//! Direct messages.
//!
//! A message row is never removed. Deletion flips `soft_deleted` once and
//! records who did it; ordinary conversation reads skip such rows while the
//! moderation views keep showing them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::UserId;

/// Message key, assigned by the message store on insert.
pub type MessageId = Uuid;

/// A persisted direct message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub soft_deleted: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub deleted_by: Option<UserId>,
}

/// A message joined with both parties' usernames, as the read views return it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    #[serde(flatten)]
    pub message: Message,
    pub sender_username: String,
    pub receiver_username: String,
}
