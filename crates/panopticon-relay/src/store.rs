//! The persistence boundary the relay consumes.
//!
//! The relay treats these as opaque collaborators: it never locks around
//! them and relies on the store to serialize conflicting writes.
//! [`crate::storage::Storage`] is the SQLite implementation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use panopticon_core::{
    AccountSummary, AuditEntry, AuditRecord, Identity, Message, MessageId, MessageRecord, UserId,
};

use crate::error::StoreError;

pub type StoreResult<T> = Result<T, StoreError>;

/// Account lookups and the two flags moderation flips.
pub trait AccountStore: Send + Sync {
    fn find_by_id(&self, id: UserId) -> StoreResult<Option<Identity>>;

    /// Like [`AccountStore::find_by_id`] but skips deactivated accounts.
    fn find_active_by_id(&self, id: UserId) -> StoreResult<Option<Identity>>;

    /// Returns false when no such account exists.
    fn set_shadow_banned(&self, id: UserId, banned: bool) -> StoreResult<bool>;

    /// Returns false when no such account exists.
    fn set_active(&self, id: UserId, active: bool) -> StoreResult<bool>;

    fn record_login(&self, id: UserId) -> StoreResult<()>;

    /// Active accounts, most recent login first.
    fn list_active(&self) -> StoreResult<Vec<AccountSummary>>;
}

/// Message rows. Nothing here removes a row.
pub trait MessageStore: Send + Sync {
    /// Persist a new message; the store assigns id and timestamp.
    fn insert_message(&self, sender: UserId, receiver: UserId, content: &str)
    -> StoreResult<Message>;

    fn find_message(&self, id: MessageId) -> StoreResult<Option<Message>>;

    /// Flip the soft-delete flag if it is still clear. Returns whether this
    /// call applied it; the first actor and timestamp are never overwritten.
    fn soft_delete(&self, id: MessageId, actor: UserId) -> StoreResult<bool>;

    /// Both directions between `a` and `b`, oldest first, soft-deleted rows excluded.
    fn conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<MessageRecord>>;

    /// Latest visible message per partner of `user`.
    fn conversations(&self, user: UserId) -> StoreResult<Vec<ConversationSummary>>;

    /// Moderation view, newest first, soft-deleted rows included.
    fn all_messages(
        &self,
        filter: &MessageFilter,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<MessageRecord>>;
}

/// Append-only audit log.
pub trait AuditStore: Send + Sync {
    fn append(&self, entry: &AuditEntry) -> StoreResult<()>;

    /// Newest first.
    fn logs(&self, filter: &LogFilter, limit: usize, offset: usize)
    -> StoreResult<Vec<AuditRecord>>;
}

/// Everything the relay needs from persistence.
pub trait Persistence: AccountStore + MessageStore + AuditStore {}

impl<T: AccountStore + MessageStore + AuditStore> Persistence for T {}

/// Filters for the moderation message view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFilter {
    /// Only messages this user sent or received.
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub show_deleted_only: bool,
}

/// Filters for the audit log view.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogFilter {
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub action_type: Option<String>,
    #[serde(default)]
    pub severity: Option<String>,
}

/// One entry of a user's conversation list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub other_user_id: UserId,
    pub other_username: String,
    pub last_message: String,
    pub last_message_time: DateTime<Utc>,
}
