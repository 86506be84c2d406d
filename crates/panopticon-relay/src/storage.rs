//! SQLite persistence for accounts, direct messages, and the audit log.
//!
//! Message rows are never deleted here. Soft deletion is a one-way flag
//! guarded in SQL, so concurrent deleters cannot overwrite the first actor.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;
use uuid::Uuid;

use panopticon_core::{
    AccountSummary, AuditEntry, AuditRecord, Identity, Message, MessageId, MessageRecord, Role,
    UserId,
};

use crate::error::StoreError;
use crate::store::{
    AccountStore, AuditStore, ConversationSummary, LogFilter, MessageFilter, MessageStore,
    StoreResult,
};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS users (
        id               TEXT PRIMARY KEY,
        username         TEXT NOT NULL UNIQUE COLLATE NOCASE,
        role             TEXT NOT NULL DEFAULT 'user',
        is_shadow_banned INTEGER NOT NULL DEFAULT 0,
        is_active        INTEGER NOT NULL DEFAULT 1,
        created_at       TEXT NOT NULL,
        last_login       TEXT
    );

    CREATE TABLE IF NOT EXISTS messages (
        id              TEXT PRIMARY KEY,
        sender_id       TEXT NOT NULL REFERENCES users(id),
        receiver_id     TEXT NOT NULL REFERENCES users(id),
        content         TEXT NOT NULL,
        created_at      TEXT NOT NULL,
        is_soft_deleted INTEGER NOT NULL DEFAULT 0,
        deleted_at      TEXT,
        deleted_by      TEXT REFERENCES users(id)
    );

    CREATE INDEX IF NOT EXISTS idx_messages_sender
        ON messages(sender_id, receiver_id);
    CREATE INDEX IF NOT EXISTS idx_messages_receiver
        ON messages(receiver_id, sender_id);

    CREATE TABLE IF NOT EXISTS logs (
        id                INTEGER PRIMARY KEY AUTOINCREMENT,
        user_id           TEXT NOT NULL,
        action_type       TEXT NOT NULL,
        target_user_id    TEXT,
        target_message_id TEXT,
        severity          TEXT NOT NULL DEFAULT 'INFO',
        metadata          TEXT NOT NULL DEFAULT '{}',
        created_at        TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_logs_user
        ON logs(user_id);
    CREATE INDEX IF NOT EXISTS idx_logs_action
        ON logs(action_type);";

const USER_COLUMNS: &str = "id, username, role, is_shadow_banned, is_active";

const RECORD_SELECT: &str = "SELECT m.id, m.sender_id, m.receiver_id, m.content, m.created_at,
            m.is_soft_deleted, m.deleted_at, m.deleted_by, u1.username, u2.username
     FROM messages m
     JOIN users u1 ON m.sender_id = u1.id
     JOIN users u2 ON m.receiver_id = u2.id";

/// Persistent storage backed by SQLite.
pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open or create the database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrent read/write performance.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let storage = Self::init(conn)?;
        info!("Database opened: {}", path.display());
        Ok(storage)
    }

    /// A private database that lives as long as the handle.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert a new account.
    pub fn create_account(&self, identity: &Identity) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO users (id, username, role, is_shadow_banned, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                identity.id.to_string(),
                identity.username,
                identity.role.as_str(),
                identity.shadow_banned,
                identity.active,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_username(&self, username: &str) -> StoreResult<Option<Identity>> {
        let conn = self.conn()?;
        let identity = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE username = ?1"),
                params![username],
                |row| identity_at(row, 0),
            )
            .optional()?;
        Ok(identity)
    }

    /// Create `username` with `role`, or move an existing account to `role`.
    pub fn upsert_account(&self, username: &str, role: Role) -> StoreResult<Identity> {
        if let Some(mut existing) = self.find_by_username(username)? {
            if existing.role != role {
                let conn = self.conn()?;
                conn.execute(
                    "UPDATE users SET role = ?1 WHERE id = ?2",
                    params![role.as_str(), existing.id.to_string()],
                )?;
                existing.role = role;
            }
            return Ok(existing);
        }

        let identity = Identity::new(username, role);
        self.create_account(&identity)?;
        info!("Account '{username}' created with role {role}");
        Ok(identity)
    }
}

impl AccountStore for Storage {
    fn find_by_id(&self, id: UserId) -> StoreResult<Option<Identity>> {
        let conn = self.conn()?;
        let identity = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                |row| identity_at(row, 0),
            )
            .optional()?;
        Ok(identity)
    }

    fn find_active_by_id(&self, id: UserId) -> StoreResult<Option<Identity>> {
        let conn = self.conn()?;
        let identity = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1 AND is_active = 1"),
                params![id.to_string()],
                |row| identity_at(row, 0),
            )
            .optional()?;
        Ok(identity)
    }

    fn set_shadow_banned(&self, id: UserId, banned: bool) -> StoreResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE users SET is_shadow_banned = ?1 WHERE id = ?2",
            params![banned, id.to_string()],
        )?;
        Ok(rows > 0)
    }

    fn set_active(&self, id: UserId, active: bool) -> StoreResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active, id.to_string()],
        )?;
        Ok(rows > 0)
    }

    fn record_login(&self, id: UserId) -> StoreResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![Utc::now(), id.to_string()],
        )?;
        Ok(())
    }

    fn list_active(&self) -> StoreResult<Vec<AccountSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {USER_COLUMNS}, last_login FROM users
             WHERE is_active = 1
             ORDER BY last_login DESC NULLS LAST, username ASC"
        ))?;
        let users = stmt
            .query_map([], |row| {
                Ok(AccountSummary {
                    identity: identity_at(row, 0)?,
                    last_login: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(users)
    }
}

impl MessageStore for Storage {
    fn insert_message(
        &self,
        sender: UserId,
        receiver: UserId,
        content: &str,
    ) -> StoreResult<Message> {
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_string(),
            created_at: Utc::now(),
            soft_deleted: false,
            deleted_at: None,
            deleted_by: None,
        };

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO messages (id, sender_id, receiver_id, content, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id.to_string(),
                sender.to_string(),
                receiver.to_string(),
                message.content,
                message.created_at,
            ],
        )?;
        Ok(message)
    }

    fn find_message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        let conn = self.conn()?;
        let message = conn
            .query_row(
                "SELECT id, sender_id, receiver_id, content, created_at,
                        is_soft_deleted, deleted_at, deleted_by
                 FROM messages WHERE id = ?1",
                params![id.to_string()],
                |row| message_at(row, 0),
            )
            .optional()?;
        Ok(message)
    }

    fn soft_delete(&self, id: MessageId, actor: UserId) -> StoreResult<bool> {
        let conn = self.conn()?;
        let rows = conn.execute(
            "UPDATE messages
             SET is_soft_deleted = 1, deleted_at = ?1, deleted_by = ?2
             WHERE id = ?3 AND is_soft_deleted = 0",
            params![Utc::now(), actor.to_string(), id.to_string()],
        )?;
        Ok(rows > 0)
    }

    fn conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<MessageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{RECORD_SELECT}
             WHERE ((m.sender_id = ?1 AND m.receiver_id = ?2)
                 OR (m.sender_id = ?2 AND m.receiver_id = ?1))
               AND m.is_soft_deleted = 0
             ORDER BY m.rowid ASC"
        ))?;
        let records = stmt
            .query_map(params![a.to_string(), b.to_string()], record_at)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn conversations(&self, user: UserId) -> StoreResult<Vec<ConversationSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT latest.partner, u.username, m.content, m.created_at FROM (
                SELECT CASE WHEN sender_id = ?1 THEN receiver_id ELSE sender_id END AS partner,
                       MAX(rowid) AS last_row
                FROM messages
                WHERE (sender_id = ?1 OR receiver_id = ?1) AND is_soft_deleted = 0
                GROUP BY partner
             ) latest
             JOIN messages m ON m.rowid = latest.last_row
             JOIN users u ON u.id = latest.partner
             ORDER BY m.rowid DESC",
        )?;
        let summaries = stmt
            .query_map(params![user.to_string()], |row| {
                Ok(ConversationSummary {
                    other_user_id: uuid_at(row, 0)?,
                    other_username: row.get(1)?,
                    last_message: row.get(2)?,
                    last_message_time: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(summaries)
    }

    fn all_messages(
        &self,
        filter: &MessageFilter,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<MessageRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "{RECORD_SELECT}
             WHERE (?1 IS NULL OR m.sender_id = ?1 OR m.receiver_id = ?1)
               AND (?2 = 0 OR m.is_soft_deleted = 1)
             ORDER BY m.rowid DESC
             LIMIT ?3 OFFSET ?4"
        ))?;
        let records = stmt
            .query_map(
                params![
                    filter.user_id.map(|id| id.to_string()),
                    filter.show_deleted_only,
                    limit as i64,
                    offset as i64,
                ],
                record_at,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

impl AuditStore for Storage {
    fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        let metadata = serde_json::to_string(&entry.metadata)
            .map_err(|e| StoreError::Corrupt(format!("audit metadata: {e}")))?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO logs (user_id, action_type, target_user_id, target_message_id,
                               severity, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.actor_id.to_string(),
                entry.action_type.as_str(),
                entry.target_user_id.map(|id| id.to_string()),
                entry.target_message_id.map(|id| id.to_string()),
                entry.severity.as_str(),
                metadata,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    fn logs(&self, filter: &LogFilter, limit: usize, offset: usize) -> StoreResult<Vec<AuditRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT l.id, l.user_id, l.action_type, l.target_user_id, l.target_message_id,
                    l.severity, l.metadata, l.created_at, u.username
             FROM logs l
             LEFT JOIN users u ON l.user_id = u.id
             WHERE (?1 IS NULL OR l.user_id = ?1)
               AND (?2 IS NULL OR l.action_type = ?2)
               AND (?3 IS NULL OR l.severity = ?3)
             ORDER BY l.id DESC
             LIMIT ?4 OFFSET ?5",
        )?;
        let records = stmt
            .query_map(
                params![
                    filter.user_id.map(|id| id.to_string()),
                    filter.action_type,
                    filter.severity,
                    limit as i64,
                    offset as i64,
                ],
                |row| {
                    let action: String = row.get(2)?;
                    let severity: String = row.get(5)?;
                    let metadata: String = row.get(6)?;
                    Ok(AuditRecord {
                        id: row.get(0)?,
                        entry: AuditEntry {
                            actor_id: uuid_at(row, 1)?,
                            action_type: action.parse().map_err(|e| conversion(2, e))?,
                            target_user_id: opt_uuid_at(row, 3)?,
                            target_message_id: opt_uuid_at(row, 4)?,
                            severity: severity.parse().map_err(|e| conversion(5, e))?,
                            metadata: serde_json::from_str(&metadata)
                                .map_err(|e| conversion(6, e))?,
                            created_at: row.get(7)?,
                        },
                        actor_username: row.get(8)?,
                    })
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }
}

fn conversion<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion(idx, e))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion(idx, e)))
        .transpose()
}

/// Reads `id, username, role, is_shadow_banned, is_active` starting at `base`.
fn identity_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Identity> {
    let role: String = row.get(base + 2)?;
    Ok(Identity {
        id: uuid_at(row, base)?,
        username: row.get(base + 1)?,
        role: role.parse().map_err(|e| conversion(base + 2, e))?,
        shadow_banned: row.get(base + 3)?,
        active: row.get(base + 4)?,
    })
}

fn message_at(row: &Row<'_>, base: usize) -> rusqlite::Result<Message> {
    let deleted_at: Option<DateTime<Utc>> = row.get(base + 6)?;
    Ok(Message {
        id: uuid_at(row, base)?,
        sender_id: uuid_at(row, base + 1)?,
        receiver_id: uuid_at(row, base + 2)?,
        content: row.get(base + 3)?,
        created_at: row.get(base + 4)?,
        soft_deleted: row.get(base + 5)?,
        deleted_at,
        deleted_by: opt_uuid_at(row, base + 7)?,
    })
}

fn record_at(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord {
        message: message_at(row, 0)?,
        sender_username: row.get(8)?,
        receiver_username: row.get(9)?,
    })
}
