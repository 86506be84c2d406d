//! In-process harness for handler tests: real SQLite, real registry, channel
//! receivers in place of sockets, and switches to make the store fail.

use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use panopticon_core::{
    AccountSummary, AuditEntry, AuditRecord, Identity, Message, MessageId, MessageRecord, Role,
    UserId,
};

use crate::config::{JwtConfig, RelayConfig};
use crate::error::StoreError;
use crate::relay::{RelayState, Session};
use crate::storage::Storage;
use crate::store::{
    AccountStore, AuditStore, ConversationSummary, LogFilter, MessageFilter, MessageStore,
    StoreResult,
};

/// SQLite store whose writes can be made to fail on demand.
pub struct FlakyStore {
    pub inner: Storage,
    pub fail_audit: AtomicBool,
    pub fail_insert: AtomicBool,
    pub fail_soft_delete: AtomicBool,
}

fn check(flag: &AtomicBool, what: &str) -> StoreResult<()> {
    if flag.load(Ordering::SeqCst) {
        return Err(StoreError::Unavailable(format!("{what} disabled by test")));
    }
    Ok(())
}

impl AccountStore for FlakyStore {
    fn find_by_id(&self, id: UserId) -> StoreResult<Option<Identity>> {
        self.inner.find_by_id(id)
    }
    fn find_active_by_id(&self, id: UserId) -> StoreResult<Option<Identity>> {
        self.inner.find_active_by_id(id)
    }
    fn set_shadow_banned(&self, id: UserId, banned: bool) -> StoreResult<bool> {
        self.inner.set_shadow_banned(id, banned)
    }
    fn set_active(&self, id: UserId, active: bool) -> StoreResult<bool> {
        self.inner.set_active(id, active)
    }
    fn record_login(&self, id: UserId) -> StoreResult<()> {
        self.inner.record_login(id)
    }
    fn list_active(&self) -> StoreResult<Vec<AccountSummary>> {
        self.inner.list_active()
    }
}

impl MessageStore for FlakyStore {
    fn insert_message(&self, sender: UserId, receiver: UserId, content: &str) -> StoreResult<Message> {
        check(&self.fail_insert, "insert")?;
        self.inner.insert_message(sender, receiver, content)
    }
    fn find_message(&self, id: MessageId) -> StoreResult<Option<Message>> {
        self.inner.find_message(id)
    }
    fn soft_delete(&self, id: MessageId, actor: UserId) -> StoreResult<bool> {
        check(&self.fail_soft_delete, "soft delete")?;
        self.inner.soft_delete(id, actor)
    }
    fn conversation(&self, a: UserId, b: UserId) -> StoreResult<Vec<MessageRecord>> {
        self.inner.conversation(a, b)
    }
    fn conversations(&self, user: UserId) -> StoreResult<Vec<ConversationSummary>> {
        self.inner.conversations(user)
    }
    fn all_messages(
        &self,
        filter: &MessageFilter,
        limit: usize,
        offset: usize,
    ) -> StoreResult<Vec<MessageRecord>> {
        self.inner.all_messages(filter, limit, offset)
    }
}

impl AuditStore for FlakyStore {
    fn append(&self, entry: &AuditEntry) -> StoreResult<()> {
        check(&self.fail_audit, "audit")?;
        self.inner.append(entry)
    }
    fn logs(&self, filter: &LogFilter, limit: usize, offset: usize) -> StoreResult<Vec<AuditRecord>> {
        self.inner.logs(filter, limit, offset)
    }
}

/// A connected client without a socket.
pub struct Client {
    pub session: Session,
    rx: UnboundedReceiver<String>,
}

impl Client {
    pub fn id(&self) -> UserId {
        self.session.identity.id
    }

    /// Everything queued for this client so far.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(text) = self.rx.try_recv() {
            frames.push(serde_json::from_str(&text).unwrap());
        }
        frames
    }

    /// Queued frames of one event type.
    pub fn take(&mut self, event: &str) -> Vec<Value> {
        self.drain()
            .into_iter()
            .filter(|frame| frame["type"] == event)
            .collect()
    }
}

pub struct Harness {
    pub state: RelayState,
    pub store: Arc<FlakyStore>,
}

impl Harness {
    pub fn new() -> Self {
        let store = Arc::new(FlakyStore {
            inner: Storage::open_in_memory().unwrap(),
            fail_audit: AtomicBool::new(false),
            fail_insert: AtomicBool::new(false),
            fail_soft_delete: AtomicBool::new(false),
        });
        let config = RelayConfig {
            jwt: JwtConfig {
                secret: "test-secret".to_string(),
                ..JwtConfig::default()
            },
            ..RelayConfig::default()
        };
        let state = RelayState::new(store.clone(), &config);
        Self { state, store }
    }

    pub fn account(&self, username: &str, role: Role) -> Identity {
        self.store.inner.upsert_account(username, role).unwrap()
    }

    pub fn shadow_ban(&self, user: UserId) {
        self.store.inner.set_shadow_banned(user, true).unwrap();
    }

    pub async fn connect(&self, identity: &Identity) -> Client {
        let (tx, rx) = unbounded_channel();
        let connection = self.state.registry.join(identity, tx).await;
        Client {
            session: Session { connection, identity: identity.clone() },
            rx,
        }
    }

    /// Connect a fresh superadmin and discard its activation frame.
    pub async fn monitor(&self, username: &str) -> Client {
        let root = self.account(username, Role::Superadmin);
        let mut client = self.connect(&root).await;
        client.drain();
        client
    }

    pub fn audit_actions(&self) -> Vec<String> {
        self.store
            .inner
            .logs(&LogFilter::default(), 1000, 0)
            .unwrap()
            .into_iter()
            .map(|record| record.entry.action_type.to_string())
            .collect()
    }
}
