//! Privileged socket events: user listing, the unfiltered message view,
//! shadow-ban toggling and the audit log.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use panopticon_core::{ActionType, AuditEntry, Identity, Severity, UserId, parse_id};

use crate::audit;
use crate::error::RelayError;
use crate::protocol::ServerEvent;
use crate::registry::RoomKey;
use crate::relay::{RelayState, Session};
use crate::store::{AccountStore, AuditStore, LogFilter, MessageFilter, MessageStore};

pub const ALL_MESSAGES_LIMIT: usize = 100;
pub const LOGS_LIMIT: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Clearance {
    Moderator,
    SuperAdmin,
}

impl RelayState {
    /// Re-read the caller and check its role. Refusals are audited.
    fn require(
        &self,
        session: &Session,
        clearance: Clearance,
        event: &'static str,
    ) -> Result<Identity, RelayError> {
        let caller = self
            .current_identity(session)
            .map_err(|e| RelayError::AdminFailed("Authorization check failed", e))?
            .ok_or(RelayError::Unauthorized)?;

        let allowed = match clearance {
            Clearance::Moderator => caller.role.can_moderate(),
            Clearance::SuperAdmin => caller.role.can_super_admin(),
        };
        if allowed {
            return Ok(caller);
        }

        audit::record(
            &*self.store,
            AuditEntry::new(caller.id, ActionType::UnauthorizedAdminAccess)
                .severity(Severity::Warning)
                .metadata(json!({ "event": event, "role": caller.role })),
        );
        Err(match clearance {
            Clearance::Moderator => RelayError::AdminRequired,
            Clearance::SuperAdmin => RelayError::SuperAdminRequired,
        })
    }

    pub async fn active_users(&self, session: &Session) -> Result<(), RelayError> {
        self.require(session, Clearance::Moderator, "admin:get_active_users")?;
        let users = self
            .store
            .list_active()
            .map_err(|e| RelayError::AdminFailed("Failed to fetch active users", e))?;

        self.reply(session, ServerEvent::ActiveUsers { users, timestamp: Utc::now() })
            .await;
        Ok(())
    }

    /// Newest messages first, soft-deleted ones included.
    pub async fn all_messages(
        &self,
        session: &Session,
        user_id: Option<&str>,
        show_deleted_only: bool,
    ) -> Result<(), RelayError> {
        let caller = self.require(session, Clearance::Moderator, "admin:get_all_messages")?;
        let filter = MessageFilter {
            user_id: optional_id(user_id)?,
            show_deleted_only,
        };
        let messages = self
            .store
            .all_messages(&filter, ALL_MESSAGES_LIMIT, 0)
            .map_err(|e| RelayError::AdminFailed("Failed to fetch messages", e))?;

        self.reply(session, ServerEvent::AllMessages { messages, timestamp: Utc::now() })
            .await;

        audit::record(
            &*self.store,
            AuditEntry::new(caller.id, ActionType::AdminViewedAllMessages)
                .metadata(json!({ "filters": filter })),
        );
        Ok(())
    }

    pub async fn toggle_shadow_ban(
        &self,
        session: &Session,
        user_id: Option<&str>,
        shadow_ban: bool,
    ) -> Result<(), RelayError> {
        let caller = self.require(session, Clearance::SuperAdmin, "admin:toggle_shadow_ban")?;
        let target = optional_id(user_id)?.ok_or(RelayError::InvalidPayload("User ID required"))?;
        if target == caller.id {
            return Err(RelayError::SelfShadowBan);
        }

        let updated = self
            .store
            .set_shadow_banned(target, shadow_ban)
            .map_err(|e| RelayError::AdminFailed("Failed to update shadow ban status", e))?;
        if !updated {
            return Err(RelayError::UserNotFound);
        }

        let action = if shadow_ban {
            ActionType::UserShadowBanned
        } else {
            ActionType::UserShadowUnbanned
        };
        audit::record(
            &*self.store,
            AuditEntry::new(caller.id, action)
                .severity(Severity::Critical)
                .target_user(target)
                .metadata(json!({ "performedBy": caller.username })),
        );

        self.registry
            .emit_to_room(
                RoomKey::Monitor,
                &ServerEvent::ShadowBanUpdated {
                    user_id: target,
                    shadow_ban,
                    performed_by: caller.username.clone(),
                    timestamp: Utc::now(),
                },
            )
            .await;

        let verb = if shadow_ban { "shadow banned" } else { "unbanned" };
        self.reply(
            session,
            ServerEvent::ShadowBanSuccess {
                user_id: target,
                shadow_ban,
                message: format!("User {verb} successfully"),
            },
        )
        .await;

        warn!("User {target} {verb} by {}", caller.username);
        Ok(())
    }

    /// Newest audit entries first.
    pub async fn audit_logs(
        &self,
        session: &Session,
        user_id: Option<&str>,
        action_type: Option<String>,
        severity: Option<String>,
    ) -> Result<(), RelayError> {
        let caller = self.require(session, Clearance::Moderator, "admin:get_logs")?;
        let filter = LogFilter {
            user_id: optional_id(user_id)?,
            action_type,
            severity,
        };
        let logs = self
            .store
            .logs(&filter, LOGS_LIMIT, 0)
            .map_err(|e| RelayError::AdminFailed("Failed to fetch logs", e))?;

        info!("{} read {} audit entries", caller.username, logs.len());
        self.reply(session, ServerEvent::Logs { logs, timestamp: Utc::now() })
            .await;
        Ok(())
    }
}

fn optional_id(raw: Option<&str>) -> Result<Option<UserId>, RelayError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => parse_id(raw)
            .map(Some)
            .map_err(|_| RelayError::InvalidPayload("Invalid user ID")),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{AccountStore, AuditStore, MessageStore};
    use crate::test_support::Harness;
    use panopticon_core::Role;

    #[tokio::test]
    async fn plain_user_is_refused_and_audited() {
        let h = Harness::new();
        let bob = h.account("bob", Role::User);
        let bob_conn = h.connect(&bob).await;

        let err = h.state.active_users(&bob_conn.session).await.unwrap_err();
        assert_eq!(err.client_message(), "Unauthorized: Admin access required");

        let logs = h.store.inner.logs(&LogFilter::default(), 10, 0).unwrap();
        assert_eq!(logs[0].entry.action_type, ActionType::UnauthorizedAdminAccess);
        assert_eq!(logs[0].entry.severity, Severity::Warning);
        assert_eq!(logs[0].entry.metadata["event"], "admin:get_active_users");
    }

    #[tokio::test]
    async fn admin_lists_active_users() {
        let h = Harness::new();
        let admin = h.account("mod", Role::Admin);
        let gone = h.account("gone", Role::User);
        h.store.inner.set_active(gone.id, false).unwrap();
        let mut admin_conn = h.connect(&admin).await;

        h.state.active_users(&admin_conn.session).await.unwrap();
        let reply = admin_conn.take("admin:active_users");
        let users = reply[0]["users"].as_array().unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0]["username"], "mod");
    }

    #[tokio::test]
    async fn all_messages_include_soft_deleted_and_are_audited() {
        let h = Harness::new();
        let admin = h.account("mod", Role::Admin);
        let bob = h.account("bob", Role::User);
        let alice = h.account("alice", Role::User);
        let mut admin_conn = h.connect(&admin).await;
        let kept = h.store.inner.insert_message(bob.id, alice.id, "kept").unwrap();
        let gone = h.store.inner.insert_message(bob.id, alice.id, "gone").unwrap();
        h.store.inner.soft_delete(gone.id, bob.id).unwrap();

        h.state
            .all_messages(&admin_conn.session, None, false)
            .await
            .unwrap();
        let reply = admin_conn.take("admin:all_messages");
        let messages = reply[0]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["id"], serde_json::json!(gone.id));
        assert_eq!(messages[0]["softDeleted"], true);
        assert_eq!(messages[1]["id"], serde_json::json!(kept.id));

        h.state
            .all_messages(&admin_conn.session, Some(&bob.id.to_string()), true)
            .await
            .unwrap();
        let reply = admin_conn.take("admin:all_messages");
        assert_eq!(reply[0]["messages"].as_array().unwrap().len(), 1);

        let viewed = LogFilter {
            action_type: Some("ADMIN_VIEWED_ALL_MESSAGES".to_string()),
            ..LogFilter::default()
        };
        let logs = h.store.inner.logs(&viewed, 10, 0).unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].entry.metadata["filters"]["showDeletedOnly"], true);
    }

    #[tokio::test]
    async fn admin_cannot_toggle_shadow_ban() {
        let h = Harness::new();
        let admin = h.account("mod", Role::Admin);
        let eve = h.account("eve", Role::User);
        let admin_conn = h.connect(&admin).await;

        let err = h
            .state
            .toggle_shadow_ban(&admin_conn.session, Some(&eve.id.to_string()), true)
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "Unauthorized: SuperAdmin access required");
        assert!(!h.store.inner.find_by_id(eve.id).unwrap().unwrap().shadow_banned);
    }

    #[tokio::test]
    async fn superadmin_toggles_shadow_ban() {
        let h = Harness::new();
        let eve = h.account("eve", Role::User);
        let mut root = h.monitor("root").await;
        let mut other_monitor = h.monitor("auditor").await;

        h.state
            .toggle_shadow_ban(&root.session, Some(&eve.id.to_string()), true)
            .await
            .unwrap();
        assert!(h.store.inner.find_by_id(eve.id).unwrap().unwrap().shadow_banned);

        let success = root.take("admin:shadow_ban_success");
        assert_eq!(success[0]["message"], "User shadow banned successfully");
        let updated = other_monitor.take("admin:shadow_ban_updated");
        assert_eq!(updated[0]["performedBy"], "root");
        assert_eq!(updated[0]["shadowBan"], true);

        let logs = h.store.inner.logs(&LogFilter::default(), 10, 0).unwrap();
        assert_eq!(logs[0].entry.action_type, ActionType::UserShadowBanned);
        assert_eq!(logs[0].entry.severity, Severity::Critical);

        h.state
            .toggle_shadow_ban(&root.session, Some(&eve.id.to_string()), false)
            .await
            .unwrap();
        assert!(!h.store.inner.find_by_id(eve.id).unwrap().unwrap().shadow_banned);
    }

    #[tokio::test]
    async fn superadmin_cannot_ban_self_or_unknown_users() {
        let h = Harness::new();
        let root = h.monitor("root").await;

        let me = root.id().to_string();
        let err = h
            .state
            .toggle_shadow_ban(&root.session, Some(&me), true)
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "Cannot shadow ban yourself");

        let err = h
            .state
            .toggle_shadow_ban(&root.session, Some(&uuid::Uuid::new_v4().to_string()), true)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::UserNotFound));

        let err = h
            .state
            .toggle_shadow_ban(&root.session, None, true)
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "User ID required");
    }

    #[tokio::test]
    async fn logs_are_filtered_and_capped() {
        let h = Harness::new();
        let admin = h.account("mod", Role::Admin);
        let bob = h.account("bob", Role::User);
        let mut admin_conn = h.connect(&admin).await;
        for _ in 0..(LOGS_LIMIT + 5) {
            h.store
                .inner
                .append(&AuditEntry::new(bob.id, ActionType::SocketConnected))
                .unwrap();
        }
        h.store
            .inner
            .append(&AuditEntry::new(bob.id, ActionType::UnauthorizedDeleteAttempt).severity(Severity::Warning))
            .unwrap();

        h.state
            .audit_logs(&admin_conn.session, None, None, None)
            .await
            .unwrap();
        let reply = admin_conn.take("admin:logs");
        assert_eq!(reply[0]["logs"].as_array().unwrap().len(), LOGS_LIMIT);

        h.state
            .audit_logs(&admin_conn.session, Some(&bob.id.to_string()), None, Some("WARNING".to_string()))
            .await
            .unwrap();
        let reply = admin_conn.take("admin:logs");
        let logs = reply[0]["logs"].as_array().unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["actionType"], "UNAUTHORIZED_DELETE_ATTEMPT");
        assert_eq!(logs[0]["actorUsername"], "bob");
    }

    #[tokio::test]
    async fn demoted_admin_loses_access_immediately() {
        let h = Harness::new();
        let admin = h.account("mod", Role::Admin);
        let admin_conn = h.connect(&admin).await;
        h.account("mod", Role::User);

        let err = h.state.active_users(&admin_conn.session).await.unwrap_err();
        assert!(matches!(err, RelayError::AdminRequired));
    }

    #[tokio::test]
    async fn bad_filter_id_is_rejected() {
        let h = Harness::new();
        let admin = h.account("mod", Role::Admin);
        let admin_conn = h.connect(&admin).await;
        let err = h
            .state
            .all_messages(&admin_conn.session, Some("bogus"), false)
            .await
            .unwrap_err();
        assert_eq!(err.client_message(), "Invalid user ID");
    }
}
