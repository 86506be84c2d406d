//! Identity snapshots.
//!
//! An [`Identity`] is read from the account store when a connection
//! authenticates. The relay holds it as a read-only copy; handlers that
//! authorize something re-read the store instead of trusting the copy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::role::Role;

/// Opaque unique account key.
pub type UserId = Uuid;

/// A resolved account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub shadow_banned: bool,
    pub active: bool,
}

impl Identity {
    /// A fresh active, unbanned account with a random id.
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4(),
            username: username.into(),
            role,
            shadow_banned: false,
            active: true,
        }
    }

    /// Whether this identity may remove `sender`'s message.
    pub fn may_delete_from(&self, sender: UserId) -> bool {
        self.id == sender || self.role.can_moderate()
    }
}

/// Parse a wire-form user or message id.
pub fn parse_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw.trim()).map_err(|_| Error::InvalidId(raw.to_string()))
}

/// One row of the admin active-user listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSummary {
    #[serde(flatten)]
    pub identity: Identity,
    pub last_login: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_sender_or_moderator_may_delete() {
        let sender = Identity::new("bob", Role::User);
        let receiver = Identity::new("alice", Role::User);
        let admin = Identity::new("mod", Role::Admin);
        let root = Identity::new("root", Role::Superadmin);

        assert!(sender.may_delete_from(sender.id));
        assert!(!receiver.may_delete_from(sender.id));
        assert!(admin.may_delete_from(sender.id));
        assert!(root.may_delete_from(sender.id));
    }

    #[test]
    fn parse_id_rejects_garbage() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
        assert_eq!(
            parse_id("not-a-uuid"),
            Err(Error::InvalidId("not-a-uuid".to_string()))
        );
    }

    #[test]
    fn wire_shape_is_camel_case() {
        let mut eve = Identity::new("eve", Role::User);
        eve.shadow_banned = true;
        let value = serde_json::to_value(&eve).unwrap();
        assert_eq!(value["shadowBanned"], true);
        assert_eq!(value["role"], "user");
        assert_eq!(value["active"], true);
    }
}
