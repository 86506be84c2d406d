//! Typing indicators and read receipts.
//!
//! Nothing here is persisted or audited. Anything that cannot be delivered is
//! dropped quietly, and shadow-banned callers are dropped at the source.

use chrono::Utc;
use tracing::{debug, warn};

use panopticon_core::{Identity, parse_id};

use crate::protocol::{ServerEvent, UserRef};
use crate::registry::RoomKey;
use crate::relay::{RelayState, Session};
use crate::store::MessageStore;

impl RelayState {
    /// The caller, if it may emit presence signals right now.
    fn presence_sender(&self, session: &Session) -> Option<Identity> {
        match self.current_identity(session) {
            Ok(Some(identity)) if !identity.shadow_banned => Some(identity),
            Ok(_) => None,
            Err(e) => {
                warn!("Presence lookup for {} failed: {e}", session.identity.username);
                None
            }
        }
    }

    /// Forward `typing` (or `stop_typing`) to the receiver's own room and
    /// mirror it to monitors. Returns whether anything was forwarded.
    pub async fn signal_typing(&self, session: &Session, receiver_id: Option<&str>, typing: bool) -> bool {
        let Some(receiver_id) = receiver_id.and_then(|raw| parse_id(raw).ok()) else {
            debug!("Typing signal from {} without a receiver", session.identity.username);
            return false;
        };
        let Some(sender) = self.presence_sender(session) else {
            return false;
        };

        let mirror = ServerEvent::TypingEvent {
            sender: UserRef::from(&sender),
            receiver_id,
            typing,
            timestamp: Utc::now(),
        };
        let event = if typing {
            ServerEvent::UserTyping { user_id: sender.id, username: sender.username }
        } else {
            ServerEvent::UserStopTyping { user_id: sender.id, username: sender.username }
        };
        self.registry.emit_to_room(RoomKey::Own(receiver_id), &event).await;
        self.registry.emit_to_room(RoomKey::Monitor, &mirror).await;
        true
    }

    /// Send a read receipt to the message's sender and mirror it to monitors.
    /// Only the message's receiver may mark it read.
    pub async fn mark_read(&self, session: &Session, message_id: Option<&str>) -> bool {
        let Some(message_id) = message_id.and_then(|raw| parse_id(raw).ok()) else {
            return false;
        };
        let message = match self.store.find_message(message_id) {
            Ok(Some(message)) => message,
            Ok(None) => return false,
            Err(e) => {
                warn!("Read receipt lookup for {message_id} failed: {e}");
                return false;
            }
        };
        let Some(reader) = self.presence_sender(session) else {
            return false;
        };
        if message.receiver_id != reader.id {
            debug!("{} is not the receiver of {message_id}", reader.username);
            return false;
        }

        let now = Utc::now();
        self.registry
            .emit_to_room(
                RoomKey::Own(message.sender_id),
                &ServerEvent::MessageRead { message_id, read_by: reader.id, read_at: now },
            )
            .await;
        self.registry
            .emit_to_room(
                RoomKey::Monitor,
                &ServerEvent::MessageReadEvent {
                    message_id,
                    read_by: reader.username,
                    timestamp: now,
                },
            )
            .await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MessageStore;
    use crate::test_support::Harness;
    use panopticon_core::Role;

    #[tokio::test]
    async fn typing_reaches_receiver_and_monitors() {
        let h = Harness::new();
        let bob = h.account("bob", Role::User);
        let alice = h.account("alice", Role::User);
        let mut bob_conn = h.connect(&bob).await;
        let mut alice_conn = h.connect(&alice).await;
        let mut root = h.monitor("root").await;

        let to = alice.id.to_string();
        assert!(h.state.signal_typing(&bob_conn.session, Some(&to), true).await);
        assert!(h.state.signal_typing(&bob_conn.session, Some(&to), false).await);

        let frames = alice_conn.drain();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0]["type"], "user_typing");
        assert_eq!(frames[0]["username"], "bob");
        assert_eq!(frames[1]["type"], "user_stop_typing");
        assert!(bob_conn.drain().is_empty());

        let mirrored = root.take("typing_event");
        assert_eq!(mirrored.len(), 2);
        assert_eq!(mirrored[0]["sender"]["username"], "bob");
        assert_eq!(mirrored[0]["receiverId"], serde_json::json!(alice.id));
        assert_eq!(mirrored[0]["typing"], true);
        assert_eq!(mirrored[1]["typing"], false);
    }

    #[tokio::test]
    async fn shadow_banned_typing_is_dropped() {
        let h = Harness::new();
        let eve = h.account("eve", Role::User);
        let bob = h.account("bob", Role::User);
        h.shadow_ban(eve.id);
        let eve_conn = h.connect(&eve).await;
        let mut bob_conn = h.connect(&bob).await;
        let mut root = h.monitor("root").await;

        let to = bob.id.to_string();
        assert!(!h.state.signal_typing(&eve_conn.session, Some(&to), true).await);
        assert!(bob_conn.drain().is_empty());
        assert!(root.drain().is_empty());
        assert!(h.audit_actions().is_empty());
    }

    #[tokio::test]
    async fn receiver_marks_read_and_monitor_sees_it() {
        let h = Harness::new();
        let bob = h.account("bob", Role::User);
        let alice = h.account("alice", Role::User);
        let mut bob_conn = h.connect(&bob).await;
        let alice_conn = h.connect(&alice).await;
        let mut root = h.monitor("root").await;
        let message = h.store.inner.insert_message(bob.id, alice.id, "read me").unwrap();

        assert!(h.state.mark_read(&alice_conn.session, Some(&message.id.to_string())).await);

        let receipt = bob_conn.take("message_read");
        assert_eq!(receipt.len(), 1);
        assert_eq!(receipt[0]["readBy"], serde_json::json!(alice.id));
        let mirror = root.take("message_read_event");
        assert_eq!(mirror[0]["readBy"], "alice");
    }

    #[tokio::test]
    async fn shadow_banned_reader_sends_no_receipt() {
        let h = Harness::new();
        let bob = h.account("bob", Role::User);
        let eve = h.account("eve", Role::User);
        let mut bob_conn = h.connect(&bob).await;
        let eve_conn = h.connect(&eve).await;
        let mut root = h.monitor("root").await;
        let message = h.store.inner.insert_message(bob.id, eve.id, "seen?").unwrap();
        h.shadow_ban(eve.id);

        assert!(!h.state.mark_read(&eve_conn.session, Some(&message.id.to_string())).await);
        assert!(bob_conn.drain().is_empty());
        assert!(root.drain().is_empty());
        assert!(h.audit_actions().is_empty());
    }

    #[tokio::test]
    async fn only_the_receiver_may_mark_read() {
        let h = Harness::new();
        let bob = h.account("bob", Role::User);
        let alice = h.account("alice", Role::User);
        let mut bob_conn = h.connect(&bob).await;
        let message = h.store.inner.insert_message(bob.id, alice.id, "mine").unwrap();

        assert!(!h.state.mark_read(&bob_conn.session, Some(&message.id.to_string())).await);
        assert!(!h.state.mark_read(&bob_conn.session, Some("nope")).await);
        assert!(bob_conn.drain().is_empty());
    }
}
