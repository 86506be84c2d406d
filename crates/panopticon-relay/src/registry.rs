//! Membership registry: live connections and the rooms they sit in.
//!
//! Every connection is in exactly one own room (keyed by its identity id).
//! Superadmin connections are also in the singleton monitoring room.
//! Join and leave each take the write lock once, so a fan-out running under
//! the read lock sees a connection either fully registered or fully gone.

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, warn};
use uuid::Uuid;

use panopticon_core::{Identity, UserId};

use crate::protocol::ServerEvent;

const MONITORING_ACTIVE: &str = "God Mode Active: Monitoring all communications";

/// Unique handle for one live transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A multicast group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKey {
    /// Everything addressed to one identity.
    Own(UserId),
    /// Live mirror of all traffic, superadmins only.
    Monitor,
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomKey::Own(id) => write!(f, "room_{id}"),
            RoomKey::Monitor => f.write_str("super_admin_monitor"),
        }
    }
}

struct Member {
    sender: UnboundedSender<String>,
    rooms: Vec<RoomKey>,
}

#[derive(Default)]
struct Inner {
    connections: HashMap<ConnectionId, Member>,
    rooms: HashMap<RoomKey, HashSet<ConnectionId>>,
}

#[derive(Default, Clone)]
pub struct MembershipRegistry {
    inner: Arc<RwLock<Inner>>,
}

impl MembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and place it in its rooms.
    ///
    /// Frames for the connection are pushed into `sender` as serialized
    /// JSON. A superadmin gets `monitoring_active` before any other frame.
    pub async fn join(&self, identity: &Identity, sender: UnboundedSender<String>) -> ConnectionId {
        let connection = ConnectionId::new();
        let mut rooms = vec![RoomKey::Own(identity.id)];
        if identity.role.can_super_admin() {
            rooms.push(RoomKey::Monitor);
        }

        let mut guard = self.inner.write().await;
        for room in &rooms {
            guard.rooms.entry(*room).or_default().insert(connection);
        }

        if identity.role.can_super_admin() {
            let confirmation = ServerEvent::MonitoringActive {
                message: MONITORING_ACTIVE.to_string(),
                timestamp: Utc::now(),
            };
            if let Some(text) = encode(&confirmation) {
                let _ = sender.send(text);
            }
        }

        guard.connections.insert(connection, Member { sender, rooms });
        debug!(
            "Connection {connection} joined as {} ({}), {} live",
            identity.username,
            identity.role,
            guard.connections.len()
        );
        connection
    }

    /// Remove a connection from every room it is in. Idempotent.
    pub async fn leave(&self, connection: ConnectionId) {
        let mut guard = self.inner.write().await;
        let Some(member) = guard.connections.remove(&connection) else {
            return;
        };

        for room in &member.rooms {
            if let Some(members) = guard.rooms.get_mut(room) {
                members.remove(&connection);
                if members.is_empty() {
                    guard.rooms.remove(room);
                }
            }
        }
        debug!("Connection {connection} left, {} live", guard.connections.len());
    }

    pub async fn room_members(&self, room: RoomKey) -> HashSet<ConnectionId> {
        self.inner
            .read()
            .await
            .rooms
            .get(&room)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Send to one connection. Returns false if it is gone.
    pub async fn emit_to_connection(&self, connection: ConnectionId, event: &ServerEvent) -> bool {
        let Some(text) = encode(event) else {
            return false;
        };
        let guard = self.inner.read().await;
        match guard.connections.get(&connection) {
            Some(member) => {
                if member.sender.send(text).is_err() {
                    warn!("Dropped frame for closing connection {connection}");
                    return false;
                }
                true
            }
            None => false,
        }
    }

    /// Send to every member of `room`, returning how many accepted the frame.
    ///
    /// Each member is independent: one closed channel is logged and skipped.
    pub async fn emit_to_room(&self, room: RoomKey, event: &ServerEvent) -> usize {
        let Some(text) = encode(event) else {
            return 0;
        };
        let guard = self.inner.read().await;
        let Some(members) = guard.rooms.get(&room) else {
            return 0;
        };

        let mut delivered = 0;
        for connection in members {
            let Some(member) = guard.connections.get(connection) else {
                continue;
            };
            if member.sender.send(text.clone()).is_ok() {
                delivered += 1;
            } else {
                warn!("Dropped frame for closing connection {connection} in {room}");
            }
        }
        delivered
    }

    /// Hold the write lock until the returned guard is dropped.
    #[cfg(test)]
    pub(crate) async fn freeze(&self) -> Box<dyn Send> {
        Box::new(self.inner.clone().write_owned().await)
    }
}

fn encode(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(text) => Some(text),
        Err(e) => {
            error!("Failed to serialize outbound event: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use panopticon_core::Role;
    use tokio::sync::mpsc::unbounded_channel;

    fn ping() -> ServerEvent {
        ServerEvent::Error { message: "ping".to_string() }
    }

    #[tokio::test]
    async fn user_joins_only_own_room() {
        let registry = MembershipRegistry::new();
        let bob = Identity::new("bob", Role::User);
        let (tx, mut rx) = unbounded_channel();

        let conn = registry.join(&bob, tx).await;
        assert!(registry.room_members(RoomKey::Own(bob.id)).await.contains(&conn));
        assert!(registry.room_members(RoomKey::Monitor).await.is_empty());
        assert!(rx.try_recv().is_err(), "no confirmation for plain users");
    }

    #[tokio::test]
    async fn superadmin_gets_single_confirmation_first() {
        let registry = MembershipRegistry::new();
        let root = Identity::new("root", Role::Superadmin);
        let (tx, mut rx) = unbounded_channel();

        let conn = registry.join(&root, tx).await;
        assert!(registry.room_members(RoomKey::Monitor).await.contains(&conn));
        registry.emit_to_room(RoomKey::Monitor, &ping()).await;

        let first: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(first["type"], "monitoring_active");
        assert_eq!(first["message"], MONITORING_ACTIVE);
        let second: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(second["type"], "error");
    }

    #[tokio::test]
    async fn leave_removes_from_every_room() {
        let registry = MembershipRegistry::new();
        let root = Identity::new("root", Role::Superadmin);
        let (tx, _rx) = unbounded_channel();

        let conn = registry.join(&root, tx).await;
        registry.leave(conn).await;
        registry.leave(conn).await;

        assert!(registry.room_members(RoomKey::Own(root.id)).await.is_empty());
        assert!(registry.room_members(RoomKey::Monitor).await.is_empty());
        assert_eq!(registry.connection_count().await, 0);
        assert!(!registry.emit_to_connection(conn, &ping()).await);
    }

    #[tokio::test]
    async fn closed_member_does_not_abort_fan_out() {
        let registry = MembershipRegistry::new();
        let first = Identity::new("root", Role::Superadmin);
        let second = Identity::new("auditor", Role::Superadmin);
        let (dead_tx, dead_rx) = unbounded_channel();
        let (live_tx, mut live_rx) = unbounded_channel();

        registry.join(&first, dead_tx).await;
        registry.join(&second, live_tx).await;
        drop(dead_rx);

        assert_eq!(registry.emit_to_room(RoomKey::Monitor, &ping()).await, 1);
        let _confirmation = live_rx.recv().await.unwrap();
        assert!(live_rx.recv().await.unwrap().contains("ping"));
    }

    #[tokio::test]
    async fn own_room_reaches_every_connection_of_identity() {
        let registry = MembershipRegistry::new();
        let alice = Identity::new("alice", Role::User);
        let (tx1, mut rx1) = unbounded_channel();
        let (tx2, mut rx2) = unbounded_channel();
        registry.join(&alice, tx1).await;
        registry.join(&alice, tx2).await;

        assert_eq!(registry.emit_to_room(RoomKey::Own(alice.id), &ping()).await, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
    }

    #[test]
    fn room_names_match_wire_convention() {
        let id = Uuid::nil();
        assert_eq!(
            RoomKey::Own(id).to_string(),
            "room_00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(RoomKey::Monitor.to_string(), "super_admin_monitor");
    }

    #[tokio::test]
    async fn concurrent_leave_and_fan_out_never_panic() {
        let registry = MembershipRegistry::new();
        let root = Identity::new("root", Role::Superadmin);
        let mut handles = Vec::new();

        for _ in 0..32 {
            let joiner = registry.clone();
            let emitter = registry.clone();
            let root = root.clone();
            handles.push(tokio::spawn(async move {
                let (tx, rx) = unbounded_channel();
                let conn = joiner.join(&root, tx).await;
                drop(rx);
                joiner.leave(conn).await;
            }));
            handles.push(tokio::spawn(async move {
                emitter.emit_to_room(RoomKey::Monitor, &ping()).await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(registry.connection_count().await, 0);
    }
}
