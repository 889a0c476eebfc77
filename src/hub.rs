//! Event fan-out: per-connection outboxes grouped into room channels.
//!
//! Delivery is at-least-once within a connection's lifetime; per-recipient
//! ordering follows emission order because each connection drains a single
//! unbounded queue.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use tokio::sync::mpsc;
use tracing::debug;

use crate::events::ServerEvent;
use crate::types::{ConnId, RoomId};

pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

#[derive(Default)]
struct HubInner {
    conns: HashMap<ConnId, Outbox>,
    rooms: HashMap<RoomId, HashSet<ConnId>>,
}

pub struct Hub {
    inner: Mutex<HubInner>,
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HubInner::default()),
        }
    }

    pub fn register(&self, conn: &str, tx: Outbox) {
        let mut inner = self.inner.lock().expect("hub lock");
        inner.conns.insert(conn.to_string(), tx);
    }

    /// Drop a connection and its memberships. Safe to call twice.
    pub fn unregister(&self, conn: &str) {
        let mut inner = self.inner.lock().expect("hub lock");
        inner.conns.remove(conn);
        for members in inner.rooms.values_mut() {
            members.remove(conn);
        }
    }

    pub fn join_room_channel(&self, conn: &str, room_id: &str) {
        let mut inner = self.inner.lock().expect("hub lock");
        inner
            .rooms
            .entry(room_id.to_string())
            .or_default()
            .insert(conn.to_string());
    }

    pub fn leave_room_channel(&self, conn: &str, room_id: &str) {
        let mut inner = self.inner.lock().expect("hub lock");
        if let Some(members) = inner.rooms.get_mut(room_id) {
            members.remove(conn);
            if members.is_empty() {
                inner.rooms.remove(room_id);
            }
        }
    }

    /// Remove a room channel entirely. After this no event reaches the room.
    pub fn drop_room(&self, room_id: &str) {
        let mut inner = self.inner.lock().expect("hub lock");
        inner.rooms.remove(room_id);
    }

    pub fn broadcast(&self, room_id: &str, event: ServerEvent) {
        let inner = self.inner.lock().expect("hub lock");
        let Some(members) = inner.rooms.get(room_id) else {
            debug!(room_id, "broadcast to unknown room channel dropped");
            return;
        };
        for conn in members {
            if let Some(tx) = inner.conns.get(conn) {
                let _ = tx.send(event.clone());
            }
        }
    }

    /// Fan out to every live connection, room member or not. Used for the
    /// public rooms index.
    pub fn broadcast_all(&self, event: ServerEvent) {
        let inner = self.inner.lock().expect("hub lock");
        for tx in inner.conns.values() {
            let _ = tx.send(event.clone());
        }
    }

    /// Targeted delivery. Returns false when the connection is gone.
    pub fn send(&self, conn: &str, event: ServerEvent) -> bool {
        let inner = self.inner.lock().expect("hub lock");
        match inner.conns.get(conn) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn(hub: &Hub, id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        hub.register(id, tx);
        rx
    }

    #[tokio::test]
    async fn broadcast_reaches_room_members_only() {
        let hub = Hub::new();
        let mut a = conn(&hub, "a");
        let mut b = conn(&hub, "b");
        hub.join_room_channel("a", "r1");

        hub.broadcast(
            "r1",
            ServerEvent::BattleError {
                message: "x".into(),
            },
        );

        assert!(matches!(
            a.try_recv(),
            Ok(ServerEvent::BattleError { .. })
        ));
        assert!(b.try_recv().is_err());
    }

    #[tokio::test]
    async fn drop_room_silences_channel() {
        let hub = Hub::new();
        let mut a = conn(&hub, "a");
        hub.join_room_channel("a", "r1");
        hub.drop_room("r1");

        hub.broadcast(
            "r1",
            ServerEvent::BattleError {
                message: "x".into(),
            },
        );
        assert!(a.try_recv().is_err());
    }

    #[tokio::test]
    async fn send_reports_dead_connections() {
        let hub = Hub::new();
        let _rx = conn(&hub, "a");
        assert!(hub.send(
            "a",
            ServerEvent::BattleError {
                message: "x".into()
            }
        ));
        hub.unregister("a");
        assert!(!hub.send(
            "a",
            ServerEvent::BattleError {
                message: "x".into()
            }
        ));
    }
}
