use crate::websocket::message_types::WsOutboundEvent;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{
    mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    RwLock,
};
use uuid::Uuid;

pub mod handlers;
pub mod message_types;

/// Unique identifier for a live WebSocket connection
///
/// Generated when the socket is accepted and never reused, so a stale id can
/// not be confused with a later connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Default)]
struct RegistryInner {
    connections: HashMap<ConnectionId, UnboundedSender<String>>,
    // account_id -> connections subscribed to that account's room
    rooms: HashMap<Uuid, HashSet<ConnectionId>>,
}

impl RegistryInner {
    fn drop_connection(&mut self, id: ConnectionId) -> bool {
        let existed = self.connections.remove(&id).is_some();
        self.rooms.retain(|_, members| {
            members.remove(&id);
            !members.is_empty()
        });
        existed
    }
}

/// Live connection table plus per-account rooms
///
/// Room fan-out iterates the membership at send time. Senders whose receiver
/// has gone away are dropped on the next send.
#[derive(Default, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection and return the channel its outbound frames arrive on
    pub async fn register(&self, id: ConnectionId) -> UnboundedReceiver<String> {
        let (tx, rx) = unbounded_channel();
        let mut guard = self.inner.write().await;
        guard.connections.insert(id, tx);

        tracing::debug!(
            connection_id = %id,
            total = guard.connections.len(),
            "connection registered"
        );
        rx
    }

    /// Remove a connection and all of its room memberships
    pub async fn deregister(&self, id: ConnectionId) -> bool {
        let mut guard = self.inner.write().await;
        let existed = guard.drop_connection(id);
        if existed {
            tracing::debug!(
                connection_id = %id,
                remaining = guard.connections.len(),
                "connection deregistered"
            );
        }
        existed
    }

    pub async fn is_connected(&self, id: ConnectionId) -> bool {
        self.inner.read().await.connections.contains_key(&id)
    }

    /// Subscribe a connection to an account room; ignored for closed connections
    pub async fn join_room(&self, id: ConnectionId, account_id: Uuid) -> bool {
        let mut guard = self.inner.write().await;
        if !guard.connections.contains_key(&id) {
            return false;
        }
        guard.rooms.entry(account_id).or_default().insert(id);
        true
    }

    pub async fn leave_room(&self, id: ConnectionId, account_id: Uuid) {
        let mut guard = self.inner.write().await;
        if let Some(members) = guard.rooms.get_mut(&account_id) {
            members.remove(&id);
            if members.is_empty() {
                guard.rooms.remove(&account_id);
            }
        }
    }

    pub async fn room_members(&self, account_id: Uuid) -> Vec<ConnectionId> {
        let guard = self.inner.read().await;
        guard
            .rooms
            .get(&account_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn connection_count(&self) -> usize {
        self.inner.read().await.connections.len()
    }

    /// Send to a single connection; a closed connection is a silent no-op
    pub async fn send_to_connection(&self, id: ConnectionId, event: &WsOutboundEvent) {
        let Some(payload) = encode(event) else {
            return;
        };
        let mut guard = self.inner.write().await;
        let delivered = guard
            .connections
            .get(&id)
            .map(|tx| tx.send(payload).is_ok());
        if delivered == Some(false) {
            guard.drop_connection(id);
        }
    }

    /// Send to every connection in an account's room
    pub async fn send_to_account(&self, account_id: Uuid, event: &WsOutboundEvent) {
        let Some(payload) = encode(event) else {
            return;
        };
        let mut guard = self.inner.write().await;
        let members: Vec<ConnectionId> = match guard.rooms.get(&account_id) {
            Some(members) => members.iter().copied().collect(),
            None => return,
        };

        let dead: Vec<ConnectionId> = members
            .into_iter()
            .filter(|id| match guard.connections.get(id) {
                Some(tx) => tx.send(payload.clone()).is_err(),
                None => true,
            })
            .collect();

        for id in dead {
            guard.drop_connection(id);
        }
    }

    /// Send to every live connection
    pub async fn broadcast(&self, event: &WsOutboundEvent) {
        let Some(payload) = encode(event) else {
            return;
        };
        let mut guard = self.inner.write().await;
        let before = guard.connections.len();
        guard
            .connections
            .retain(|_, tx| tx.send(payload.clone()).is_ok());
        let after = guard.connections.len();

        if before != after {
            let live: HashSet<ConnectionId> = guard.connections.keys().copied().collect();
            guard.rooms.retain(|_, members| {
                members.retain(|id| live.contains(id));
                !members.is_empty()
            });
            tracing::debug!(
                cleaned = before - after,
                active = after,
                "broadcast dropped dead connections"
            );
        }
    }

    /// Drop every connection; used at shutdown
    pub async fn clear(&self) {
        let mut guard = self.inner.write().await;
        guard.connections.clear();
        guard.rooms.clear();
    }
}

fn encode(event: &WsOutboundEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(payload) => Some(payload),
        Err(e) => {
            tracing::error!(error = %e, event = event.event_type(), "failed to serialize event");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pong() -> WsOutboundEvent {
        WsOutboundEvent::MessageSeenSuccess {
            message_id: Uuid::nil(),
        }
    }

    #[tokio::test]
    async fn test_room_fan_out_reaches_every_session() {
        let registry = ConnectionRegistry::new();
        let account = Uuid::new_v4();
        let (c1, c2, other) = (ConnectionId::new(), ConnectionId::new(), ConnectionId::new());

        let mut rx1 = registry.register(c1).await;
        let mut rx2 = registry.register(c2).await;
        let mut rx_other = registry.register(other).await;
        assert!(registry.join_room(c1, account).await);
        assert!(registry.join_room(c2, account).await);

        registry.send_to_account(account, &pong()).await;

        assert!(rx1.try_recv().is_ok());
        assert!(rx2.try_recv().is_ok());
        assert!(rx_other.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deregister_removes_room_membership() {
        let registry = ConnectionRegistry::new();
        let account = Uuid::new_v4();
        let conn = ConnectionId::new();
        let _rx = registry.register(conn).await;
        registry.join_room(conn, account).await;

        assert!(registry.deregister(conn).await);
        assert!(!registry.deregister(conn).await);
        assert!(registry.room_members(account).await.is_empty());
        assert!(!registry.join_room(conn, account).await);
    }

    #[tokio::test]
    async fn test_dead_receivers_are_cleaned_up() {
        let registry = ConnectionRegistry::new();
        let conn = ConnectionId::new();
        let rx = registry.register(conn).await;
        drop(rx);

        registry.broadcast(&pong()).await;
        assert_eq!(registry.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_send_to_unknown_connection_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.send_to_connection(ConnectionId::new(), &pong()).await;
        assert_eq!(registry.connection_count().await, 0);
    }
}
