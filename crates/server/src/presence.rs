//! Who is online, and where to reach them.
//!
//! The registry keeps at most one live connection per user. A newer connection for the
//! same user replaces the older one, and the older connection's eventual disconnect is
//! ignored because its [`ConnectionId`] no longer matches.

use std::{
    collections::HashMap,
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use shared::{domain::UserId, protocol::ServerEvent};
use tokio::sync::{mpsc, RwLock};
use tracing::debug;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The outbound half of one live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<ServerEvent>,
}

impl ConnectionHandle {
    pub fn new(tx: mpsc::UnboundedSender<ServerEvent>) -> Self {
        Self {
            id: ConnectionId::next(),
            tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queues an event without waiting for the transport. `false` once the connection's
    /// writer has gone away.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(event).is_ok()
    }
}

#[derive(Debug, Default)]
pub struct PresenceRegistry {
    connections: RwLock<HashMap<UserId, ConnectionHandle>>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `user_id` to `handle`, returning the connection it superseded.
    pub async fn register(
        &self,
        user_id: UserId,
        handle: ConnectionHandle,
    ) -> Option<ConnectionHandle> {
        let mut connections = self.connections.write().await;
        let connection_id = handle.id();
        let previous = connections.insert(user_id.clone(), handle);
        if let Some(previous) = &previous {
            debug!(%user_id, old = %previous.id(), new = %connection_id, "connection superseded");
        }
        previous
    }

    /// Removes the entry only while it still belongs to `connection_id`.
    pub async fn unregister(&self, user_id: &UserId, connection_id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        match connections.get(user_id) {
            Some(current) if current.id() == connection_id => {
                connections.remove(user_id);
                true
            }
            Some(current) => {
                debug!(
                    %user_id,
                    stale = %connection_id,
                    current = %current.id(),
                    "ignoring stale disconnect"
                );
                false
            }
            None => false,
        }
    }

    pub async fn resolve(&self, user_id: &UserId) -> Option<ConnectionHandle> {
        self.connections.read().await.get(user_id).cloned()
    }

    /// Online user ids, sorted.
    pub async fn snapshot(&self) -> Vec<UserId> {
        let connections = self.connections.read().await;
        let mut online: Vec<UserId> = connections.keys().cloned().collect();
        online.sort();
        online
    }

    /// Queues the sorted online set on every live connection. The read guard is held
    /// until every send is queued, so a snapshot never lands after a newer one.
    pub(crate) async fn broadcast_online(&self) -> usize {
        let connections = self.connections.read().await;
        let mut online: Vec<UserId> = connections.keys().cloned().collect();
        online.sort();
        for handle in connections.values() {
            handle.send(ServerEvent::GetOnlineUsers(online.clone()));
        }
        online.len()
    }
}

#[cfg(test)]
#[path = "tests/presence_tests.rs"]
mod tests;
