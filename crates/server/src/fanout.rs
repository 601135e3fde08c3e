use std::sync::Arc;

use server_api::Delivery;
use shared::{domain::UserId, protocol::ServerEvent};
use tracing::debug;

use crate::presence::PresenceRegistry;

/// Routes events to the single live connection of a user. Nothing is queued for
/// offline users.
#[derive(Debug, Clone)]
pub struct EventRouter {
    presence: Arc<PresenceRegistry>,
}

impl EventRouter {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Returns whether the event reached a live connection's outbound queue.
    pub async fn emit_to(&self, user_id: &UserId, event: ServerEvent) -> bool {
        let Some(handle) = self.presence.resolve(user_id).await else {
            debug!(%user_id, event = event.name(), "target offline, event dropped");
            return false;
        };
        let name = event.name();
        if handle.send(event) {
            debug!(%user_id, connection_id = %handle.id(), event = name, "event queued");
            true
        } else {
            debug!(
                %user_id,
                connection_id = %handle.id(),
                event = name,
                "connection writer closed"
            );
            false
        }
    }

    /// Sends the current online set to every connected user.
    pub async fn broadcast_presence(&self) {
        let online = self.presence.broadcast_online().await;
        debug!(online, "presence broadcast");
    }

    /// Emits each delivery in order.
    pub async fn dispatch(&self, deliveries: Vec<Delivery>) {
        for delivery in deliveries {
            self.emit_to(&delivery.target, delivery.event).await;
        }
    }
}

#[cfg(test)]
#[path = "tests/fanout_tests.rs"]
mod tests;
