//! Lifecycle of one realtime connection, from handshake to teardown.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use shared::{
    domain::UserId,
    error::ApiReply,
    protocol::{ClientSignal, ServerEvent},
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    app_state::AppState,
    fanout::EventRouter,
    presence::{ConnectionHandle, ConnectionId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("invalid connection transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: ConnectionState,
        to: ConnectionState,
    },
}

pub struct Connection {
    user_id: UserId,
    handle: ConnectionHandle,
    state: ConnectionState,
    router: EventRouter,
}

impl Connection {
    /// Creates a connection in `Connecting` together with the queue its writer drains.
    pub fn new(
        user_id: UserId,
        router: EventRouter,
    ) -> (Self, mpsc::UnboundedReceiver<ServerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Self {
            user_id,
            handle: ConnectionHandle::new(tx),
            state: ConnectionState::Connecting,
            router,
        };
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn user_id(&self) -> &UserId {
        &self.user_id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Registers presence and tells everyone who is online.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.transition(ConnectionState::Connected)?;
        self.router
            .presence()
            .register(self.user_id.clone(), self.handle.clone())
            .await;
        self.router.broadcast_presence().await;
        Ok(())
    }

    /// Leaves presence unless a newer connection for the same user has taken over.
    pub async fn disconnect(&mut self) -> Result<(), ConnectionError> {
        let was_connected = self.state == ConnectionState::Connected;
        self.transition(ConnectionState::Disconnected)?;
        if !was_connected {
            return Ok(());
        }
        let removed = self
            .router
            .presence()
            .unregister(&self.user_id, self.handle.id())
            .await;
        if removed {
            self.router.broadcast_presence().await;
        }
        Ok(())
    }

    /// Forwards a typing signal to its receiver. Returns whether it was delivered.
    pub async fn relay(&self, signal: ClientSignal) -> bool {
        if self.state != ConnectionState::Connected {
            debug!(user_id = %self.user_id, "signal ignored outside connected state");
            return false;
        }
        let sender_id = self.user_id.clone();
        match signal {
            ClientSignal::Typing { receiver_id } => {
                self.router
                    .emit_to(&receiver_id, ServerEvent::UserTyping { sender_id })
                    .await
            }
            ClientSignal::StopTyping { receiver_id } => {
                self.router
                    .emit_to(&receiver_id, ServerEvent::UserStopTyping { sender_id })
                    .await
            }
        }
    }

    /// Parses and relays one text frame; malformed frames are logged and dropped.
    pub async fn handle_frame(&self, text: &str) {
        match serde_json::from_str::<ClientSignal>(text) {
            Ok(signal) => {
                self.relay(signal).await;
            }
            Err(error) => {
                warn!(user_id = %self.user_id, %error, "unparseable client frame");
            }
        }
    }

    fn transition(&mut self, to: ConnectionState) -> Result<(), ConnectionError> {
        let allowed = matches!(
            (self.state, to),
            (ConnectionState::Connecting, ConnectionState::Connected)
                | (ConnectionState::Connecting, ConnectionState::Disconnected)
                | (ConnectionState::Connected, ConnectionState::Disconnected)
        );
        if !allowed {
            return Err(ConnectionError::InvalidTransition {
                from: self.state,
                to,
            });
        }
        self.state = to;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WsQuery {
    user_id: UserId,
}

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> Response {
    if let Err(error) = server_api::authenticate(&state.api, &q.user_id).await {
        warn!(user_id = %q.user_id, message = %error.message, "realtime handshake refused");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiReply::<()>::failed(error)),
        )
            .into_response();
    }
    ws.on_upgrade(move |socket| serve_socket(state, socket, q.user_id))
}

async fn serve_socket(state: Arc<AppState>, socket: WebSocket, user_id: UserId) {
    let (mut connection, events) = Connection::new(user_id, state.router.clone());
    let (sink, mut stream) = socket.split();
    let mut pusher = tokio::spawn(pusher_loop(sink, events));

    if let Err(error) = connection.connect().await {
        warn!(%error, "failed to bring connection up");
        pusher.abort();
        return;
    }
    info!(
        user_id = %connection.user_id(),
        connection_id = %connection.id(),
        "realtime connection established"
    );

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => connection.handle_frame(&text).await,
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(error)) => {
                    debug!(user_id = %connection.user_id(), %error, "websocket read failed");
                    break;
                }
            },
            _ = &mut pusher => break,
        }
    }

    pusher.abort();
    if let Err(error) = connection.disconnect().await {
        warn!(%error, "failed to tear connection down");
    }
    info!(
        user_id = %connection.user_id(),
        connection_id = %connection.id(),
        "realtime connection closed"
    );
}

/// Drains the per-connection queue into the socket, one frame per event.
async fn pusher_loop(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut events: mpsc::UnboundedReceiver<ServerEvent>,
) {
    while let Some(event) = events.recv().await {
        let text = match serde_json::to_string(&event) {
            Ok(text) => text,
            Err(error) => {
                warn!(event = event.name(), %error, "failed to encode event");
                continue;
            }
        };
        if sink.send(WsMessage::Text(text)).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
#[path = "tests/connection_tests.rs"]
mod tests;
