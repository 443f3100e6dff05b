use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::ws::Message;
use lpe_core::types::{self, Timestamp};
use lpe_events::ChannelId;
use tokio::sync::{mpsc, RwLock};

use crate::ws::channel::WsChannel;

/// Channel sender half for pushing messages to a WebSocket connection.
pub type WsSender = mpsc::UnboundedSender<Message>;

/// Metadata for a single WebSocket connection.
pub struct WsConnection {
    pub sender: WsSender,
    pub connected_at: Timestamp,
}

/// Manages all active WebSocket connections.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc` and
/// shared across the application. Job subscriptions live in the
/// [`NotificationHub`](lpe_events::NotificationHub), keyed by the same id.
pub struct WsManager {
    connections: RwLock<HashMap<ChannelId, WsConnection>>,
}

impl WsManager {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new connection.
    ///
    /// Returns the notification channel for the hub and the receiver the
    /// caller forwards to the WebSocket sink.
    pub async fn add(&self, conn_id: ChannelId) -> (WsChannel, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let channel = WsChannel::new(conn_id, tx.clone());
        let conn = WsConnection {
            sender: tx,
            connected_at: types::now(),
        };
        self.connections.write().await.insert(conn_id, conn);
        (channel, rx)
    }

    pub async fn remove(&self, conn_id: ChannelId) {
        self.connections.write().await.remove(&conn_id);
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Send a Close frame to every connection, then clear the map.
    pub async fn shutdown_all(&self) {
        let mut conns = self.connections.write().await;
        let count = conns.len();
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Close(None));
        }
        conns.clear();
        tracing::info!(count, "Closed all WebSocket connections");
    }

    /// Send a Ping frame to every connected client.
    pub async fn ping_all(&self) {
        let conns = self.connections.read().await;
        for conn in conns.values() {
            let _ = conn.sender.send(Message::Ping(Bytes::new()));
        }
    }
}

impl Default for WsManager {
    fn default() -> Self {
        Self::new()
    }
}
