use axum::extract::ws::Message;
use lpe_core::job_events::Notification;
use lpe_events::{ChannelError, ChannelId, NotificationChannel};

use crate::ws::manager::WsSender;

/// [`NotificationChannel`] writing JSON text frames to one WebSocket
/// connection's outbound queue.
#[derive(Clone)]
pub struct WsChannel {
    id: ChannelId,
    sender: WsSender,
}

impl WsChannel {
    pub fn new(id: ChannelId, sender: WsSender) -> Self {
        Self { id, sender }
    }

    /// Queue an arbitrary text frame.
    pub fn send_text(&self, text: String) -> Result<(), ChannelError> {
        self.sender
            .send(Message::Text(text.into()))
            .map_err(|_| ChannelError::Closed(self.id))
    }
}

impl NotificationChannel for WsChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        let text = serde_json::to_string(notification)
            .map_err(|e| ChannelError::Encode(e.to_string()))?;
        self.send_text(text)
    }
}
