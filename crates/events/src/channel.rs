//! Notification transport seam.

use lpe_core::job_events::Notification;
use tokio::sync::mpsc;

/// Identifies one connected watcher.
pub type ChannelId = uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {0} is closed")]
    Closed(ChannelId),

    #[error("Failed to encode notification: {0}")]
    Encode(String),
}

/// Something a [`NotificationHub`](crate::hub::NotificationHub) can push
/// notifications into.
///
/// `send` must not block: implementations enqueue and return. An error
/// means the channel is dead and will be disconnected.
pub trait NotificationChannel: Send + Sync {
    fn id(&self) -> ChannelId;

    fn send(&self, notification: &Notification) -> Result<(), ChannelError>;
}

/// In-process channel delivering into an unbounded mpsc queue.
pub struct LocalChannel {
    id: ChannelId,
    sender: mpsc::UnboundedSender<Notification>,
}

impl LocalChannel {
    /// Create a channel and the receiver its notifications arrive on.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                id: uuid::Uuid::new_v4(),
                sender,
            },
            receiver,
        )
    }
}

impl NotificationChannel for LocalChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn send(&self, notification: &Notification) -> Result<(), ChannelError> {
        self.sender
            .send(notification.clone())
            .map_err(|_| ChannelError::Closed(self.id))
    }
}
