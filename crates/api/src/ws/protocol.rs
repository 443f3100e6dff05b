//! Client/server messages of the watch protocol.
//!
//! Clients send `{"type":"watch","jobId":...}`, `{"type":"unwatch","jobId":...}`
//! and `{"type":"ping"}`. The server answers pings with `{"type":"pong"}`,
//! reports problems with `{"type":"error",...}`, and otherwise pushes job
//! notifications from the hub.

use std::sync::Arc;

use lpe_core::types::JobId;
use lpe_events::{ChannelError, NotificationChannel, SubscribeOutcome};
use lpe_worker::JobManager;
use serde::{Deserialize, Serialize};

use crate::ws::channel::WsChannel;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    Watch {
        #[serde(rename = "jobId", alias = "job_id")]
        job_id: JobId,
    },
    Unwatch {
        #[serde(rename = "jobId", alias = "job_id")]
        job_id: JobId,
    },
    Ping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    Pong,
    Error {
        #[serde(rename = "jobId", skip_serializing_if = "Option::is_none")]
        job_id: Option<JobId>,
        message: String,
    },
}

impl ServerMessage {
    pub fn error(job_id: Option<JobId>, message: impl Into<String>) -> Self {
        Self::Error {
            job_id,
            message: message.into(),
        }
    }
}

/// Handle one text frame from `channel`'s client.
///
/// Errors only when the connection itself is dead; bad requests are
/// answered with an error message.
pub async fn dispatch(manager: &JobManager, channel: &WsChannel, text: &str) -> Result<(), ChannelError> {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(conn_id = %channel.id(), error = %e, "Unrecognized WebSocket message");
            return reply(channel, &ServerMessage::error(None, format!("Unrecognized message: {e}")));
        }
    };

    match message {
        ClientMessage::Watch { job_id } => match manager.get(job_id).await {
            Ok(job) => {
                let outcome = manager.hub().subscribe(Arc::new(channel.clone()), &job).await?;
                if outcome == SubscribeOutcome::Finished {
                    tracing::debug!(conn_id = %channel.id(), job_id = %job_id, "Watched job already finished");
                }
                Ok(())
            }
            Err(e) => reply(channel, &ServerMessage::error(Some(job_id), e.to_string())),
        },
        ClientMessage::Unwatch { job_id } => {
            manager.hub().unsubscribe(channel.id(), job_id).await;
            Ok(())
        }
        ClientMessage::Ping => reply(channel, &ServerMessage::Pong),
    }
}

fn reply(channel: &WsChannel, message: &ServerMessage) -> Result<(), ChannelError> {
    let text = serde_json::to_string(message).map_err(|e| ChannelError::Encode(e.to_string()))?;
    channel.send_text(text)
}
