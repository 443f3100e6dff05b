//! WebSocket infrastructure for live job updates.
//!
//! Provides connection management, the watch protocol, heartbeat
//! monitoring, and the HTTP upgrade handler used by Axum routes.

mod channel;
mod handler;
mod heartbeat;
pub mod manager;
pub mod protocol;

pub use channel::WsChannel;
pub use handler::ws_handler;
pub use heartbeat::start_heartbeat;
pub use manager::WsManager;
