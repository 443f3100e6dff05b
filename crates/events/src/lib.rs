//! Job notification fan-out and lifecycle events.
//!
//! - [`NotificationHub`] tracks which channels watch which jobs and pushes
//!   progress/status [`Notification`](lpe_core::job_events::Notification)s
//!   to them.
//! - [`NotificationChannel`] is the transport seam; [`LocalChannel`] is the
//!   in-process implementation.
//! - [`EventBus`] is an in-process publish/subscribe hub for [`JobEvent`]s,
//!   consumed by [`EventJournal`].

pub mod bus;
pub mod channel;
pub mod hub;
pub mod journal;

pub use bus::{EventBus, JobEvent};
pub use channel::{ChannelError, ChannelId, LocalChannel, NotificationChannel};
pub use hub::{NotificationHub, SubscribeOutcome};
pub use journal::EventJournal;
