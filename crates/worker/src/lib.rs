//! Job lifecycle management and background execution.
//!
//! [`JobManager`] owns job state transitions. Submitted jobs run on a
//! bounded [`WorkerPool`]; every state change is persisted through a
//! [`JobStore`](lpe_db::JobStore), pushed to watchers through the
//! [`NotificationHub`](lpe_events::NotificationHub), and published as a
//! lifecycle event on the [`EventBus`](lpe_events::EventBus).

pub mod config;
pub mod manager;
pub mod pool;
pub mod retention;

pub use config::{ConfigError, WorkerConfig};
pub use manager::{JobManager, JobStats, RecoveryReport};
pub use pool::WorkerPool;
