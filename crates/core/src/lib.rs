//! Domain model for the LPE job engine.
//!
//! This crate has no internal dependencies and no I/O. It defines the
//! [`Job`](job::Job) record and its state machine, progress snapshots,
//! pipeline step records, the notification envelope pushed to watchers,
//! and the shared [`CoreError`](error::CoreError) taxonomy.

pub mod error;
pub mod job;
pub mod job_events;
pub mod progress;
pub mod step;
pub mod types;
