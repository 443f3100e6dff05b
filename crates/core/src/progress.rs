//! Progress snapshots for running jobs.
//!
//! A [`ProgressSnapshot`] is an immutable point-in-time summary of how far a
//! job has advanced through its pipeline. New snapshots replace old ones on
//! the job record; they are never edited in place.

use serde::{Deserialize, Serialize};

use crate::types::{self, Timestamp};

/// Point-in-time progress of a running job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    /// Label of the step currently executing (or just finished).
    pub current_step: String,
    /// Number of steps in the pipeline.
    pub total_steps: u32,
    /// Number of steps that have finished.
    pub completed_steps: u32,
    /// Derived completion percentage in `0.0..=100.0`.
    pub percentage: f64,
    /// Free-text detail for display.
    pub detail: String,
    pub timestamp: Timestamp,
}

impl ProgressSnapshot {
    /// Build a snapshot, deriving the percentage from the step counts.
    ///
    /// Pure apart from reading the clock for `timestamp`.
    pub fn compute(
        current_step: impl Into<String>,
        completed_steps: u32,
        total_steps: u32,
        detail: impl Into<String>,
    ) -> Self {
        Self::compute_at(
            current_step,
            completed_steps,
            total_steps,
            detail,
            types::now(),
        )
    }

    /// Same as [`compute`](Self::compute) with an explicit timestamp.
    pub fn compute_at(
        current_step: impl Into<String>,
        completed_steps: u32,
        total_steps: u32,
        detail: impl Into<String>,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            current_step: current_step.into(),
            total_steps,
            completed_steps,
            percentage: percentage(completed_steps, total_steps),
            detail: detail.into(),
            timestamp,
        }
    }

    /// Whether every step has finished.
    pub fn is_finished(&self) -> bool {
        self.total_steps > 0 && self.completed_steps >= self.total_steps
    }
}

/// `100 * completed / total`, clamped to `0..=100`; zero when `total` is zero.
pub fn percentage(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (100.0 * f64::from(completed) / f64::from(total)).clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
