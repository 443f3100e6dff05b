//! Per-step records kept on a job after its pipeline runs.

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// Maximum number of characters kept in an input/output preview.
pub const SNAPSHOT_PREVIEW_CHARS: usize = 200;

/// Suffix appended to a preview that was cut short.
const TRUNCATION_MARKER: &str = "...";

/// Record of one completed pipeline step.
///
/// Written exactly once, when the step returns successfully. Only
/// truncated previews of the step's input and output are retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStep {
    /// Zero-based position in the pipeline.
    pub position: u32,
    /// Human-readable step label, e.g. `"Deconstructing narrative"`.
    pub name: String,
    /// Machine name of the transformation, e.g. `"deconstruct"`.
    pub step_type: String,
    pub input_snapshot: String,
    pub output_snapshot: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub duration_ms: u64,
    pub completed_at: Timestamp,
}

/// Render a JSON value as a short preview string.
///
/// Strings are used verbatim (without quotes); any other value is
/// serialized compactly. Output longer than [`SNAPSHOT_PREVIEW_CHARS`]
/// characters is cut and suffixed with `...`.
pub fn preview(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => truncate(s, SNAPSHOT_PREVIEW_CHARS),
        other => truncate(&other.to_string(), SNAPSHOT_PREVIEW_CHARS),
    }
}

/// Truncate `text` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]),
        None => text.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
