//! Output extraction from a completed ComfyUI history record.
//!
//! A record from `GET /history/{prompt_id}` looks like:
//!
//! ```json
//! {
//!   "status": { "status_str": "success", "completed": true, "messages": [...] },
//!   "outputs": {
//!     "126": { "images": [{ "filename": "seamless_loop_1a2b3c4d_00001_.webp",
//!                           "subfolder": "", "type": "output" }] }
//!   }
//! }
//! ```

use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::error::CoreError;

/// Output list written by animated savers (takes precedence).
pub const ANIMATED_OUTPUT_KEY: &str = "gifs";

/// Generic output list written by image savers.
pub const IMAGE_OUTPUT_KEY: &str = "images";

/// `status.status_str` value of a failed execution.
const STATUS_ERROR: &str = "error";

/// Resolve the produced media file of a completed record.
///
/// Fails with [`CoreError::Execution`] when the record reports an error
/// status, or [`CoreError::NoOutput`] when no node produced a named
/// file. Nodes are scanned in manifest order and the first match wins.
/// Within a node the animated list is tried first, then the image list.
pub fn output_file(record: &Value, output_root: &Path) -> Result<PathBuf, CoreError> {
    check_status(record)?;

    let Some(outputs) = record.get("outputs").and_then(Value::as_object) else {
        return Err(CoreError::NoOutput);
    };

    for (node_id, node_output) in outputs {
        tracing::debug!(
            node_id = %node_id,
            keys = ?output_keys(node_output),
            "Inspecting node output",
        );

        let found = [ANIMATED_OUTPUT_KEY, IMAGE_OUTPUT_KEY]
            .into_iter()
            .filter_map(|key| node_output.get(key).and_then(Value::as_array))
            .find_map(|entries| first_named_file(entries, output_root));

        if let Some(path) = found {
            return Ok(path);
        }
    }

    Err(CoreError::NoOutput)
}

/// Path of the first entry in an output list that carries a filename.
fn first_named_file(entries: &[Value], output_root: &Path) -> Option<PathBuf> {
    entries.iter().find_map(|entry| {
        let filename = entry.get("filename").and_then(Value::as_str)?;
        if filename.is_empty() {
            return None;
        }
        let subfolder = entry
            .get("subfolder")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Some(output_root.join(subfolder).join(filename))
    })
}

/// Top-level keys of a record, for diagnostics.
pub fn record_keys(record: &Value) -> Vec<String> {
    output_keys(record)
}

fn output_keys(value: &Value) -> Vec<String> {
    value
        .as_object()
        .map(|obj| obj.keys().cloned().collect())
        .unwrap_or_default()
}

fn check_status(record: &Value) -> Result<(), CoreError> {
    let Some(status) = record.get("status") else {
        return Ok(());
    };
    if status.get("status_str").and_then(Value::as_str) != Some(STATUS_ERROR) {
        return Ok(());
    }

    let messages = status
        .get("messages")
        .cloned()
        .unwrap_or_else(|| Value::Array(Vec::new()));
    Err(CoreError::Execution(messages.to_string()))
}
