//! Inbound job requests and outbound job results.

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Frames rendered when the request does not specify `frame_count`.
/// The final frame is trimmed, so 21 yields a 20-frame loop.
pub const DEFAULT_FRAME_COUNT: i64 = 21;

/// Playback rate when the request does not specify `fps`.
pub const DEFAULT_FPS: i64 = 12;

/// Frames discarded from the end of the render so the loop closes.
pub const LOOP_TRIM_FRAMES: i64 = 1;

/// Extra frames the decode stage needs beyond the frame count.
pub const DECODE_WINDOW_PADDING: i64 = 7;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// The `input` object of an inbound job, as sent by the job-queue platform.
///
/// Numeric fields are unbounded: the render server decides what it
/// accepts. The seed is kept as the JSON number it arrived as.
#[derive(Debug, Clone, Deserialize)]
pub struct JobInput {
    /// Base64 payload (optionally `data:...;base64,` prefixed) or an
    /// `http(s)` URL.
    pub image: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub frame_count: Option<i64>,
    #[serde(default)]
    pub fps: Option<i64>,
    #[serde(default)]
    pub seed: Option<Number>,
}

impl JobInput {
    /// Parse a job `input` value.
    ///
    /// A missing `image` is reported as [`CoreError::MissingField`]
    /// before any other field is looked at.
    pub fn from_value(value: &serde_json::Value) -> Result<Self, CoreError> {
        let obj = value
            .as_object()
            .ok_or_else(|| CoreError::Validation("job input must be a JSON object".into()))?;

        if !obj.contains_key("image") {
            return Err(CoreError::MissingField("image"));
        }

        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::Validation(format!("invalid job input: {e}")))
    }

    /// Apply defaults, drawing a random seed if none was supplied.
    pub fn resolve(&self) -> JobParams {
        JobParams {
            prompt: self.prompt.clone().unwrap_or_default(),
            frame_count: self.frame_count.unwrap_or(DEFAULT_FRAME_COUNT),
            fps: self.fps.unwrap_or(DEFAULT_FPS),
            seed: self.seed.clone().unwrap_or_else(random_seed),
        }
    }
}

/// Fully resolved generation parameters for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobParams {
    pub prompt: String,
    pub frame_count: i64,
    pub fps: i64,
    pub seed: Number,
}

impl JobParams {
    /// Length after dropping the final frame (`frame_count - 1`).
    pub fn loop_trim_length(&self) -> Result<i64, CoreError> {
        self.frame_count
            .checked_sub(LOOP_TRIM_FRAMES)
            .ok_or_else(|| frame_count_out_of_range(self.frame_count))
    }

    /// Temporal window for the decode stage (`frame_count + 7`).
    pub fn decode_window(&self) -> Result<i64, CoreError> {
        self.frame_count
            .checked_add(DECODE_WINDOW_PADDING)
            .ok_or_else(|| frame_count_out_of_range(self.frame_count))
    }
}

fn frame_count_out_of_range(frame_count: i64) -> CoreError {
    CoreError::Validation(format!(
        "frame_count {frame_count} is out of range for derived frame fields"
    ))
}

/// A random seed in the unsigned 32-bit range.
pub fn random_seed() -> Number {
    Number::from(rand::random::<u32>())
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// What the adapter hands back to the job-queue platform.
///
/// Serializes as either `{"video": "...", "seed": 123}` or
/// `{"error": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobOutput {
    Success { video: String, seed: Number },
    Failure { error: String },
}

impl JobOutput {
    pub fn failure(error: impl ToString) -> Self {
        Self::Failure {
            error: error.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}
