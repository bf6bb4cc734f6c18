//! Bounded completion polling for queued prompts.
//!
//! ComfyUI's `/history/{prompt_id}` returns an empty object until the
//! prompt has finished (successfully or not) and a mapping keyed by the
//! prompt ID afterwards. [`wait_for_completion`] polls that endpoint
//! with a growing interval until the key appears, the deadline passes,
//! or the server keeps failing in a way that will not recover.

use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;

use crate::api::{ComfyUIApi, ComfyUIApiError};

/// Tunable parameters for the completion poll.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    /// Total time to wait for the prompt to appear in history.
    pub timeout: Duration,
    /// Delay after the first unsuccessful check.
    pub initial_interval: Duration,
    /// Upper bound on the delay between checks.
    pub max_interval: Duration,
    /// Factor by which the delay grows after each check.
    pub multiplier: f64,
    /// Transient failures in a row that are tolerated before giving up.
    pub max_consecutive_failures: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(600),
            initial_interval: Duration::from_secs(1),
            max_interval: Duration::from_secs(5),
            multiplier: 1.5,
            max_consecutive_failures: 30,
        }
    }
}

/// Calculate the next poll interval from the current one.
///
/// The result is clamped to [`PollPolicy::max_interval`].
pub fn next_interval(current: Duration, policy: &PollPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_interval)
}

/// Errors that end a completion poll.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    /// The prompt did not show up in history before the deadline.
    #[error("Prompt {prompt_id} did not complete within {timeout_secs} seconds")]
    Timeout { prompt_id: String, timeout_secs: u64 },

    /// Every recent history request failed with a transient error.
    #[error("ComfyUI unreachable while polling prompt {prompt_id} ({failures} consecutive failures): {source}")]
    Unreachable {
        prompt_id: String,
        failures: u32,
        #[source]
        source: ComfyUIApiError,
    },

    /// History lookup failed in a way retrying will not fix.
    #[error("History lookup for prompt {prompt_id} failed: {source}")]
    Api {
        prompt_id: String,
        #[source]
        source: ComfyUIApiError,
    },
}

/// Wait for `prompt_id` to appear in ComfyUI's history and return its
/// record.
///
/// Transient errors count as "not ready yet" until
/// [`PollPolicy::max_consecutive_failures`] of them arrive in a row.
/// No sleep or request runs past the deadline, so a prompt that never
/// completes fails close to [`PollPolicy::timeout`].
pub async fn wait_for_completion(
    api: &ComfyUIApi,
    prompt_id: &str,
    policy: &PollPolicy,
) -> Result<Value, PollError> {
    let started = Instant::now();
    let deadline = started + policy.timeout;
    let mut interval = policy.initial_interval;
    let mut failures = 0u32;
    let mut attempt = 0u32;

    let timed_out = || PollError::Timeout {
        prompt_id: prompt_id.to_string(),
        timeout_secs: policy.timeout.as_secs(),
    };

    loop {
        attempt += 1;
        let remaining = deadline.saturating_duration_since(Instant::now());

        match tokio::time::timeout(remaining, api.get_history(prompt_id)).await {
            Err(_elapsed) => return Err(timed_out()),
            Ok(Ok(mut history)) => {
                failures = 0;
                if let Some(record) = history
                    .as_object_mut()
                    .and_then(|entries| entries.remove(prompt_id))
                {
                    tracing::info!(
                        prompt_id,
                        attempt,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Prompt found in history",
                    );
                    return Ok(record);
                }
                tracing::debug!(prompt_id, attempt, "Prompt not in history yet");
            }
            Ok(Err(e)) if e.is_transient() => {
                failures += 1;
                tracing::warn!(
                    prompt_id,
                    attempt,
                    failures,
                    error = %e,
                    "History request failed",
                );
                if failures >= policy.max_consecutive_failures {
                    return Err(PollError::Unreachable {
                        prompt_id: prompt_id.to_string(),
                        failures,
                        source: e,
                    });
                }
            }
            Ok(Err(e)) => {
                return Err(PollError::Api {
                    prompt_id: prompt_id.to_string(),
                    source: e,
                });
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(timed_out());
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
        interval = next_interval(interval, policy);
    }
}
