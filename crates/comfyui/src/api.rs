//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the three endpoints the adapter needs (readiness probe,
//! workflow submission, history retrieval) using [`reqwest`].

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code without a usable body.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// ComfyUI refused the workflow (validation failure, missing nodes).
    #[error("ComfyUI rejected prompt: {message}{}", describe_node_errors(.node_errors))]
    Rejected {
        message: String,
        node_errors: Option<Value>,
    },

    /// The submission response had neither an error nor a prompt ID.
    #[error("No prompt_id in response: {body}")]
    MissingPromptId { body: String },

    /// A success response whose body is not the expected JSON.
    #[error("Invalid response from ComfyUI: {0}")]
    InvalidResponse(String),
}

impl ComfyUIApiError {
    /// Whether retrying the same request later could succeed.
    ///
    /// Connection failures, timeouts and 5xx/408/429 statuses are
    /// transient. Everything else indicates a request or protocol
    /// problem that will not fix itself.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(e) => !(e.is_builder() || e.is_decode() || e.is_redirect()),
            Self::ApiError { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Rejected { .. } | Self::MissingPromptId { .. } | Self::InvalidResponse(_) => {
                false
            }
        }
    }
}

fn describe_node_errors(node_errors: &Option<Value>) -> String {
    match node_errors {
        Some(errors) if !is_empty_json(errors) => {
            let pretty = serde_json::to_string_pretty(errors).unwrap_or_else(|_| errors.to_string());
            format!("; node errors: {pretty}")
        }
        _ => String::new(),
    }
}

fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://127.0.0.1:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        Self { client, api_url }
    }

    /// Base HTTP URL of the instance.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Lightweight liveness probe.
    ///
    /// Sends `GET /system_stats` with a per-call `timeout` and succeeds
    /// only on a 2xx status.
    pub async fn system_stats(&self, timeout: Duration) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .timeout(timeout)
            .send()
            .await?;

        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID. ComfyUI reports validation failures as a JSON body
    /// carrying `error` (and usually `node_errors`), so the body is
    /// inspected before the status code.
    pub async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        let parsed: Value = match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(_) if !status.is_success() => {
                return Err(ComfyUIApiError::ApiError {
                    status: status.as_u16(),
                    body: text,
                });
            }
            Err(e) => return Err(ComfyUIApiError::InvalidResponse(e.to_string())),
        };

        parse_submit_body(parsed)
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request. The result maps the
    /// prompt ID to its record once execution has finished, and is an
    /// empty object before that.
    pub async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| ComfyUIApiError::InvalidResponse(e.to_string()))
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Interpret a `/prompt` response body.
fn parse_submit_body(body: Value) -> Result<SubmitResponse, ComfyUIApiError> {
    if let Some(error) = body.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| error.as_str().map(str::to_string))
            .unwrap_or_else(|| error.to_string());
        let node_errors = body.get("node_errors").cloned();

        tracing::error!(
            error = %error,
            node_errors = ?node_errors,
            "ComfyUI rejected prompt",
        );
        return Err(ComfyUIApiError::Rejected {
            message,
            node_errors,
        });
    }

    if body.get("prompt_id").and_then(Value::as_str).is_none() {
        tracing::error!(body = %body, "Unexpected /prompt response");
        return Err(ComfyUIApiError::MissingPromptId {
            body: body.to_string(),
        });
    }

    serde_json::from_value(body).map_err(|e| ComfyUIApiError::InvalidResponse(e.to_string()))
}
