//! Inbound job endpoint.
//!
//! `POST /runsync` accepts the job-queue envelope `{"id"?, "input": {...}}`,
//! runs the job to completion and answers with
//! `{"id", "status", "output"}`. The response is always `200` with a
//! well-formed body; failures are carried in `output.error`.

use axum::body::Bytes;
use axum::extract::State;
use axum::{routing::post, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use seamloop_core::job::JobOutput;

use crate::state::AppState;

/// Terminal job statuses, as the job-queue platform names them.
pub const STATUS_COMPLETED: &str = "COMPLETED";
pub const STATUS_FAILED: &str = "FAILED";

#[derive(Debug, Deserialize)]
struct RunRequest {
    #[serde(default)]
    id: Option<String>,
    input: Value,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RunResponse {
    pub id: String,
    pub status: String,
    pub output: JobOutput,
}

async fn run_sync(State(state): State<AppState>, body: Bytes) -> Json<RunResponse> {
    let request: RunRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            tracing::warn!(error = %e, "Malformed job envelope");
            return Json(RunResponse {
                id: new_job_id(),
                status: STATUS_FAILED.to_string(),
                output: JobOutput::failure(format!("Invalid job request: {e}")),
            });
        }
    };

    let id = request.id.unwrap_or_else(new_job_id);
    let output = state.handler.handle(&id, &request.input).await;
    let status = if output.is_success() {
        STATUS_COMPLETED
    } else {
        STATUS_FAILED
    };

    Json(RunResponse {
        id,
        status: status.to_string(),
        output,
    })
}

fn new_job_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn router() -> Router<AppState> {
    Router::new().route("/runsync", post(run_sync))
}
