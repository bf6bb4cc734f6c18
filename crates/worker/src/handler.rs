//! The seamless-loop job handler.
//!
//! One invocation runs strictly in sequence: readiness gate, input
//! staging, template parametrization, submission, completion poll,
//! output extraction and encoding. Any failure becomes a
//! [`JobOutput::Failure`]; nothing escapes [`JobHandler::handle`].

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use seamloop_comfyui::api::ComfyUIApiError;
use seamloop_comfyui::poll::{wait_for_completion, PollError, PollPolicy};
use seamloop_comfyui::server::{ServerError, ServerGate};
use seamloop_core::error::CoreError;
use seamloop_core::history::{output_file, record_keys};
use seamloop_core::job::{JobInput, JobOutput};
use seamloop_core::payload::{encode_media, ImageSource};
use seamloop_core::workflow::{TemplateBindings, WorkflowTemplate};

use crate::staging::{InputStager, StagingError};

/// Everything a job needs besides the server and the stager.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Workflow template, re-read for every job.
    pub workflow_path: PathBuf,
    pub bindings: TemplateBindings,
    /// Root of ComfyUI's output tree.
    pub output_dir: PathBuf,
    pub poll: PollPolicy,
}

/// Errors that abort a job. All of them are reported back as
/// `{"error": <message>}`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Server(#[from] ServerError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error(transparent)]
    Api(#[from] ComfyUIApiError),

    #[error(transparent)]
    Poll(#[from] PollError),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Runs jobs against one ComfyUI server.
pub struct JobHandler {
    gate: Arc<ServerGate>,
    stager: InputStager,
    settings: HandlerSettings,
}

impl JobHandler {
    pub fn new(gate: Arc<ServerGate>, stager: InputStager, settings: HandlerSettings) -> Self {
        Self {
            gate,
            stager,
            settings,
        }
    }

    pub fn gate(&self) -> &ServerGate {
        &self.gate
    }

    /// Run one job and report its outcome.
    #[tracing::instrument(skip_all, fields(job_id = %job_id))]
    pub async fn handle(&self, job_id: &str, input: &Value) -> JobOutput {
        match self.run(input).await {
            Ok(output) => output,
            Err(e) => {
                tracing::error!(error = %e, "Job failed");
                JobOutput::failure(e)
            }
        }
    }

    /// Load and validate the template from disk.
    pub async fn load_template(&self) -> Result<WorkflowTemplate, HandlerError> {
        let path = &self.settings.workflow_path;
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| HandlerError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Ok(WorkflowTemplate::from_json(&raw, self.settings.bindings.clone())?)
    }

    async fn run(&self, input: &Value) -> Result<JobOutput, HandlerError> {
        let job = JobInput::from_value(input)?;

        self.gate.ensure_ready().await?;

        let source = ImageSource::parse(&job.image)?;
        let staged = self.stager.stage(source).await?;

        let params = job.resolve();
        let template = self.load_template().await?;
        let workflow = template.parametrize(&params, staged.filename())?;

        tracing::info!(
            seed = %params.seed,
            frame_count = params.frame_count,
            fps = params.fps,
            filename_prefix = %workflow.filename_prefix,
            "Queuing prompt",
        );

        let api = self.gate.api();
        let client_id = uuid::Uuid::new_v4().to_string();
        let submitted = api.submit_workflow(&workflow.graph, &client_id).await?;
        tracing::info!(
            prompt_id = %submitted.prompt_id,
            queue_position = submitted.number,
            "Prompt queued, waiting for completion",
        );

        let record = wait_for_completion(api, &submitted.prompt_id, &self.settings.poll).await?;
        tracing::debug!(keys = ?record_keys(&record), "History record received");

        let output_path = output_file(&record, &self.settings.output_dir)?;
        tracing::info!(path = %output_path.display(), "Output file resolved");

        let bytes = tokio::fs::read(&output_path)
            .await
            .map_err(|source| HandlerError::Io {
                path: output_path.display().to_string(),
                source,
            })?;
        let video = encode_media(&bytes);

        drop(staged);

        Ok(JobOutput::Success {
            video,
            seed: params.seed,
        })
    }
}
