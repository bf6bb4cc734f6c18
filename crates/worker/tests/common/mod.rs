//! Shared fixtures for worker integration tests: a stubbed ComfyUI
//! server, temporary input/output directories and a stock template.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use seamloop_comfyui::api::ComfyUIApi;
use seamloop_comfyui::poll::PollPolicy;
use seamloop_comfyui::server::{ReadinessConfig, ServerGate};
use seamloop_core::workflow::TemplateBindings;
use seamloop_worker::handler::{HandlerSettings, JobHandler};
use seamloop_worker::staging::InputStager;

/// A 1x1 transparent PNG.
pub const TINY_PNG_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNkYPhfDwAChwGA60e6kgAAAABJRU5ErkJggg==";

/// Bytes the stub "renders".
pub const RENDERED_BYTES: &[u8] = b"RIFF\x24\x00\x00\x00WEBPVP8X fake animated webp";

/// Minimal graph carrying every node the default bindings touch.
pub fn stock_template() -> Value {
    json!({
        "3":   { "class_type": "KSampler", "inputs": { "seed": 0, "steps": 20, "cfg": 6.0 } },
        "6":   { "class_type": "CLIPTextEncode", "inputs": { "text": "", "clip": ["38", 0] } },
        "52":  { "class_type": "LoadImage", "inputs": { "image": "start.png" } },
        "59":  { "class_type": "WanFirstLastFrameToVideo", "inputs": { "length": 81 } },
        "61":  { "class_type": "VAEDecodeTiled", "inputs": { "temporal_size": 64 } },
        "69":  { "class_type": "ImageFromBatch", "inputs": { "length": 80 } },
        "102": { "class_type": "LoadImage", "inputs": { "image": "end.png" } },
        "126": { "class_type": "SaveAnimatedWEBP", "inputs": { "fps": 16, "filename_prefix": "ComfyUI" } }
    })
}

pub struct Harness {
    pub comfyui: MockServer,
    pub dir: TempDir,
    pub handler: Arc<JobHandler>,
}

impl Harness {
    pub fn input_dir(&self) -> PathBuf {
        self.dir.path().join("input")
    }

    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    /// Place a rendered file where ComfyUI would have written it.
    pub fn write_output(&self, subfolder: &str, filename: &str, bytes: &[u8]) {
        let dir = self.output_dir().join(subfolder);
        std::fs::create_dir_all(&dir).expect("create output dir");
        std::fs::write(dir.join(filename), bytes).expect("write output");
    }

    pub fn staged_file_count(&self) -> usize {
        count_files(&self.input_dir())
    }

    pub async fn mount_ready(&self) {
        Mock::given(method("GET"))
            .and(path("/system_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "system": {} })))
            .mount(&self.comfyui)
            .await;
    }

    pub async fn mount_history(&self, prompt_id: &str, record: Value) {
        let mut history = serde_json::Map::new();
        history.insert(prompt_id.to_string(), record);
        Mock::given(method("GET"))
            .and(path(format!("/history/{prompt_id}")))
            .respond_with(ResponseTemplate::new(200).set_body_json(Value::Object(history)))
            .mount(&self.comfyui)
            .await;
    }
}

fn count_files(dir: &Path) -> usize {
    std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
}

/// Build a handler wired to a fresh stub server and temp directories.
pub async fn harness() -> Harness {
    harness_with_poll_timeout(Duration::from_secs(5)).await
}

pub async fn harness_with_poll_timeout(timeout: Duration) -> Harness {
    let comfyui = MockServer::start().await;
    let dir = tempfile::tempdir().expect("create temp dir");

    let workflow_path = dir.path().join("workflow_api.json");
    std::fs::write(&workflow_path, stock_template().to_string()).expect("write template");

    let readiness = ReadinessConfig {
        timeout: Duration::from_millis(300),
        interval: Duration::from_millis(25),
        probe_timeout: Duration::from_millis(200),
    };
    let gate = ServerGate::external(ComfyUIApi::new(comfyui.uri()), readiness);

    let handler = JobHandler::new(
        Arc::new(gate),
        InputStager::new(reqwest::Client::new(), dir.path().join("input")),
        HandlerSettings {
            workflow_path,
            bindings: TemplateBindings::default(),
            output_dir: dir.path().join("output"),
            poll: PollPolicy {
                timeout,
                initial_interval: Duration::from_millis(20),
                max_interval: Duration::from_millis(50),
                ..Default::default()
            },
        },
    );

    Harness {
        comfyui,
        dir,
        handler: Arc::new(handler),
    }
}
