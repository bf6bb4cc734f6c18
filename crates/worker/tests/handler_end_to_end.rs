//! End-to-end job handling against a stubbed ComfyUI server.

mod common;

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::{harness, harness_with_poll_timeout, RENDERED_BYTES, TINY_PNG_BASE64};
use seamloop_core::job::JobOutput;

// ---------------------------------------------------------------------------
// Test: a complete job returns the rendered bytes and its seed
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completed_job_returns_encoded_video_and_seed() {
    let h = harness().await;
    h.mount_ready().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_partial_json(json!({
            "prompt": {
                "6":   { "inputs": { "text": "sway gently" } },
                "59":  { "inputs": { "length": 25 } },
                "69":  { "inputs": { "length": 24 } },
                "61":  { "inputs": { "temporal_size": 32 } },
                "126": { "inputs": { "fps": 10 } }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "p-1", "number": 0 })))
        .expect(1)
        .mount(&h.comfyui)
        .await;

    h.write_output("", "seamless_loop_test_00001_.webp", RENDERED_BYTES);
    h.mount_history(
        "p-1",
        json!({
            "status": { "status_str": "success", "completed": true, "messages": [] },
            "outputs": {
                "126": { "gifs": [{ "filename": "seamless_loop_test_00001_.webp", "subfolder": "", "type": "output" }] }
            }
        }),
    )
    .await;

    let output = h
        .handler
        .handle(
            "job-1",
            &json!({
                "image": TINY_PNG_BASE64,
                "prompt": "sway gently",
                "frame_count": 25,
                "fps": 10
            }),
        )
        .await;

    let JobOutput::Success { video, seed } = output else {
        panic!("expected success, got {output:?}");
    };
    assert_eq!(STANDARD.decode(video).unwrap(), RENDERED_BYTES);
    assert!(seed.as_u64().is_some_and(|s| s <= u64::from(u32::MAX)));
    assert_eq!(h.staged_file_count(), 0, "staged input should be cleaned up");
}

// ---------------------------------------------------------------------------
// Test: explicit seed, data URL prefix and subfolder outputs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn explicit_seed_is_submitted_and_echoed() {
    let h = harness().await;
    h.mount_ready().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_partial_json(json!({
            "prompt": {
                "3":  { "inputs": { "seed": 987654321u64 } },
                "59": { "inputs": { "length": 21 } },
                "69": { "inputs": { "length": 20 } },
                "61": { "inputs": { "temporal_size": 28 } },
                "126": { "inputs": { "fps": 12 } }
            }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "p-2" })))
        .expect(1)
        .mount(&h.comfyui)
        .await;

    h.write_output("loops", "out.webp", b"webp");
    h.mount_history(
        "p-2",
        json!({ "outputs": { "126": { "images": [{ "filename": "out.webp", "subfolder": "loops" }] } } }),
    )
    .await;

    let output = h
        .handler
        .handle(
            "job-2",
            &json!({
                "image": format!("data:image/png;base64,{TINY_PNG_BASE64}"),
                "seed": 987654321u64
            }),
        )
        .await;

    assert_eq!(
        output,
        JobOutput::Success {
            video: STANDARD.encode(b"webp"),
            seed: 987654321.into(),
        }
    );
}

#[tokio::test]
async fn negative_seed_passes_through_to_the_sampler() {
    let h = harness().await;
    h.mount_ready().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .and(body_partial_json(json!({ "prompt": { "3": { "inputs": { "seed": -1 } } } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "p-neg" })))
        .expect(1)
        .mount(&h.comfyui)
        .await;

    h.write_output("", "neg.webp", b"neg");
    h.mount_history("p-neg", json!({ "outputs": { "126": { "gifs": [{ "filename": "neg.webp" }] } } }))
        .await;

    let output = h
        .handler
        .handle("job-neg", &json!({ "image": TINY_PNG_BASE64, "seed": -1 }))
        .await;

    assert_eq!(
        output,
        JobOutput::Success {
            video: STANDARD.encode(b"neg"),
            seed: (-1).into(),
        }
    );
}

#[tokio::test]
async fn overflowing_frame_count_is_an_error_result() {
    let h = harness().await;
    h.mount_ready().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.comfyui)
        .await;

    let output = h
        .handler
        .handle(
            "job-big",
            &json!({ "image": TINY_PNG_BASE64, "frame_count": i64::MAX }),
        )
        .await;

    assert!(matches!(output, JobOutput::Failure { ref error } if error.contains("frame_count")));
    assert_eq!(h.staged_file_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: input validation happens before any server contact
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_image_fails_without_touching_comfyui() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/system_stats"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.comfyui)
        .await;

    let output = h.handler.handle("job-3", &json!({ "prompt": "x" })).await;
    assert_eq!(output, JobOutput::failure("Missing required field: image"));
}

#[tokio::test]
async fn malformed_base64_fails_before_submission() {
    let h = harness().await;
    h.mount_ready().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&h.comfyui)
        .await;

    let output = h.handler.handle("job-4", &json!({ "image": "%%%not-base64%%%" })).await;
    assert!(matches!(output, JobOutput::Failure { ref error } if error.contains("base64")));
    assert_eq!(h.staged_file_count(), 0);
}

// ---------------------------------------------------------------------------
// Test: submission failures stop the job before polling
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rejected_prompt_is_reported_and_input_cleaned_up() {
    let h = harness().await;
    h.mount_ready().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "type": "invalid_prompt", "message": "Cannot execute because a node is missing" },
            "node_errors": {}
        })))
        .mount(&h.comfyui)
        .await;

    let output = h.handler.handle("job-5", &json!({ "image": TINY_PNG_BASE64 })).await;
    assert_eq!(
        output,
        JobOutput::failure("ComfyUI rejected prompt: Cannot execute because a node is missing")
    );
    assert_eq!(h.staged_file_count(), 0);
}

#[tokio::test]
async fn missing_prompt_id_fails_before_polling() {
    let h = harness().await;
    h.mount_ready().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "number": 1 })))
        .mount(&h.comfyui)
        .await;
    Mock::given(method("GET"))
        .and(wiremock::matchers::path_regex("^/history/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(0)
        .mount(&h.comfyui)
        .await;

    let output = h.handler.handle("job-6", &json!({ "image": TINY_PNG_BASE64 })).await;
    assert!(matches!(output, JobOutput::Failure { ref error } if error.starts_with("No prompt_id in response")));
}

// ---------------------------------------------------------------------------
// Test: execution and extraction failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn execution_error_in_history_is_reported() {
    let h = harness().await;
    h.mount_ready().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "p-7" })))
        .mount(&h.comfyui)
        .await;
    h.mount_history(
        "p-7",
        json!({
            "status": {
                "status_str": "error",
                "messages": [["execution_error", { "exception_message": "Allocation on device failed" }]]
            },
            "outputs": {}
        }),
    )
    .await;

    let output = h.handler.handle("job-7", &json!({ "image": TINY_PNG_BASE64 })).await;
    assert!(matches!(output, JobOutput::Failure { ref error }
        if error.starts_with("ComfyUI execution failed") && error.contains("Allocation on device failed")));
}

#[tokio::test]
async fn history_without_outputs_is_not_found() {
    let h = harness().await;
    h.mount_ready().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "p-8" })))
        .mount(&h.comfyui)
        .await;
    h.mount_history("p-8", json!({ "outputs": { "3": {} } })).await;

    let output = h.handler.handle("job-8", &json!({ "image": TINY_PNG_BASE64 })).await;
    assert_eq!(output, JobOutput::failure("No output file found in history"));
}

#[tokio::test]
async fn poll_timeout_is_reported_distinctly() {
    let h = harness_with_poll_timeout(Duration::from_millis(300)).await;
    h.mount_ready().await;

    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "slow" })))
        .mount(&h.comfyui)
        .await;
    Mock::given(method("GET"))
        .and(path("/history/slow"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&h.comfyui)
        .await;

    let output = h.handler.handle("job-9", &json!({ "image": TINY_PNG_BASE64 })).await;
    assert!(matches!(output, JobOutput::Failure { ref error }
        if error.starts_with("Prompt slow did not complete within")));
}

// ---------------------------------------------------------------------------
// Test: readiness gate failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unready_server_fails_the_job_and_next_job_retries() {
    let h = harness().await;
    Mock::given(method("GET"))
        .and(path("/system_stats"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&h.comfyui)
        .await;

    let output = h.handler.handle("job-10", &json!({ "image": TINY_PNG_BASE64 })).await;
    assert!(matches!(output, JobOutput::Failure { ref error } if error.contains("failed to start")));
    assert_eq!(h.staged_file_count(), 0);

    // The server comes up; the gate tries again on the next job.
    h.comfyui.reset().await;
    h.mount_ready().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "prompt_id": "p-11" })))
        .mount(&h.comfyui)
        .await;
    h.write_output("", "late.webp", b"late");
    h.mount_history("p-11", json!({ "outputs": { "126": { "images": [{ "filename": "late.webp" }] } } }))
        .await;

    let output = h.handler.handle("job-11", &json!({ "image": TINY_PNG_BASE64 })).await;
    assert!(output.is_success(), "got {output:?}");
}
