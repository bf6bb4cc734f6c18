//! `seamloop-worker` -- seamless-loop animation adapter.
//!
//! Accepts image-to-video jobs over HTTP, drives them through a local
//! ComfyUI server and returns the rendered animation base64 encoded.
//! See [`WorkerConfig::from_env`] for the environment variables.

use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seamloop_comfyui::api::ComfyUIApi;
use seamloop_comfyui::server::ServerGate;
use seamloop_core::workflow::TemplateBindings;
use seamloop_worker::config::WorkerConfig;
use seamloop_worker::handler::{HandlerSettings, JobHandler};
use seamloop_worker::router::build_app_router;
use seamloop_worker::staging::InputStager;
use seamloop_worker::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "seamloop_worker=info,seamloop_comfyui=info,comfyui=info,tower_http=info".into()
            }),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(tracing_subscriber::fmt::layer))
        .init();

    // --- Configuration ---
    let config = WorkerConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });
    tracing::info!(
        host = %config.host,
        port = config.port,
        comfyui_url = %config.comfyui_url,
        managed = config.comfyui_managed,
        "Loaded worker configuration",
    );

    let bindings = match &config.bindings_path {
        Some(path) => TemplateBindings::load(path).unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to load template bindings");
            std::process::exit(1);
        }),
        None => TemplateBindings::default(),
    };

    // --- ComfyUI gate ---
    let http = reqwest::Client::new();
    let api = ComfyUIApi::with_client(http.clone(), config.comfyui_url.clone());
    let gate = if config.comfyui_managed {
        ServerGate::managed(api, config.server_launch(), config.readiness())
    } else {
        ServerGate::external(api, config.readiness())
    };
    let gate = Arc::new(gate);

    // --- Job handler ---
    let handler = JobHandler::new(
        Arc::clone(&gate),
        InputStager::new(http, config.input_dir.clone()),
        HandlerSettings {
            workflow_path: config.workflow_path.clone(),
            bindings,
            output_dir: config.output_dir.clone(),
            poll: config.poll_policy(),
        },
    );

    // Fail fast on a template that does not match the bindings.
    if let Err(e) = handler.load_template().await {
        tracing::error!(
            error = %e,
            path = %config.workflow_path.display(),
            "Workflow template check failed",
        );
        std::process::exit(1);
    }
    tracing::info!(path = %config.workflow_path.display(), "Workflow template validated");

    let state = AppState {
        handler: Arc::new(handler),
    };
    let app = build_app_router(state);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().unwrap_or_else(|e| {
            tracing::error!(host = %config.host, error = %e, "Invalid HOST address");
            std::process::exit(1);
        }),
        config.port,
    );
    tracing::info!(%addr, "Starting job endpoint");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    gate.shutdown();
    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
