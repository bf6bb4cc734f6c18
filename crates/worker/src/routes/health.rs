use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use seamloop_comfyui::server::GateState;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    comfyui_ready: bool,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        comfyui_ready: state.handler.gate().state() == GateState::Ready,
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
