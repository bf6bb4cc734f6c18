use std::sync::Arc;

use crate::handler::JobHandler;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; the handler lives behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    /// Job handler bound to the process-wide ComfyUI gate.
    pub handler: Arc<JobHandler>,
}
