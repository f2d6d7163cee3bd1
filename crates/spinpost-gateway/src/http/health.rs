use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::app::AppState;

/// GET /health — liveness probe plus run/durability summary.
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let flags = state.state.flags();
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "durable": state.durable && !state.state.is_degraded(),
        "running": flags.is_running,
        "active_campaign_id": flags.active_campaign_id,
        "uploads_in_flight": state.uploads.in_flight(),
        "media_sessions": state.media_session_count(),
    }))
}
