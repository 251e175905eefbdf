use crate::api::AppState;
use axum::{extract::State, Json};

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Readiness plus the ledger settings this instance recalculates with.
pub async fn ready(State(state): State<AppState>) -> Json<serde_json::Value> {
    let settings = state.dispatcher.recalculator().settings();
    Json(serde_json::json!({
        "status": "ready",
        "shareUnit": settings.unit.value(),
        "mode": settings.mode,
    }))
}
