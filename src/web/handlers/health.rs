use axum::{extract::State, Json};
use serde_json::json;
use std::sync::Arc;

use crate::web::state::AppState;

pub async fn healthz(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = (chrono::Utc::now() - state.startup_time).num_seconds();
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": uptime,
    }))
}
