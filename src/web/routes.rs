use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::state::AppState;

pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ask", post(handlers::ask::ask))
        .route("/healthz", get(handlers::health::healthz))
}
