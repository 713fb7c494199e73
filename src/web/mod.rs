pub mod handlers;
pub mod routes;
pub mod state;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use crate::config::WebConfig;
use crate::error::{Error, Result};

use self::routes::api_routes;
use self::state::AppState;

pub async fn run_server(config: WebConfig, app_state: Arc<AppState>) -> Result<()> {
    let app = Router::new()
        .merge(api_routes())
        .fallback(fallback_handler)
        .with_state(app_state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .map_err(|e| Error::Config(format!("invalid bind address: {}", e)))?;

    info!("Starting web server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Config(format!("bind {}: {}", addr, e)))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| Error::Config(format!("server error: {}", e)))?;

    Ok(())
}

// Fallback handler for unmatched routes
async fn fallback_handler() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        "The requested resource was not found",
    )
}
