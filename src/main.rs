use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use shopask::config::{AppConfig, CliArgs};
use shopask::llm::LlmManager;
use shopask::nlq::athena::{Engine, HttpEngine};
use shopask::nlq::schema::{Catalog, HttpCatalog};
use shopask::store::Database;
use shopask::util::logging::init_tracing;
use shopask::web::{self, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    init_tracing();

    // Parse command line arguments
    let args = CliArgs::parse();

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    // Open the local store (result cache + tenancy mapping)
    info!("Opening store at {}", config.store.path);
    let db = Database::open_at(&config.store.path).await?;

    // Initialize LLM manager
    info!("Initializing LLM manager with backend: {}", config.llm.backend);
    let llm = LlmManager::new(&config.llm)?;

    // External collaborators
    let catalog: Arc<dyn Catalog> = Arc::new(HttpCatalog::new(&config.catalog)?);
    let engine: Arc<dyn Engine> = Arc::new(HttpEngine::new(&config.athena)?);

    // Create application state
    let app_state = Arc::new(AppState::new(
        config.clone(),
        db.clone(),
        llm,
        catalog,
        engine,
    ));

    // Periodic cache sweeper (the store has no native TTL eviction)
    let sweep_interval = Duration::from_secs(config.store.sweep_interval_secs.max(1));
    let sweep_db = db.clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(sweep_interval).await;
            match sweep_db.sweep_expired().await {
                Ok(0) => {}
                Ok(n) => info!("Swept {} expired cache entries", n),
                Err(e) => warn!("Cache sweep failed: {}", e),
            }
        }
    });

    // Start the web server
    info!(
        "Starting shopask server on {}:{}",
        config.web.host, config.web.port
    );
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
