use std::sync::Arc;

use crate::config::AppConfig;
use crate::llm::LlmManager;
use crate::nlq::athena::Engine;
use crate::nlq::schema::Catalog;
use crate::store::Database;

/// Shared application state for the web server. The catalog and engine
/// are trait objects so tests can wire in doubles.
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub llm: LlmManager,
    pub catalog: Arc<dyn Catalog>,
    pub engine: Arc<dyn Engine>,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db: Database,
        llm: LlmManager,
        catalog: Arc<dyn Catalog>,
        engine: Arc<dyn Engine>,
    ) -> Self {
        Self {
            config,
            db,
            llm,
            catalog,
            engine,
            startup_time: chrono::Utc::now(),
        }
    }
}
