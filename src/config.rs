use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

/// Metadata catalog holding the analytics table definition.
#[derive(Debug, Deserialize, Clone)]
pub struct CatalogConfig {
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub database: String,
    pub table: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "anthropic" or "ollama"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub max_tokens: usize,
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AthenaConfig {
    pub endpoint: String,
    pub auth_token: Option<String>,
    pub workgroup: String,
    pub output_location: String,
    pub max_wait_secs: u64,
    pub poll_interval_ms: u64,
    pub max_rows: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PolicyConfig {
    pub max_days_lookback: i64,
    /// IANA label shown to the model, e.g. "Asia/Ho_Chi_Minh".
    pub timezone: String,
    /// Offset used to compute "today"; the reference deployment targets a
    /// single zone without DST.
    pub utc_offset_minutes: i32,
    pub max_fix_attempts: usize,
    pub cache_ttl_secs: i64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: String,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub web: WebConfig,
    pub catalog: CatalogConfig,
    pub llm: LlmConfig,
    pub athena: AthenaConfig,
    pub policy: PolicyConfig,
    pub store: StoreConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Path to the local store database
    #[arg(long)]
    pub store_path: Option<String>,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder();

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/shopask/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // SHOPASK_WEB__PORT=8080 style overrides
        config_builder =
            config_builder.add_source(Environment::with_prefix("SHOPASK").separator("__"));

        // Build the config
        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(store_path) = &args.store_path {
            config.store.path = store_path.clone();
        }

        Ok(config)
    }
}

// Default implementation
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 3000,
            },
            catalog: CatalogConfig {
                endpoint: "http://localhost:8081/glue".to_string(),
                auth_token: None,
                database: "analytics".to_string(),
                table: "daily_metrics".to_string(),
            },
            llm: LlmConfig {
                backend: "anthropic".to_string(),
                model: "claude-sonnet-4-5".to_string(),
                api_key: None,
                api_url: None,
                max_tokens: 700,
                temperature: 0.0,
            },
            athena: AthenaConfig {
                endpoint: "http://localhost:8081/athena".to_string(),
                auth_token: None,
                workgroup: "primary".to_string(),
                output_location: "s3://shopask-athena-results/".to_string(),
                max_wait_secs: 25,
                poll_interval_ms: 700,
                max_rows: 200,
            },
            policy: PolicyConfig {
                max_days_lookback: 90,
                timezone: "Asia/Ho_Chi_Minh".to_string(),
                utc_offset_minutes: 7 * 60,
                max_fix_attempts: 2,
                cache_ttl_secs: 600,
            },
            store: StoreConfig {
                path: "shopask.db".to_string(),
                sweep_interval_secs: 300,
            },
        }
    }
}
