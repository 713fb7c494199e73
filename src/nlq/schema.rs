use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::CatalogConfig;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

#[derive(Debug, Clone)]
pub struct TableSchema {
    pub database: String,
    pub table: String,
    pub location: String,
    pub columns: Vec<Column>,
    pub partitions: Vec<Column>,
}

impl TableSchema {
    /// Prompt-ready schema block, e.g.:
    ///
    /// DATABASE analytics
    /// TABLE daily_metrics ( ... )
    /// PARTITIONED BY (dt date, shop_id string)
    /// LOCATION s3://...
    ///
    /// Column and partition lists are rendered sorted by name so the text
    /// (and therefore the schema hash) is stable across catalog reads.
    pub fn compact_text(&self) -> String {
        let mut columns = self.columns.clone();
        columns.sort_by(|a, b| a.name.cmp(&b.name));
        let mut partitions = self.partitions.clone();
        partitions.sort_by(|a, b| a.name.cmp(&b.name));

        let mut out = String::new();
        out.push_str(&format!("DATABASE {}\n", self.database));
        out.push_str(&format!("TABLE {} (\n", self.table));

        for (i, c) in columns.iter().enumerate() {
            let comma = if i == columns.len() - 1 { "" } else { "," };
            out.push_str(&format!("  {} {}{}\n", c.name, c.data_type, comma));
        }
        out.push_str(")\n");

        if !partitions.is_empty() {
            out.push_str("PARTITIONED BY (");
            for (i, p) in partitions.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&format!("{} {}", p.name, p.data_type));
            }
            out.push_str(")\n");
        }

        if !self.location.is_empty() {
            out.push_str(&format!("LOCATION {}\n", self.location));
        }

        out
    }
}

/// Content hash of the compact rendering, folded into cache keys so any
/// schema change invalidates prior entries.
pub fn schema_hash(schema_text: &str) -> String {
    format!("{:x}", Sha256::digest(schema_text.as_bytes()))
}

/// Metadata catalog holding the analytics table definition.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get_table(&self, database: &str, table: &str) -> Result<TableSchema>;
}

// ── Glue-protocol HTTP client ──────────────────────────────────────

pub struct HttpCatalog {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetTableResponse {
    table: TableInfo,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct TableInfo {
    name: String,
    #[serde(default)]
    storage_descriptor: StorageDescriptor,
    #[serde(default)]
    partition_keys: Vec<WireColumn>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct StorageDescriptor {
    #[serde(default)]
    columns: Vec<WireColumn>,
    #[serde(default)]
    location: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireColumn {
    name: String,
    #[serde(rename = "Type")]
    data_type: String,
}

impl HttpCatalog {
    pub fn new(config: &CatalogConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::SchemaUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            auth_token: config.auth_token.clone(),
        })
    }
}

#[async_trait]
impl Catalog for HttpCatalog {
    async fn get_table(&self, database: &str, table: &str) -> Result<TableSchema> {
        let body = serde_json::json!({
            "DatabaseName": database,
            "Name": table,
        });

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("X-Amz-Target", "AWSGlue.GetTable")
            .json(&body);
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            Error::SchemaUnavailable(format!("catalog GetTable {}.{}: {}", database, table, e))
        })?;

        if !response.status().is_success() {
            return Err(Error::SchemaUnavailable(format!(
                "catalog GetTable {}.{} responded with status {}",
                database,
                table,
                response.status()
            )));
        }

        let reply: GetTableResponse = response
            .json()
            .await
            .map_err(|e| Error::SchemaUnavailable(format!("catalog response decode: {}", e)))?;

        let columns: Vec<Column> = reply
            .table
            .storage_descriptor
            .columns
            .into_iter()
            .map(|c| Column {
                name: c.name,
                data_type: c.data_type,
            })
            .collect();

        if columns.is_empty() {
            return Err(Error::SchemaUnavailable(format!(
                "catalog returned no columns for {}.{}",
                database, table
            )));
        }

        let partitions: Vec<Column> = reply
            .table
            .partition_keys
            .into_iter()
            .map(|c| Column {
                name: c.name,
                data_type: c.data_type,
            })
            .collect();

        Ok(TableSchema {
            database: database.to_string(),
            table: reply.table.name,
            location: reply.table.storage_descriptor.location,
            columns,
            partitions,
        })
    }
}
