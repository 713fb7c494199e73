use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Error, Result};
use crate::store::{repository, Database};

/// Identity of one cacheable answer. Two requests share a slot only when
/// every field matches, including the sorted allowlist and the schema
/// hash (tenant isolation and schema-drift invalidation).
#[derive(Debug, Clone)]
pub struct CacheKey {
    pub user_sub: String,
    pub shops: Vec<String>,
    pub question: String,
    pub today: String,
    pub max_days: i64,
    pub schema_hash: String,
}

/// Payload persisted for a successful end-to-end run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedResponse {
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, Value>>,
    pub assumptions: Vec<String>,
    pub confidence: f64,
    pub scanned_bytes: i64,
    pub exec_ms: i64,
    pub query_id: String,
}

/// Lowercased, whitespace-collapsed question text. Idempotent.
pub fn normalize_question(q: &str) -> String {
    q.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn shops_key(shops: &[String]) -> String {
    let mut keys: Vec<String> = shops.iter().map(|s| s.trim().to_lowercase()).collect();
    keys.sort();
    keys.join(",")
}

pub fn partition_key(user_sub: &str) -> String {
    format!("USER#{}", user_sub)
}

pub fn sort_key(key: &CacheKey) -> String {
    let material = format!(
        "shops={}|today={}|maxdays={}|schema={}|q={}",
        shops_key(&key.shops),
        key.today,
        key.max_days,
        key.schema_hash,
        normalize_question(&key.question),
    );
    format!("NLQ#{:x}", Sha256::digest(material.as_bytes()))
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

pub async fn get_cached(db: &Database, key: &CacheKey) -> Result<Option<CachedResponse>> {
    let pk = partition_key(&key.user_sub);
    let sk = sort_key(key);
    let now = now_epoch();

    let payload = db
        .call(move |conn| repository::get_cache_entry(conn, &pk, &sk, now))
        .await?;

    match payload {
        // A payload that no longer decodes (e.g. after an upgrade) is a miss.
        Some(text) => Ok(serde_json::from_str(&text).ok()),
        None => Ok(None),
    }
}

pub async fn put_cached(
    db: &Database,
    key: &CacheKey,
    response: &CachedResponse,
    ttl_secs: i64,
) -> Result<()> {
    let pk = partition_key(&key.user_sub);
    let sk = sort_key(key);
    let payload =
        serde_json::to_string(response).map_err(|e| Error::Store(e.to_string()))?;
    let now = now_epoch();

    db.call(move |conn| repository::put_cache_entry(conn, &pk, &sk, &payload, now, ttl_secs))
        .await
}
