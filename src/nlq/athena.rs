use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::AthenaConfig;
use crate::error::{Error, Result};

/// Terminal or in-flight state of a submitted query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl QueryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryState::Queued => "QUEUED",
            QueryState::Running => "RUNNING",
            QueryState::Succeeded => "SUCCEEDED",
            QueryState::Failed => "FAILED",
            QueryState::Cancelled => "CANCELLED",
        }
    }

    fn parse(s: &str) -> QueryState {
        match s {
            "SUCCEEDED" => QueryState::Succeeded,
            "FAILED" => QueryState::Failed,
            "CANCELLED" => QueryState::Cancelled,
            "RUNNING" => QueryState::Running,
            _ => QueryState::Queued,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionStatus {
    pub state: QueryState,
    pub reason: Option<String>,
    pub scanned_bytes: i64,
    pub exec_ms: i64,
}

/// One page of raw results. Cells are the engine's varchar values; the
/// first row of the first page is the header row.
#[derive(Debug, Clone)]
pub struct ResultsPage {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AthenaResult {
    pub query_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<BTreeMap<String, Value>>,
    pub scanned_bytes: i64,
    pub exec_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AthenaError {
    pub state: String,
    pub reason: String,
    pub query_id: String,
}

impl fmt::Display for AthenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.query_id.is_empty() {
            write!(f, "athena {}: {}", self.state, self.reason)
        } else {
            write!(f, "athena {}: {} (qid={})", self.state, self.reason, self.query_id)
        }
    }
}

impl std::error::Error for AthenaError {}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub database: String,
    pub workgroup: String,
    pub output_location: String,
    pub max_wait: Duration,
    pub poll_interval: Duration,
    pub max_rows: usize,
}

impl RunOptions {
    pub fn from_config(config: &AthenaConfig, database: &str) -> Self {
        Self {
            database: database.to_string(),
            workgroup: config.workgroup.clone(),
            output_location: config.output_location.clone(),
            max_wait: Duration::from_secs(config.max_wait_secs),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            max_rows: config.max_rows,
        }
    }
}

/// The three query-engine operations the executor needs. Transport
/// failures surface as `Error::Athena` with state `ERROR`; they are not
/// eligible for the repair loop.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn start_query_execution(&self, sql: &str, opts: &RunOptions) -> Result<String>;
    async fn get_query_execution(&self, query_id: &str) -> Result<ExecutionStatus>;
    async fn get_query_results(
        &self,
        query_id: &str,
        next_token: Option<String>,
        max_results: usize,
    ) -> Result<ResultsPage>;
}

/// Submit validated SQL, poll to a terminal state within the deadline,
/// and collect typed rows. The first result row is the header row and is
/// dropped; output is capped at `max_rows`.
pub async fn run_query(engine: &dyn Engine, sql: &str, opts: &RunOptions) -> Result<AthenaResult> {
    if opts.database.trim().is_empty() {
        return Err(Error::Config("missing athena database".to_string()));
    }
    if opts.workgroup.trim().is_empty() {
        return Err(Error::Config("missing athena workgroup".to_string()));
    }
    if opts.output_location.trim().is_empty() {
        return Err(Error::Config("missing athena output location".to_string()));
    }

    let max_wait = if opts.max_wait.is_zero() {
        Duration::from_secs(25)
    } else {
        opts.max_wait
    };
    let poll_interval = if opts.poll_interval.is_zero() {
        Duration::from_millis(700)
    } else {
        opts.poll_interval
    };
    let max_rows = if opts.max_rows == 0 { 200 } else { opts.max_rows };

    let query_id = engine.start_query_execution(sql, opts).await?;

    // Poll until terminal state or deadline.
    let deadline = Instant::now() + max_wait;
    let status = loop {
        if Instant::now() > deadline {
            return Err(Error::Athena(AthenaError {
                state: "TIMEOUT".to_string(),
                reason: "query timed out".to_string(),
                query_id,
            }));
        }

        let status = engine.get_query_execution(&query_id).await?;
        match status.state {
            QueryState::Succeeded => break status,
            QueryState::Failed | QueryState::Cancelled => {
                return Err(Error::Athena(AthenaError {
                    state: status.state.as_str().to_string(),
                    reason: status.reason.unwrap_or_default(),
                    query_id,
                }));
            }
            QueryState::Queued | QueryState::Running => sleep(poll_interval).await,
        }
    };

    // Page through results; stop once header + max_rows are buffered.
    let mut columns: Vec<String> = Vec::new();
    let mut raw_rows: Vec<Vec<Option<String>>> = Vec::new();
    let mut next_token: Option<String> = None;

    loop {
        let page = engine
            .get_query_results(&query_id, next_token.take(), 1000)
            .await?;
        if columns.is_empty() {
            columns = page.columns;
        }
        raw_rows.extend(page.rows);

        match page.next_token {
            Some(token) if raw_rows.len() <= max_rows => next_token = Some(token),
            _ => break,
        }
    }

    // First row is the header row.
    let mut rows: Vec<BTreeMap<String, Value>> = Vec::with_capacity(max_rows.min(raw_rows.len()));
    for raw in raw_rows.into_iter().skip(1) {
        if rows.len() >= max_rows {
            break;
        }
        let mut row = BTreeMap::new();
        for (i, cell) in raw.into_iter().enumerate() {
            if i >= columns.len() {
                continue;
            }
            row.insert(columns[i].clone(), coerce_scalar(cell.as_deref()));
        }
        rows.push(row);
    }

    Ok(AthenaResult {
        query_id,
        columns,
        rows,
        scanned_bytes: status.scanned_bytes,
        exec_ms: status.exec_ms,
    })
}

/// Best-effort typing of a varchar cell: integer, then real, then text.
/// Empty cells become null.
fn coerce_scalar(v: Option<&str>) -> Value {
    let v = v.unwrap_or("").trim();
    if v.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = v.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = v.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::from(v)
}

// ── Athena-protocol HTTP client ────────────────────────────────────

pub struct HttpEngine {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpEngine {
    pub fn new(config: &AthenaConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            auth_token: config.auth_token.clone(),
        })
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        target: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-amz-json-1.1")
            .header("X-Amz-Target", target)
            .json(body);
        if let Some(token) = &self.auth_token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request.send().await.map_err(|e| {
            Error::Athena(AthenaError {
                state: "ERROR".to_string(),
                reason: format!("{}: {}", target, e),
                query_id: String::new(),
            })
        })?;

        if !response.status().is_success() {
            return Err(Error::Athena(AthenaError {
                state: "ERROR".to_string(),
                reason: format!("{} responded with status {}", target, response.status()),
                query_id: String::new(),
            }));
        }

        response.json().await.map_err(|e| {
            Error::Athena(AthenaError {
                state: "ERROR".to_string(),
                reason: format!("{} response decode: {}", target, e),
                query_id: String::new(),
            })
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartQueryExecutionOutput {
    query_execution_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryExecutionOutput {
    query_execution: WireQueryExecution,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireQueryExecution {
    status: WireStatus,
    #[serde(default)]
    statistics: WireStatistics,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireStatus {
    state: String,
    #[serde(default)]
    state_change_reason: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct WireStatistics {
    #[serde(default)]
    data_scanned_in_bytes: i64,
    #[serde(default)]
    engine_execution_time_in_millis: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct GetQueryResultsOutput {
    result_set: WireResultSet,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireResultSet {
    #[serde(default)]
    rows: Vec<WireRow>,
    #[serde(default)]
    result_set_metadata: WireResultSetMetadata,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
struct WireResultSetMetadata {
    #[serde(default)]
    column_info: Vec<WireColumnInfo>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireColumnInfo {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireRow {
    #[serde(default)]
    data: Vec<WireDatum>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireDatum {
    #[serde(default)]
    var_char_value: Option<String>,
}

#[async_trait]
impl Engine for HttpEngine {
    async fn start_query_execution(&self, sql: &str, opts: &RunOptions) -> Result<String> {
        let body = serde_json::json!({
            "QueryString": sql,
            "QueryExecutionContext": { "Database": opts.database },
            "ResultConfiguration": { "OutputLocation": opts.output_location },
            "WorkGroup": opts.workgroup,
        });
        let out: StartQueryExecutionOutput =
            self.call("AmazonAthena.StartQueryExecution", &body).await?;
        Ok(out.query_execution_id)
    }

    async fn get_query_execution(&self, query_id: &str) -> Result<ExecutionStatus> {
        let body = serde_json::json!({ "QueryExecutionId": query_id });
        let out: GetQueryExecutionOutput =
            self.call("AmazonAthena.GetQueryExecution", &body).await?;

        Ok(ExecutionStatus {
            state: QueryState::parse(&out.query_execution.status.state),
            reason: out.query_execution.status.state_change_reason,
            scanned_bytes: out.query_execution.statistics.data_scanned_in_bytes,
            exec_ms: out.query_execution.statistics.engine_execution_time_in_millis,
        })
    }

    async fn get_query_results(
        &self,
        query_id: &str,
        next_token: Option<String>,
        max_results: usize,
    ) -> Result<ResultsPage> {
        let mut body = serde_json::json!({
            "QueryExecutionId": query_id,
            "MaxResults": max_results,
        });
        if let Some(token) = next_token {
            body["NextToken"] = serde_json::Value::String(token);
        }
        let out: GetQueryResultsOutput = self.call("AmazonAthena.GetQueryResults", &body).await?;

        Ok(ResultsPage {
            columns: out
                .result_set
                .result_set_metadata
                .column_info
                .into_iter()
                .map(|c| c.name)
                .collect(),
            rows: out
                .result_set
                .rows
                .into_iter()
                .map(|r| r.data.into_iter().map(|d| d.var_char_value).collect())
                .collect(),
            next_token: out.next_token,
        })
    }
}
