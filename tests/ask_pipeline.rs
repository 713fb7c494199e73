use async_trait::async_trait;
use axum::extract::{Json, State};
use axum::http::StatusCode;
use chrono::Duration;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use shopask::config::AppConfig;
use shopask::error::Result;
use shopask::llm::{CompletionProvider, LlmError, LlmManager};
use shopask::nlq::athena::{Engine, ExecutionStatus, QueryState, ResultsPage, RunOptions};
use shopask::nlq::schema::{Catalog, Column, TableSchema};
use shopask::nlq::today_with_offset;
use shopask::store::{repository, Database};
use shopask::web::handlers::ask::{ask, AskRequest, Caller};
use shopask::web::state::AppState;

// ── doubles ────────────────────────────────────────────────────────

struct StaticCatalog {
    schema: TableSchema,
}

#[async_trait]
impl Catalog for StaticCatalog {
    async fn get_table(&self, _database: &str, _table: &str) -> Result<TableSchema> {
        Ok(self.schema.clone())
    }
}

enum RunScript {
    Succeed(ResultsPage),
    Fail(String),
}

/// Engine double: consumes one script per submitted query and counts
/// submissions so tests can assert how often the executor ran.
struct CountingEngine {
    scripts: Mutex<VecDeque<RunScript>>,
    current: Mutex<Option<RunScript>>,
    started: Mutex<Vec<String>>,
}

impl CountingEngine {
    fn new(scripts: Vec<RunScript>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            current: Mutex::new(None),
            started: Mutex::new(Vec::new()),
        })
    }

    fn submissions(&self) -> usize {
        self.started.lock().unwrap().len()
    }
}

#[async_trait]
impl Engine for CountingEngine {
    async fn start_query_execution(&self, sql: &str, _opts: &RunOptions) -> Result<String> {
        let mut started = self.started.lock().unwrap();
        started.push(sql.to_string());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected query submission");
        *self.current.lock().unwrap() = Some(script);
        Ok(format!("qid-{}", started.len()))
    }

    async fn get_query_execution(&self, _query_id: &str) -> Result<ExecutionStatus> {
        match self.current.lock().unwrap().as_ref().unwrap() {
            RunScript::Succeed(_) => Ok(ExecutionStatus {
                state: QueryState::Succeeded,
                reason: None,
                scanned_bytes: 2048,
                exec_ms: 41,
            }),
            RunScript::Fail(reason) => Ok(ExecutionStatus {
                state: QueryState::Failed,
                reason: Some(reason.clone()),
                scanned_bytes: 0,
                exec_ms: 0,
            }),
        }
    }

    async fn get_query_results(
        &self,
        _query_id: &str,
        _next_token: Option<String>,
        _max_results: usize,
    ) -> Result<ResultsPage> {
        match self.current.lock().unwrap().as_ref().unwrap() {
            RunScript::Succeed(page) => Ok(page.clone()),
            RunScript::Fail(_) => panic!("results requested for failed query"),
        }
    }
}

struct ScriptedProvider {
    replies: Mutex<VecDeque<std::result::Result<String, LlmError>>>,
    invocations: Mutex<usize>,
}

impl ScriptedProvider {
    fn new(replies: Vec<std::result::Result<String, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            invocations: Mutex::new(0),
        })
    }

    fn invocations(&self) -> usize {
        *self.invocations.lock().unwrap()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(&self, _prompt: &str) -> std::result::Result<String, LlmError> {
        *self.invocations.lock().unwrap() += 1;
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected model invocation")
    }
}

struct SharedProvider(Arc<ScriptedProvider>);

#[async_trait]
impl CompletionProvider for SharedProvider {
    async fn complete(&self, prompt: &str) -> std::result::Result<String, LlmError> {
        self.0.complete(prompt).await
    }
}

// ── fixtures ───────────────────────────────────────────────────────

fn schema() -> TableSchema {
    TableSchema {
        database: "analytics".to_string(),
        table: "daily_metrics".to_string(),
        location: "s3://bucket/daily_metrics/".to_string(),
        columns: vec![
            Column {
                name: "net_revenue".to_string(),
                data_type: "double".to_string(),
            },
            Column {
                name: "order_count".to_string(),
                data_type: "bigint".to_string(),
            },
        ],
        partitions: vec![
            Column {
                name: "dt".to_string(),
                data_type: "date".to_string(),
            },
            Column {
                name: "shop_id".to_string(),
                data_type: "string".to_string(),
            },
        ],
    }
}

async fn app_state(
    provider: Arc<ScriptedProvider>,
    engine: Arc<CountingEngine>,
) -> (Arc<AppState>, Database) {
    let db = Database::open_memory().await.unwrap();
    db.call(|conn| {
        repository::add_shop_user(conn, "a.myshopify.com", "user-1")?;
        repository::add_shop_user(conn, "b.myshopify.com", "user-1")
    })
    .await
    .unwrap();

    let llm = LlmManager::with_provider(Box::new(SharedProvider(provider)));
    let catalog: Arc<dyn Catalog> = Arc::new(StaticCatalog { schema: schema() });
    let engine: Arc<dyn Engine> = engine;
    let state = Arc::new(AppState::new(
        AppConfig::default(),
        db.clone(),
        llm,
        catalog,
        engine,
    ));
    (state, db)
}

fn caller() -> Caller {
    Caller {
        user_sub: "user-1".to_string(),
        email: Some("owner@example.com".to_string()),
    }
}

fn request(question: &str) -> AskRequest {
    AskRequest {
        question: question.to_string(),
        shop_ids: Vec::new(),
    }
}

/// A dt lower bound that is always inside the 90-day window, since the
/// validator compares against the real clock.
fn recent_start() -> String {
    let today = today_with_offset(AppConfig::default().policy.utc_offset_minutes);
    (today - Duration::days(30)).format("%Y-%m-%d").to_string()
}

fn revenue_sql() -> String {
    format!(
        "SELECT COALESCE(SUM(net_revenue),0) AS total_net_revenue FROM daily_metrics \
         WHERE dt >= date '{}' AND shop_id IN ('a.myshopify.com')",
        recent_start()
    )
}

fn json_reply(sql: &str) -> std::result::Result<String, LlmError> {
    Ok(serde_json::json!({
        "sql": sql,
        "confidence": 0.92,
        "assumptions": ["net revenue means net_revenue"],
        "needs_clarification": false,
        "clarifying_question": null,
    })
    .to_string())
}

fn scalar_page(value: &str) -> ResultsPage {
    ResultsPage {
        columns: vec!["total_net_revenue".to_string()],
        rows: vec![
            vec![Some("total_net_revenue".to_string())],
            vec![Some(value.to_string())],
        ],
        next_token: None,
    }
}

async fn ask_ok(state: &Arc<AppState>, req: AskRequest) -> Value {
    let response = ask(State(state.clone()), caller(), Json(req))
        .await
        .expect("handler returned an error status");
    serde_json::to_value(response.0).unwrap()
}

// ── scenarios ──────────────────────────────────────────────────────

#[tokio::test]
async fn happy_path_scalar_result() {
    let provider = ScriptedProvider::new(vec![json_reply(&revenue_sql())]);
    let engine = CountingEngine::new(vec![RunScript::Succeed(scalar_page("12345.67"))]);
    let (state, _db) = app_state(provider.clone(), engine.clone()).await;

    let v = ask_ok(&state, request("total net revenue this month?")).await;

    assert_eq!(v["type"], "result");
    assert_eq!(v["cached"], false);
    assert_eq!(v["result"]["kind"], "scalar");
    assert_eq!(v["result"]["value"], 12345.67);
    assert_eq!(v["query_id"], "qid-1");
    assert_eq!(v["scanned_bytes"], 2048);
    assert_eq!(v["exec_ms"], 41);
    assert_eq!(v["sql"], revenue_sql());
    assert_eq!(engine.submissions(), 1);
    assert_eq!(provider.invocations(), 1);
}

#[tokio::test]
async fn tenant_violation_is_rejected() {
    let bad_sql = format!(
        "SELECT COALESCE(SUM(net_revenue),0) FROM daily_metrics \
         WHERE shop_id = 'c.myshopify.com' AND dt >= date '{}'",
        recent_start()
    );
    let provider = ScriptedProvider::new(vec![json_reply(&bad_sql)]);
    let engine = CountingEngine::new(vec![]);
    let (state, _db) = app_state(provider, engine.clone()).await;

    let v = ask_ok(&state, request("revenue for shop c?")).await;

    assert_eq!(v["type"], "sql_rejected");
    assert_eq!(v["reason"], "shop_id value not allowed: c.myshopify.com");
    assert_eq!(v["model_sql"], bad_sql);
    assert_eq!(engine.submissions(), 0);
}

#[tokio::test]
async fn missing_partition_lower_bound_is_rejected() {
    let today = today_with_offset(AppConfig::default().policy.utc_offset_minutes);
    let bad_sql = format!(
        "SELECT COALESCE(SUM(net_revenue),0) FROM daily_metrics \
         WHERE dt <= date '{}' AND shop_id IN ('a.myshopify.com')",
        today.format("%Y-%m-%d")
    );
    let provider = ScriptedProvider::new(vec![json_reply(&bad_sql)]);
    let engine = CountingEngine::new(vec![]);
    let (state, _db) = app_state(provider, engine.clone()).await;

    let v = ask_ok(&state, request("all-time revenue?")).await;

    assert_eq!(v["type"], "sql_rejected");
    assert_eq!(
        v["reason"],
        "dt filter must include a lower bound (dt >= ... or dt BETWEEN ...)"
    );
    assert_eq!(engine.submissions(), 0);
}

#[tokio::test]
async fn self_correction_recovers_from_engine_error() {
    let broken_sql = format!(
        "SELECT COALESCE(SUM(netrevenue),0) AS total_net_revenue FROM daily_metrics \
         WHERE dt >= date '{}' AND shop_id IN ('a.myshopify.com')",
        recent_start()
    );
    let provider = ScriptedProvider::new(vec![
        json_reply(&broken_sql),
        json_reply(&revenue_sql()),
    ]);
    let engine = CountingEngine::new(vec![
        RunScript::Fail("SYNTAX_ERROR: column netrevenue does not exist".to_string()),
        RunScript::Succeed(scalar_page("12345.67")),
    ]);
    let (state, _db) = app_state(provider.clone(), engine.clone()).await;

    let v = ask_ok(&state, request("total net revenue?")).await;

    assert_eq!(v["type"], "result");
    assert_eq!(v["cached"], false);
    assert_eq!(v["sql"], revenue_sql());
    assert_eq!(engine.submissions(), 2);
    assert_eq!(provider.invocations(), 2);
}

#[tokio::test]
async fn exhausted_repairs_surface_athena_failed() {
    let provider = ScriptedProvider::new(vec![
        json_reply(&revenue_sql()),
        json_reply(&revenue_sql()),
        json_reply(&revenue_sql()),
    ]);
    let engine = CountingEngine::new(vec![
        RunScript::Fail("GENERIC_INTERNAL_ERROR: node down".to_string()),
        RunScript::Fail("GENERIC_INTERNAL_ERROR: node down".to_string()),
        RunScript::Fail("GENERIC_INTERNAL_ERROR: node down".to_string()),
    ]);
    let (state, _db) = app_state(provider.clone(), engine.clone()).await;

    let v = ask_ok(&state, request("total net revenue?")).await;

    assert_eq!(v["type"], "athena_failed");
    assert!(v["error"]
        .as_str()
        .unwrap()
        .contains("GENERIC_INTERNAL_ERROR"));
    assert_eq!(v["last_sql"], revenue_sql());
    // max_fix_attempts (2) + 1 submissions, no more.
    assert_eq!(engine.submissions(), 3);
}

#[tokio::test]
async fn cache_hit_skips_model_and_engine() {
    let provider = ScriptedProvider::new(vec![json_reply(&revenue_sql())]);
    let engine = CountingEngine::new(vec![RunScript::Succeed(scalar_page("12345.67"))]);
    let (state, _db) = app_state(provider.clone(), engine.clone()).await;

    let first = ask_ok(&state, request("Total   net revenue this month?")).await;
    assert_eq!(first["cached"], false);

    // Same question modulo case/whitespace, within TTL.
    let second = ask_ok(&state, request("total net revenue this MONTH?")).await;
    assert_eq!(second["type"], "result");
    assert_eq!(second["cached"], true);
    assert_eq!(second["result"]["kind"], "scalar");
    assert_eq!(second["result"]["value"], 12345.67);
    assert_eq!(second["sql"], first["sql"]);
    assert_eq!(second["query_id"], first["query_id"]);

    assert_eq!(engine.submissions(), 1);
    assert_eq!(provider.invocations(), 1);
}

#[tokio::test]
async fn requested_subset_changes_cache_slot() {
    let provider = ScriptedProvider::new(vec![
        json_reply(&revenue_sql()),
        json_reply(&revenue_sql()),
    ]);
    let engine = CountingEngine::new(vec![
        RunScript::Succeed(scalar_page("12345.67")),
        RunScript::Succeed(scalar_page("999.0")),
    ]);
    let (state, _db) = app_state(provider.clone(), engine.clone()).await;

    let all_shops = ask_ok(&state, request("total net revenue?")).await;
    assert_eq!(all_shops["cached"], false);

    let mut narrowed = request("total net revenue?");
    narrowed.shop_ids = vec!["a.myshopify.com".to_string()];
    let subset = ask_ok(&state, narrowed).await;

    // A different effective allowlist must not read the broader slot.
    assert_eq!(subset["cached"], false);
    assert_eq!(engine.submissions(), 2);
}

#[tokio::test]
async fn clarification_short_circuits_and_is_not_cached() {
    let clarification = serde_json::json!({
        "sql": null,
        "confidence": 0.35,
        "assumptions": [],
        "needs_clarification": true,
        "clarifying_question": "Which metric defines best? net revenue, gross, or order count?",
    })
    .to_string();
    let provider = ScriptedProvider::new(vec![Ok(clarification.clone()), Ok(clarification)]);
    let engine = CountingEngine::new(vec![]);
    let (state, _db) = app_state(provider.clone(), engine.clone()).await;

    let v = ask_ok(&state, request("best shop?")).await;
    assert_eq!(v["type"], "clarification");
    assert_eq!(
        v["clarifying_question"],
        "Which metric defines best? net revenue, gross, or order count?"
    );
    assert_eq!(engine.submissions(), 0);

    // Clarifications are never cached: the same question asks the model again.
    let again = ask_ok(&state, request("best shop?")).await;
    assert_eq!(again["type"], "clarification");
    assert_eq!(provider.invocations(), 2);
}

#[tokio::test]
async fn caller_without_shops_gets_no_shops_envelope() {
    let provider = ScriptedProvider::new(vec![]);
    let engine = CountingEngine::new(vec![]);
    let (state, _db) = app_state(provider, engine).await;

    let response = ask(
        State(state.clone()),
        Caller {
            user_sub: "stranger".to_string(),
            email: None,
        },
        Json(request("total net revenue?")),
    )
    .await
    .unwrap();

    let v = serde_json::to_value(response.0).unwrap();
    assert_eq!(v["type"], "no_shops");
    assert_eq!(v["error"], "no shops connected to this user");
}

#[tokio::test]
async fn disjoint_requested_subset_is_forbidden() {
    let provider = ScriptedProvider::new(vec![]);
    let engine = CountingEngine::new(vec![]);
    let (state, _db) = app_state(provider, engine).await;

    let mut req = request("total net revenue?");
    req.shop_ids = vec!["z.myshopify.com".to_string()];

    let err = ask(State(state.clone()), caller(), Json(req))
        .await
        .unwrap_err();
    assert_eq!(err.0, StatusCode::FORBIDDEN);
    assert_eq!(err.1, "no_allowed_shops_in_request");
}

#[tokio::test]
async fn empty_question_is_bad_request() {
    let provider = ScriptedProvider::new(vec![]);
    let engine = CountingEngine::new(vec![]);
    let (state, _db) = app_state(provider, engine).await;

    let err = ask(State(state.clone()), caller(), Json(request("   ")))
        .await
        .unwrap_err();
    assert_eq!(err.0, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn failed_runs_are_not_cached() {
    let provider = ScriptedProvider::new(vec![
        json_reply(&revenue_sql()),
        json_reply(&revenue_sql()),
        json_reply(&revenue_sql()),
        // Second request succeeds on its first attempt.
        json_reply(&revenue_sql()),
    ]);
    let engine = CountingEngine::new(vec![
        RunScript::Fail("boom".to_string()),
        RunScript::Fail("boom".to_string()),
        RunScript::Fail("boom".to_string()),
        RunScript::Succeed(scalar_page("12345.67")),
    ]);
    let (state, _db) = app_state(provider.clone(), engine.clone()).await;

    let failed = ask_ok(&state, request("total net revenue?")).await;
    assert_eq!(failed["type"], "athena_failed");

    // The failure above must not satisfy this identical question.
    let ok = ask_ok(&state, request("total net revenue?")).await;
    assert_eq!(ok["type"], "result");
    assert_eq!(ok["cached"], false);
}
