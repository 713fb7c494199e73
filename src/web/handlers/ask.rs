use axum::{
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::llm::models::LlmReply;
use crate::nlq::athena::RunOptions;
use crate::nlq::cache::{self, CacheKey, CachedResponse};
use crate::nlq::correction::{execute_with_self_correction, CorrectionOutcome};
use crate::nlq::prompt::{initial_prompt, PromptContext};
use crate::nlq::schema::schema_hash;
use crate::nlq::shape::{shape, ShapedResult};
use crate::nlq::validator::ValidateOptions;
use crate::nlq::{tenancy, today_with_offset};
use crate::web::state::AppState;

/// Caller identity, extracted from trusted headers set by the fronting
/// authenticator. Opaque to the pipeline beyond keying and scoping.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_sub: String,
    pub email: Option<String>,
}

impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_sub = parts
            .headers
            .get("x-user-sub")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or("")
            .to_string();

        if user_sub.is_empty() {
            return Err((StatusCode::UNAUTHORIZED, "missing user identity".to_string()));
        }

        let email = parts
            .headers
            .get("x-user-email")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        Ok(Caller { user_sub, email })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    pub question: String,
    #[serde(default)]
    pub shop_ids: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AskResponse {
    Result {
        cached: bool,
        sql: String,
        assumptions: Vec<String>,
        confidence: f64,
        result: ShapedResult,
        query_id: String,
        scanned_bytes: i64,
        exec_ms: i64,
    },
    Clarification {
        clarifying_question: String,
        assumptions: Vec<String>,
        confidence: f64,
    },
    SqlRejected {
        reason: String,
        model_sql: String,
        assumptions: Vec<String>,
        confidence: f64,
    },
    AthenaFailed {
        error: String,
        last_sql: String,
        assumptions: Vec<String>,
        confidence: f64,
    },
    NoShops {
        error: String,
    },
}

pub async fn ask(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(body): Json<AskRequest>,
) -> Result<Json<AskResponse>, (StatusCode, String)> {
    let question = body.question.trim().to_string();
    if question.is_empty() {
        return Err(http_error(Error::InputInvalid(
            "question_required".to_string(),
        )));
    }
    debug!("ask from {}: {}", caller.user_sub, question);

    // Tenant scoping.
    let allowed = tenancy::allowed_shops(&state.db, &caller.user_sub)
        .await
        .map_err(http_error)?;
    if allowed.is_empty() {
        return Ok(Json(AskResponse::NoShops {
            error: "no shops connected to this user".to_string(),
        }));
    }
    let allowed = tenancy::effective_shops(&body.shop_ids, &allowed);
    if allowed.is_empty() {
        return Err(http_error(Error::NotAuthorized(
            "no_allowed_shops_in_request".to_string(),
        )));
    }

    // Schema discovery.
    let schema = state
        .catalog
        .get_table(&state.config.catalog.database, &state.config.catalog.table)
        .await
        .map_err(http_error)?;
    let schema_text = schema.compact_text();
    let schema_hash = schema_hash(&schema_text);

    let policy = &state.config.policy;
    let today = today_with_offset(policy.utc_offset_minutes);
    let today_iso = today.format("%Y-%m-%d").to_string();

    // Cache lookup. Failures here must not break the request.
    let cache_key = CacheKey {
        user_sub: caller.user_sub.clone(),
        shops: allowed.clone(),
        question: question.clone(),
        today: today_iso,
        max_days: policy.max_days_lookback,
        schema_hash,
    };
    match cache::get_cached(&state.db, &cache_key).await {
        Ok(Some(hit)) => {
            debug!("cache hit for {}", caller.user_sub);
            return Ok(Json(AskResponse::Result {
                cached: true,
                result: shape(&hit.columns, &hit.rows),
                sql: hit.sql,
                assumptions: hit.assumptions,
                confidence: hit.confidence,
                query_id: hit.query_id,
                scanned_bytes: hit.scanned_bytes,
                exec_ms: hit.exec_ms,
            }));
        }
        Ok(None) => {}
        Err(e) => warn!("cache lookup failed: {}", e),
    }

    // Initial generation.
    let prompt_ctx = PromptContext {
        question: &question,
        schema_text: &schema_text,
        allowed_shops: &allowed,
        max_days_lookback: policy.max_days_lookback,
        today,
        timezone: &policy.timezone,
    };
    let reply = state
        .llm
        .invoke(&initial_prompt(&prompt_ctx))
        .await
        .map_err(|e| http_error(e.into()))?;

    let draft = match reply {
        LlmReply::Clarification(c) => {
            return Ok(Json(AskResponse::Clarification {
                clarifying_question: c.question,
                assumptions: c.assumptions,
                confidence: c.confidence,
            }))
        }
        LlmReply::Sql(draft) => draft,
    };

    // Validate → execute → bounded repair.
    let validate = ValidateOptions {
        allowed_shops: allowed.clone(),
        require_partition_filter: true,
        max_days_lookback: policy.max_days_lookback,
        today,
    };
    let run_opts = RunOptions::from_config(&state.config.athena, &state.config.catalog.database);

    let outcome = execute_with_self_correction(
        &state.llm,
        state.engine.as_ref(),
        &validate,
        &run_opts,
        &prompt_ctx,
        draft,
        policy.max_fix_attempts,
    )
    .await
    .map_err(http_error)?;

    let (draft, result) = match outcome {
        CorrectionOutcome::Rejected { draft, reason } => {
            return Ok(Json(AskResponse::SqlRejected {
                reason: reason.to_string(),
                model_sql: draft.sql,
                assumptions: draft.assumptions,
                confidence: draft.confidence,
            }))
        }
        CorrectionOutcome::Clarify(c) => {
            return Ok(Json(AskResponse::Clarification {
                clarifying_question: c.question,
                assumptions: c.assumptions,
                confidence: c.confidence,
            }))
        }
        CorrectionOutcome::Failed { draft, last_error } => {
            return Ok(Json(AskResponse::AthenaFailed {
                error: last_error,
                last_sql: draft.sql,
                assumptions: draft.assumptions,
                confidence: draft.confidence,
            }))
        }
        CorrectionOutcome::Done { draft, result } => (draft, result),
    };

    // Cache the success; only `result` envelopes are ever cached.
    let cached = CachedResponse {
        sql: draft.sql.clone(),
        columns: result.columns.clone(),
        rows: result.rows.clone(),
        assumptions: draft.assumptions.clone(),
        confidence: draft.confidence,
        scanned_bytes: result.scanned_bytes,
        exec_ms: result.exec_ms,
        query_id: result.query_id.clone(),
    };
    if let Err(e) = cache::put_cached(&state.db, &cache_key, &cached, policy.cache_ttl_secs).await {
        warn!("cache store failed: {}", e);
    }

    Ok(Json(AskResponse::Result {
        cached: false,
        result: shape(&result.columns, &result.rows),
        sql: draft.sql,
        assumptions: draft.assumptions,
        confidence: draft.confidence,
        query_id: result.query_id,
        scanned_bytes: result.scanned_bytes,
        exec_ms: result.exec_ms,
    }))
}

fn http_error(e: Error) -> (StatusCode, String) {
    match e {
        // Client errors carry their code string as the body verbatim.
        Error::InputInvalid(msg) => (StatusCode::BAD_REQUEST, msg),
        Error::NotAuthorized(msg) => (StatusCode::FORBIDDEN, msg),
        other => {
            error!("ask failed: {}", other);
            (StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
        }
    }
}
