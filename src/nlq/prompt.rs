use chrono::{Duration, NaiveDate};

/// Everything a prompt rendering needs. Built once per request.
pub struct PromptContext<'a> {
    pub question: &'a str,
    pub schema_text: &'a str,
    pub allowed_shops: &'a [String],
    pub max_days_lookback: i64,
    pub today: NaiveDate,
    pub timezone: &'a str,
}

impl PromptContext<'_> {
    fn dt_min(&self) -> String {
        (self.today - Duration::days(self.max_days_lookback))
            .format("%Y-%m-%d")
            .to_string()
    }

    fn shops_list(&self) -> String {
        if self.allowed_shops.is_empty() {
            "(none)".to_string()
        } else {
            self.allowed_shops.join(", ")
        }
    }
}

/// Prompt for the first SQL generation attempt.
pub fn initial_prompt(ctx: &PromptContext) -> String {
    let dt_min = ctx.dt_min();
    let today = ctx.today.format("%Y-%m-%d");

    format!(
        r#"You are a Text-to-SQL compiler for AWS Athena.

OUTPUT: valid JSON ONLY (never SQL alone).

CRITICAL RULES:
- One SELECT statement only (WITH clauses are allowed), no semicolon, no comments.
- Use ONLY tables/columns in schema.
- shop_id must be restricted to this allowlist: [{shops}].
- dt must always have a lower bound >= '{dt_min}'.
  Example:
    dt >= date '{dt_min}'
    OR dt between date '{dt_min}' and date '{today}'
- NEVER remove the dt filter.
- Prefer partition pruning: filter dt and shop_id.
- ALWAYS wrap aggregate functions using COALESCE(..., 0) so results never return NULL.
  For example:
    SUM(x)   => COALESCE(SUM(x), 0)
    AVG(x)   => COALESCE(AVG(x), 0)
    COUNT(x) => COALESCE(COUNT(x), 0)
- When the user asks for total/aggregate values, return a single scalar column named appropriately (e.g., total_net_revenue).

TODAY: {today}
DT_MIN_ALLOWED: {dt_min}
LOCAL_TIMEZONE: {tz}

SCHEMA:
{schema}

USER QUESTION:
{question}

Return JSON:
{{
  "sql": "...",
  "confidence": 0.0,
  "assumptions": ["..."],
  "needs_clarification": false,
  "clarifying_question": null
}}
"#,
        shops = ctx.shops_list(),
        dt_min = dt_min,
        today = today,
        tz = ctx.timezone,
        schema = ctx.schema_text,
        question = ctx.question,
    )
}

/// Prompt for a repair attempt: quotes the prior SQL and the engine (or
/// validator) error so the model can correct it.
pub fn repair_prompt(ctx: &PromptContext, prev_sql: &str, engine_error: &str) -> String {
    let dt_min = ctx.dt_min();

    format!(
        r#"FIX the SQL query.

CRITICAL RULES:
- Output JSON only.
- One SELECT only (WITH clauses are allowed), no semicolon, no comments.
- shop_id must remain inside allowlist [{shops}].
- dt MUST have lower bound >= '{dt_min}'.
- schema + question must be respected.

LOCAL_TIMEZONE: {tz}

SCHEMA:
{schema}

QUESTION:
{question}

PREVIOUS SQL:
{prev_sql}

ENGINE ERROR:
{error}

Return JSON:
{{
  "sql": "...",
  "confidence": 0.0,
  "assumptions": ["..."],
  "needs_clarification": false,
  "clarifying_question": null
}}
"#,
        shops = ctx.shops_list(),
        dt_min = dt_min,
        tz = ctx.timezone,
        schema = ctx.schema_text,
        question = ctx.question,
        prev_sql = prev_sql,
        error = engine_error,
    )
}
