use chrono::{Duration, NaiveDate};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static FORBIDDEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\b(insert|update|delete|merge|drop|alter|create|truncate|grant|revoke|call|execute|prepare|deallocate)\b",
    )
    .unwrap()
});

static DT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bdt\b").unwrap());

static DT_BETWEEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bdt\b\s+between\s+(?:date\s+)?'(\d{4}-\d{2}-\d{2})'\s+and\s+(?:date\s+)?'(\d{4}-\d{2}-\d{2})'")
        .unwrap()
});

static DT_LOWER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bdt\b\s*(>=|>)\s*(?:date\s+)?'(\d{4}-\d{2}-\d{2})'").unwrap()
});

static SHOP_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\bshop_id\b").unwrap());

static SHOP_PRED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bshop_id\b\s*(?:=|in)\s*\(([^)]*)\)|\bshop_id\b\s*=\s*'([^']*)'").unwrap()
});

static QUOTED_VALUE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'([^']*)'").unwrap());

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub allowed_shops: Vec<String>,
    pub require_partition_filter: bool,
    pub max_days_lookback: i64,
    pub today: NaiveDate,
}

/// Why a candidate SQL was refused. The `Display` strings surface
/// verbatim in the response envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    EmptySql,
    NotSelect,
    SemicolonNotAllowed,
    CommentNotAllowed,
    ForbiddenKeyword(String),
    DtFilterMissing,
    DtLowerBoundMissing,
    DtStartInvalid(String),
    DtLookbackTooLarge { start: String, max_days: i64 },
    ShopFilterMissing,
    ShopPredicateUnrecognized,
    ShopInListEmpty,
    ShopValueNotAllowed(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::EmptySql => write!(f, "empty sql"),
            RejectReason::NotSelect => write!(f, "only SELECT queries are allowed"),
            RejectReason::SemicolonNotAllowed => write!(f, "semicolon not allowed"),
            RejectReason::CommentNotAllowed => write!(f, "comments not allowed"),
            RejectReason::ForbiddenKeyword(kw) => write!(f, "disallowed keyword: {}", kw),
            RejectReason::DtFilterMissing => write!(f, "missing required dt filter"),
            RejectReason::DtLowerBoundMissing => {
                write!(f, "dt filter must include a lower bound (dt >= ... or dt BETWEEN ...)")
            }
            RejectReason::DtStartInvalid(s) => write!(f, "dt lower bound invalid: {}", s),
            RejectReason::DtLookbackTooLarge { start, max_days } => {
                write!(f, "dt lookback too large: start={} older than {} days", start, max_days)
            }
            RejectReason::ShopFilterMissing => write!(f, "missing required shop_id filter"),
            RejectReason::ShopPredicateUnrecognized => {
                write!(f, "shop_id filter must be equality or IN list")
            }
            RejectReason::ShopInListEmpty => {
                write!(f, "shop_id IN list must contain quoted values")
            }
            RejectReason::ShopValueNotAllowed(v) => {
                write!(f, "shop_id value not allowed: {}", v)
            }
        }
    }
}

/// Enforce the safety contract on candidate SQL:
/// - SELECT only, single statement, no comments
/// - no data-modifying or DDL keywords
/// - dt predicate present with a bounded lower bound (partition pruning)
/// - shop_id predicate restricted to the allowlist
///
/// Checks are lexical and case-insensitive over a whitespace-normalized
/// copy. The validator never rewrites the SQL.
pub fn validate_sql(sql: &str, opt: &ValidateOptions) -> Result<(), RejectReason> {
    let normalized = normalize(sql);
    if normalized.is_empty() {
        return Err(RejectReason::EmptySql);
    }

    if normalized.contains(';') {
        return Err(RejectReason::SemicolonNotAllowed);
    }
    if normalized.contains("--") || normalized.contains("/*") || normalized.contains("*/") {
        return Err(RejectReason::CommentNotAllowed);
    }
    if !(normalized.starts_with("select") || normalized.starts_with("with")) {
        return Err(RejectReason::NotSelect);
    }

    if let Some(m) = FORBIDDEN_RE.find(&normalized) {
        return Err(RejectReason::ForbiddenKeyword(m.as_str().to_string()));
    }

    if opt.require_partition_filter {
        let max_days = if opt.max_days_lookback <= 0 {
            90
        } else {
            opt.max_days_lookback
        };
        require_bounded_dt_predicate(&normalized, opt.today, max_days)?;
    }

    if opt.allowed_shops.is_empty() {
        // No tenant bound supplied; still insist the query scopes by shop.
        if !SHOP_RE.is_match(&normalized) {
            return Err(RejectReason::ShopFilterMissing);
        }
        return Ok(());
    }

    require_allowed_shop_filter(&normalized, &opt.allowed_shops)
}

/// Single lowercased copy with runs of whitespace collapsed, so the
/// matchers can assume single spaces.
fn normalize(sql: &str) -> String {
    sql.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// dt must carry a lower bound not older than `today - max_days`:
///
///   dt >= [date] 'YYYY-MM-DD'
///   dt >  [date] 'YYYY-MM-DD'
///   dt between [date] 'YYYY-MM-DD' and [date] 'YYYY-MM-DD'
///
/// A dt mention without a matching lower bound (e.g. only dt <= ...) is
/// rejected.
fn require_bounded_dt_predicate(
    low_sql: &str,
    today: NaiveDate,
    max_days: i64,
) -> Result<(), RejectReason> {
    let min_allowed = today - Duration::days(max_days);

    let start = if let Some(caps) = DT_BETWEEN_RE.captures(low_sql) {
        caps.get(1).map(|m| m.as_str().to_string())
    } else {
        DT_LOWER_RE
            .captures(low_sql)
            .and_then(|caps| caps.get(2).map(|m| m.as_str().to_string()))
    };

    match start {
        Some(start) => {
            let start_date = NaiveDate::parse_from_str(&start, "%Y-%m-%d")
                .map_err(|_| RejectReason::DtStartInvalid(start.clone()))?;
            if start_date < min_allowed {
                return Err(RejectReason::DtLookbackTooLarge { start, max_days });
            }
            Ok(())
        }
        None => {
            if DT_RE.is_match(low_sql) {
                Err(RejectReason::DtLowerBoundMissing)
            } else {
                Err(RejectReason::DtFilterMissing)
            }
        }
    }
}

/// shop_id must appear as `shop_id = 'x'` or `shop_id IN ('x', ...)`,
/// and every literal in every such predicate must be on the allowlist.
fn require_allowed_shop_filter(low_sql: &str, allowed: &[String]) -> Result<(), RejectReason> {
    if !SHOP_RE.is_match(low_sql) {
        return Err(RejectReason::ShopFilterMissing);
    }

    let allow: std::collections::HashSet<String> = allowed
        .iter()
        .map(|v| v.trim().to_lowercase())
        .collect();

    let mut checked_any = false;
    for caps in SHOP_PRED_RE.captures_iter(low_sql) {
        if let Some(in_list) = caps.get(1) {
            let mut found_value = false;
            for value in QUOTED_VALUE_RE.captures_iter(in_list.as_str()) {
                found_value = true;
                let v = value[1].trim().to_string();
                if !allow.contains(&v) {
                    return Err(RejectReason::ShopValueNotAllowed(v));
                }
            }
            if !found_value {
                return Err(RejectReason::ShopInListEmpty);
            }
            checked_any = true;
        } else if let Some(eq_value) = caps.get(2) {
            let v = eq_value.as_str().trim().to_string();
            if !allow.contains(&v) {
                return Err(RejectReason::ShopValueNotAllowed(v));
            }
            checked_any = true;
        }
    }

    if !checked_any {
        return Err(RejectReason::ShopPredicateUnrecognized);
    }
    Ok(())
}
