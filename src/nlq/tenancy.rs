use crate::error::{Error, Result};
use crate::store::{repository, Database};

/// Shops the caller is allowed to read, from the shop↔user mapping.
/// De-duplicated case-insensitively, preserving stored case for display.
pub async fn allowed_shops(db: &Database, user_sub: &str) -> Result<Vec<String>> {
    let user_sub = user_sub.trim().to_string();
    if user_sub.is_empty() {
        return Err(Error::InputInvalid("empty user sub".to_string()));
    }

    let shops = db
        .call(move |conn| repository::shops_for_user(conn, &user_sub))
        .await?;

    Ok(unique_shops(shops))
}

/// Intersect the request-supplied subset with the allowlist. An empty
/// request means "all allowed shops". Matching is case-insensitive and
/// the requested spelling and order win for display.
pub fn effective_shops(requested: &[String], allowed: &[String]) -> Vec<String> {
    if requested.is_empty() {
        return allowed.to_vec();
    }

    let allowed_set: std::collections::HashSet<String> =
        allowed.iter().map(|a| a.trim().to_lowercase()).collect();

    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(requested.len());
    for r in requested {
        let r = r.trim();
        if r.is_empty() {
            continue;
        }
        let key = r.to_lowercase();
        if !allowed_set.contains(&key) || !seen.insert(key) {
            continue;
        }
        out.push(r.to_string());
    }
    out
}

fn unique_shops(shops: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(shops.len());
    for shop in shops {
        let key = shop.trim().to_lowercase();
        if key.is_empty() || !seen.insert(key) {
            continue;
        }
        out.push(shop);
    }
    out
}
