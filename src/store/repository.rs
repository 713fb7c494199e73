use rusqlite::{params, Connection, OptionalExtension};

// ── Result cache ───────────────────────────────────────────────────

/// Fetch a cache payload if present and not past its expiry.
pub fn get_cache_entry(
    conn: &Connection,
    pk: &str,
    sk: &str,
    now: i64,
) -> Result<Option<String>, rusqlite::Error> {
    conn.query_row(
        "SELECT payload FROM nlq_cache
         WHERE pk = ?1 AND sk = ?2 AND expires_at > ?3",
        params![pk, sk, now],
        |row| row.get(0),
    )
    .optional()
}

/// Insert or refresh a cache entry. Concurrent writers racing on the same
/// key produce identical payloads, so last-write-wins is safe.
pub fn put_cache_entry(
    conn: &Connection,
    pk: &str,
    sk: &str,
    payload: &str,
    now: i64,
    ttl_secs: i64,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT INTO nlq_cache (pk, sk, payload, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(pk, sk) DO UPDATE SET
           payload = excluded.payload,
           created_at = excluded.created_at,
           expires_at = excluded.expires_at",
        params![pk, sk, payload, now, now + ttl_secs],
    )?;
    Ok(())
}

/// Delete rows whose expiry has passed. Returns the number removed.
pub fn delete_expired(conn: &Connection, now: i64) -> Result<usize, rusqlite::Error> {
    conn.execute("DELETE FROM nlq_cache WHERE expires_at <= ?1", params![now])
}

// ── Tenancy mapping ────────────────────────────────────────────────

/// Shops connected to a user, via the user_sub index.
pub fn shops_for_user(conn: &Connection, user_sub: &str) -> Result<Vec<String>, rusqlite::Error> {
    let mut stmt =
        conn.prepare("SELECT shop FROM shop_users WHERE user_sub = ?1 ORDER BY shop")?;
    let rows = stmt.query_map(params![user_sub], |row| row.get(0))?;
    rows.collect()
}

pub fn add_shop_user(
    conn: &Connection,
    shop: &str,
    user_sub: &str,
) -> Result<(), rusqlite::Error> {
    conn.execute(
        "INSERT OR IGNORE INTO shop_users (shop, user_sub) VALUES (?1, ?2)",
        params![shop, user_sub],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE nlq_cache (
                pk TEXT NOT NULL, sk TEXT NOT NULL, payload TEXT NOT NULL,
                created_at INTEGER NOT NULL, expires_at INTEGER NOT NULL,
                PRIMARY KEY (pk, sk)
            );
            CREATE TABLE shop_users (
                shop TEXT NOT NULL, user_sub TEXT NOT NULL,
                PRIMARY KEY (shop, user_sub)
            );",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_cache_roundtrip_and_expiry() {
        let conn = test_conn();
        put_cache_entry(&conn, "USER#u1", "NLQ#abc", "{\"x\":1}", 1_000, 600).unwrap();

        assert_eq!(
            get_cache_entry(&conn, "USER#u1", "NLQ#abc", 1_100).unwrap(),
            Some("{\"x\":1}".to_string())
        );
        // Past expiry the row is invisible even before the sweeper runs.
        assert_eq!(
            get_cache_entry(&conn, "USER#u1", "NLQ#abc", 1_600).unwrap(),
            None
        );

        assert_eq!(delete_expired(&conn, 1_600).unwrap(), 1);
    }

    #[test]
    fn test_put_is_idempotent() {
        let conn = test_conn();
        put_cache_entry(&conn, "USER#u1", "NLQ#abc", "{\"x\":1}", 1_000, 600).unwrap();
        put_cache_entry(&conn, "USER#u1", "NLQ#abc", "{\"x\":1}", 1_000, 600).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM nlq_cache", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            get_cache_entry(&conn, "USER#u1", "NLQ#abc", 1_100).unwrap(),
            Some("{\"x\":1}".to_string())
        );
    }

    #[test]
    fn test_cache_is_partitioned_by_pk() {
        let conn = test_conn();
        put_cache_entry(&conn, "USER#u1", "NLQ#abc", "{\"x\":1}", 1_000, 600).unwrap();

        assert_eq!(
            get_cache_entry(&conn, "USER#u2", "NLQ#abc", 1_100).unwrap(),
            None
        );
    }

    #[test]
    fn test_shops_for_user() {
        let conn = test_conn();
        add_shop_user(&conn, "b.myshopify.com", "u1").unwrap();
        add_shop_user(&conn, "a.myshopify.com", "u1").unwrap();
        add_shop_user(&conn, "c.myshopify.com", "u2").unwrap();

        assert_eq!(
            shops_for_user(&conn, "u1").unwrap(),
            vec!["a.myshopify.com", "b.myshopify.com"]
        );
        assert!(shops_for_user(&conn, "nobody").unwrap().is_empty());
    }
}
