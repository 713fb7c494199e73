pub mod repository;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

/// SQLite-backed store for the result cache and the shop↔user tenancy
/// mapping. A single connection guarded by a mutex is enough here: every
/// statement is a point read or write, and all access goes through
/// `spawn_blocking` so the async runtime never parks on SQLite I/O.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (and initialize) the database at the given path.
    pub async fn open_at(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection> {
            let conn = Connection::open(&path)?;
            init_connection(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| Error::Store(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing).
    pub async fn open_memory() -> Result<Self> {
        let conn = tokio::task::spawn_blocking(|| -> Result<Connection> {
            let conn = Connection::open_in_memory()?;
            init_connection(&conn)?;
            Ok(conn)
        })
        .await
        .map_err(|e| Error::Store(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Delete expired cache rows. Returns the number removed.
    pub async fn sweep_expired(&self) -> Result<usize> {
        let now = unix_now();
        self.call(move |conn| repository::delete_expired(conn, now))
            .await
    }

    /// Run a closure against the connection on the blocking pool.
    pub async fn call<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| {
                rusqlite::Error::InvalidQuery // poisoned lock; surfaces as a store error
            })?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::Store(e.to_string()))?
        .map_err(Error::from)
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn init_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;\
         PRAGMA busy_timeout=5000;",
    )?;
    ensure_schema(conn)
}

fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS nlq_cache (
            pk         TEXT NOT NULL,
            sk         TEXT NOT NULL,
            payload    TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            expires_at INTEGER NOT NULL,
            PRIMARY KEY (pk, sk)
        );
        CREATE INDEX IF NOT EXISTS idx_nlq_cache_expires ON nlq_cache (expires_at);
        CREATE TABLE IF NOT EXISTS shop_users (
            shop     TEXT NOT NULL,
            user_sub TEXT NOT NULL,
            PRIMARY KEY (shop, user_sub)
        );
        CREATE INDEX IF NOT EXISTS idx_shop_users_user_sub ON shop_users (user_sub);",
    )
}
