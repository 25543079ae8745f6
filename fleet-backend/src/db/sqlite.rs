//! SQLite connection pool and schema bootstrap for the account store.

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Result as SqliteResult;

pub type DbConn = r2d2::PooledConnection<SqliteConnectionManager>;

/// The persistent account store: accounts plus a key/value settings table.
pub struct Database {
    pool: Pool<SqliteConnectionManager>,
}

impl Database {
    /// Open (or create) the database at `path` and ensure the schema.
    pub fn new(path: &str) -> Result<Self, String> {
        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| format!("Failed to create database directory: {}", e))?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        });
        let pool = Pool::builder()
            .build(manager)
            .map_err(|e| format!("Failed to build connection pool: {}", e))?;

        let db = Self { pool };
        db.create_tables()
            .map_err(|e| format!("Failed to create tables: {}", e))?;
        Ok(db)
    }

    /// Get a pooled connection. The pool blocks (with a timeout) when
    /// exhausted, so a failure here means the store is unusable.
    pub(crate) fn conn(&self) -> DbConn {
        self.pool.get().expect("Database connection pool exhausted")
    }

    fn create_tables(&self) -> SqliteResult<()> {
        let conn = self.conn();

        conn.execute(
            "CREATE TABLE IF NOT EXISTS accounts (
                email TEXT PRIMARY KEY,
                password TEXT,
                recovery_email TEXT,
                secret_key TEXT,
                verification_link TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                message TEXT,
                window_id TEXT,
                window_config TEXT,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_accounts_status ON accounts(status)",
            [],
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT
            )",
            [],
        )?;

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_database() -> (Database, tempfile::TempDir) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("fleet-test.db");
    let db = Database::new(path.to_str().unwrap()).expect("test database");
    (db, dir)
}
