//! The registry store: SQLite-backed persistent state.
//!
//! All goals, sessions, cascades, and file locks live here. The schema is
//! embedded and executed at open; there are no migration files. Write
//! transactions ride SQLite's single-writer lock, which serializes the
//! transitions that enforce lock exclusivity and session terminality, and
//! the `file_locks.file_path` primary key plus `ON DELETE CASCADE` from
//! sessions enforce the lock invariant at the storage layer.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;

use crate::error::Result;

/// A write transaction against the registry.
pub type Tx<'a> = sqlx::Transaction<'a, sqlx::Sqlite>;

/// Database schema, executed once on open.
const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS goals (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT NOT NULL,
    criteria TEXT NOT NULL,
    review_artifacts TEXT NOT NULL DEFAULT '[]',
    status TEXT NOT NULL CHECK(status IN ('backlog', 'in-progress', 'completed', 'drifted')),
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cascades (
    id TEXT PRIMARY KEY,
    trigger_session_id TEXT,
    core_files_changed TEXT NOT NULL,
    downstream_files TEXT NOT NULL DEFAULT '[]',
    repair_job_count INTEGER NOT NULL DEFAULT 0,
    summary TEXT NOT NULL DEFAULT '',
    status TEXT NOT NULL CHECK(status IN ('analyzing', 'dispatched', 'completed', 'failed')),
    telemetry TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    goal_id TEXT REFERENCES goals(id) ON DELETE SET NULL,
    cascade_id TEXT REFERENCES cascades(id) ON DELETE SET NULL,
    source_repo TEXT NOT NULL,
    branch_name TEXT NOT NULL,
    base_branch TEXT NOT NULL,
    external_agent_id TEXT UNIQUE,
    external_agent_url TEXT,
    last_reviewed_commit TEXT,
    remediation_depth INTEGER NOT NULL DEFAULT 0 CHECK(remediation_depth <= 3),
    status TEXT NOT NULL CHECK(status IN ('queued', 'executing', 'verifying', 'completed', 'failed')),
    last_error TEXT,
    last_synced_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS file_locks (
    file_path TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    locked_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_sessions_repo_branch ON sessions(source_repo, branch_name);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);
CREATE INDEX IF NOT EXISTS idx_sessions_cascade ON sessions(cascade_id);
CREATE INDEX IF NOT EXISTS idx_file_locks_session ON file_locks(session_id);
";

/// Handle to the registry database. Cheap to clone; wraps a pool.
#[derive(Debug, Clone)]
pub struct RegistryStore {
    pool: SqlitePool,
}

impl RegistryStore {
    /// Opens (or creates) the registry at the given path.
    ///
    /// WAL journaling and foreign keys are enabled on every connection; a
    /// busy timeout absorbs short writer contention instead of surfacing
    /// `SQLITE_BUSY` to callers.
    ///
    /// # Errors
    ///
    /// Returns an error when the database cannot be opened or the schema
    /// cannot be applied.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    /// Opens an in-memory registry for tests.
    ///
    /// A single connection keeps every query on the same in-memory
    /// database.
    ///
    /// # Errors
    ///
    /// Returns an error when the schema cannot be applied.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.bootstrap().await?;
        Ok(store)
    }

    async fn bootstrap(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    /// Begins a write transaction.
    ///
    /// # Errors
    ///
    /// Returns an error when a connection cannot be acquired.
    pub async fn begin(&self) -> Result<Tx<'static>> {
        Ok(self.pool.begin().await?)
    }

    /// The underlying pool, for read-only queries.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_to_fresh_database() {
        let store = RegistryStore::in_memory().await.expect("open");
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
             ('goals', 'sessions', 'cascades', 'file_locks')",
        )
        .fetch_one(store.pool())
        .await
        .expect("query");
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn bootstrap_is_idempotent() {
        let store = RegistryStore::in_memory().await.expect("open");
        store.bootstrap().await.expect("second bootstrap");
    }

    #[tokio::test]
    async fn file_backed_store_survives_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("registry.db");

        {
            let store = RegistryStore::open(&path).await.expect("first open");
            sqlx::query("INSERT INTO goals (id, title, description, criteria, status, created_at, updated_at)
                         VALUES ('g-1', 't', 'd', '[]', 'backlog', '2026-01-01T00:00:00Z', '2026-01-01T00:00:00Z')")
                .execute(store.pool())
                .await
                .expect("insert");
        }

        let store = RegistryStore::open(&path).await.expect("reopen");
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM goals")
            .fetch_one(store.pool())
            .await
            .expect("count");
        assert_eq!(count, 1);
    }
}
