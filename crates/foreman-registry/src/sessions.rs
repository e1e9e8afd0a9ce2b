//! Session row storage.

use chrono::{DateTime, Utc};
use foreman_core::{Session, SessionStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{RegistryError, Result};
use crate::store::{RegistryStore, Tx};

const SESSION_COLUMNS: &str = "id, goal_id, cascade_id, source_repo, branch_name, base_branch, \
     external_agent_id, external_agent_url, last_reviewed_commit, remediation_depth, status, \
     last_error, last_synced_at, created_at, updated_at";

fn parse_id<T: std::str::FromStr>(value: &str, what: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| RegistryError::CorruptRow(format!("bad {what} '{value}'")))
}

fn row_to_session(row: &SqliteRow) -> Result<Session> {
    let status: String = row.get("status");
    Ok(Session {
        id: parse_id(&row.get::<String, _>("id"), "session id")?,
        goal_id: row
            .get::<Option<String>, _>("goal_id")
            .map(|v| parse_id(&v, "goal id"))
            .transpose()?,
        cascade_id: row
            .get::<Option<String>, _>("cascade_id")
            .map(|v| parse_id(&v, "cascade id"))
            .transpose()?,
        source_repo: row.get("source_repo"),
        branch_name: row.get("branch_name"),
        base_branch: row.get("base_branch"),
        external_agent_id: row.get("external_agent_id"),
        external_agent_url: row.get("external_agent_url"),
        last_reviewed_commit: row.get("last_reviewed_commit"),
        remediation_depth: row.get::<i64, _>("remediation_depth") as u32,
        status: status
            .parse::<SessionStatus>()
            .map_err(|e| RegistryError::CorruptRow(e.to_string()))?,
        last_error: row.get("last_error"),
        last_synced_at: row.get::<Option<DateTime<Utc>>, _>("last_synced_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl RegistryStore {
    /// Inserts a session row inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// Returns a database error; a duplicate `external_agent_id` surfaces
    /// as a unique violation.
    pub async fn insert_session(tx: &mut Tx<'_>, session: &Session) -> Result<()> {
        sqlx::query(
            "INSERT INTO sessions (id, goal_id, cascade_id, source_repo, branch_name, base_branch,
                 external_agent_id, external_agent_url, last_reviewed_commit, remediation_depth,
                 status, last_error, last_synced_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session.id.to_string())
        .bind(session.goal_id.map(|id| id.to_string()))
        .bind(session.cascade_id.map(|id| id.to_string()))
        .bind(&session.source_repo)
        .bind(&session.branch_name)
        .bind(&session.base_branch)
        .bind(&session.external_agent_id)
        .bind(&session.external_agent_url)
        .bind(&session.last_reviewed_commit)
        .bind(i64::from(session.remediation_depth))
        .bind(session.status.to_string())
        .bind(&session.last_error)
        .bind(session.last_synced_at)
        .bind(session.created_at)
        .bind(session.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Rewrites a session row inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the row does not exist.
    pub async fn update_session(tx: &mut Tx<'_>, session: &Session) -> Result<()> {
        let result = sqlx::query(
            "UPDATE sessions SET goal_id = ?, cascade_id = ?, source_repo = ?, branch_name = ?,
                 base_branch = ?, external_agent_id = ?, external_agent_url = ?,
                 last_reviewed_commit = ?, remediation_depth = ?, status = ?, last_error = ?,
                 last_synced_at = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(session.goal_id.map(|id| id.to_string()))
        .bind(session.cascade_id.map(|id| id.to_string()))
        .bind(&session.source_repo)
        .bind(&session.branch_name)
        .bind(&session.base_branch)
        .bind(&session.external_agent_id)
        .bind(&session.external_agent_url)
        .bind(&session.last_reviewed_commit)
        .bind(i64::from(session.remediation_depth))
        .bind(session.status.to_string())
        .bind(&session.last_error)
        .bind(session.last_synced_at)
        .bind(session.updated_at)
        .bind(session.id.to_string())
        .execute(&mut **tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found("session", session.id));
        }
        Ok(())
    }

    /// Reads a session row inside the caller's transaction.
    ///
    /// Inside a write transaction this pins the row against the
    /// transition code's read-modify-write, which is how per-session
    /// transitions stay serialized.
    ///
    /// # Errors
    ///
    /// Returns a database error or a corrupt-row error.
    pub async fn session_for_update(
        tx: &mut Tx<'_>,
        id: foreman_core::SessionId,
    ) -> Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    /// Reads a session by ID.
    ///
    /// # Errors
    ///
    /// Returns a database error or a corrupt-row error.
    pub async fn session(&self, id: foreman_core::SessionId) -> Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    /// Lists all non-terminal sessions, newest first.
    ///
    /// # Errors
    ///
    /// Returns a database error or a corrupt-row error.
    pub async fn list_active_sessions(&self) -> Result<Vec<Session>> {
        let rows = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE status NOT IN ('completed', 'failed')
             ORDER BY id DESC"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.iter().map(row_to_session).collect()
    }

    /// Finds the most recent non-terminal session for a repo and branch.
    ///
    /// Session IDs are ULIDs, so ordering by ID is ordering by creation
    /// time.
    ///
    /// # Errors
    ///
    /// Returns a database error or a corrupt-row error.
    pub async fn latest_live_session(
        tx: &mut Tx<'_>,
        source_repo: &str,
        branch_name: &str,
    ) -> Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE source_repo = ? AND branch_name = ?
               AND status NOT IN ('completed', 'failed')
             ORDER BY id DESC
             LIMIT 1"
        ))
        .bind(source_repo)
        .bind(branch_name)
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    /// Finds the most recent session for a repo and branch regardless of
    /// status. Duplicate-commit suppression consults this before the
    /// liveness check so a redelivery after a completing review still
    /// reads as a duplicate.
    ///
    /// # Errors
    ///
    /// Returns a database error or a corrupt-row error.
    pub async fn latest_session(
        tx: &mut Tx<'_>,
        source_repo: &str,
        branch_name: &str,
    ) -> Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE source_repo = ? AND branch_name = ?
             ORDER BY id DESC
             LIMIT 1"
        ))
        .bind(source_repo)
        .bind(branch_name)
        .fetch_optional(&mut **tx)
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }

    /// Finds the most recent session for a goal that has a reviewed
    /// commit, terminal or not. Used by re-audit.
    ///
    /// # Errors
    ///
    /// Returns a database error or a corrupt-row error.
    pub async fn latest_reviewed_session_for_goal(
        &self,
        goal_id: foreman_core::GoalId,
    ) -> Result<Option<Session>> {
        let row = sqlx::query(&format!(
            "SELECT {SESSION_COLUMNS} FROM sessions
             WHERE goal_id = ? AND last_reviewed_commit IS NOT NULL
             ORDER BY id DESC
             LIMIT 1"
        ))
        .bind(goal_id.to_string())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_session).transpose()
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::SessionSpec;

    fn spec(branch: &str) -> SessionSpec {
        SessionSpec {
            goal_id: None,
            cascade_id: None,
            source_repo: "acme/platform".into(),
            branch_name: branch.into(),
            base_branch: "main".into(),
            remediation_depth: 0,
        }
    }

    #[tokio::test]
    async fn insert_and_read_round_trip() {
        let store = RegistryStore::in_memory().await.expect("open");
        let session = Session::from_spec(spec("foreman/a"));

        let mut tx = store.begin().await.expect("begin");
        RegistryStore::insert_session(&mut tx, &session)
            .await
            .expect("insert");
        tx.commit().await.expect("commit");

        let read = store.session(session.id).await.expect("read").expect("row");
        assert_eq!(read.id, session.id);
        assert_eq!(read.status, SessionStatus::Queued);
        assert_eq!(read.branch_name, "foreman/a");
    }

    #[tokio::test]
    async fn latest_live_session_skips_terminal_rows() {
        let store = RegistryStore::in_memory().await.expect("open");

        let mut done = Session::from_spec(spec("foreman/b"));
        done.status = SessionStatus::Completed;
        let live = Session::from_spec(spec("foreman/b"));

        let mut tx = store.begin().await.expect("begin");
        RegistryStore::insert_session(&mut tx, &done)
            .await
            .expect("insert done");
        RegistryStore::insert_session(&mut tx, &live)
            .await
            .expect("insert live");
        let found = RegistryStore::latest_live_session(&mut tx, "acme/platform", "foreman/b")
            .await
            .expect("query")
            .expect("row");
        tx.commit().await.expect("commit");

        assert_eq!(found.id, live.id);
    }

    #[tokio::test]
    async fn duplicate_agent_ids_are_rejected() {
        let store = RegistryStore::in_memory().await.expect("open");

        let mut first = Session::from_spec(spec("foreman/c"));
        first.external_agent_id = Some("agent-7".into());
        let mut second = Session::from_spec(spec("foreman/d"));
        second.external_agent_id = Some("agent-7".into());

        let mut tx = store.begin().await.expect("begin");
        RegistryStore::insert_session(&mut tx, &first)
            .await
            .expect("first insert");
        let err = RegistryStore::insert_session(&mut tx, &second)
            .await
            .expect_err("duplicate agent id");
        match err {
            RegistryError::Database(sqlx::Error::Database(db)) => {
                assert!(db.is_unique_violation());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
