//! The lock manager: exclusive per-file locks for sessions.
//!
//! This is the only code that mutates `file_locks`, and the single
//! coordination surface between concurrent sessions. Acquisition is
//! all-or-nothing over the requested path set; a racing insert that slips
//! past the initial read surfaces as a unique violation, which is caught
//! and converted into a structured conflict rather than a half-locked
//! path set.

use chrono::Utc;
use foreman_core::{FileLock, SessionId, SessionStatus};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use crate::error::{RegistryError, Result};
use crate::store::{RegistryStore, Tx};

/// A path another session already holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockConflict {
    /// The contested path.
    pub path: String,
    /// The session holding it.
    pub held_by: SessionId,
}

/// Result of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Every requested path is now held by the session.
    Acquired {
        /// The deduplicated path set the session holds after the call.
        locked: Vec<String>,
    },
    /// At least one path is held by another session; nothing was locked.
    Conflict {
        /// The contested paths and their holders.
        conflicts: Vec<LockConflict>,
    },
}

impl AcquireOutcome {
    /// Returns true when the acquisition succeeded.
    #[must_use]
    pub fn is_acquired(&self) -> bool {
        matches!(self, Self::Acquired { .. })
    }
}

/// A lock joined with its holding session, for display and for auditor
/// context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockStatus {
    /// The locked path.
    pub path: String,
    /// The holding session.
    pub session_id: SessionId,
    /// The holder's lifecycle status.
    pub status: SessionStatus,
    /// The branch the holder works on.
    pub branch_name: String,
}

/// Acquire, transfer, and release exclusive file locks.
///
/// Cheap to clone; wraps the registry handle.
#[derive(Debug, Clone)]
pub struct LockManager {
    store: RegistryStore,
}

impl LockManager {
    /// Creates a lock manager over the given registry.
    #[must_use]
    pub fn new(store: RegistryStore) -> Self {
        Self { store }
    }

    /// Attempts to lock every path in `paths` for `session_id`.
    ///
    /// All-or-nothing: either every missing path is inserted in one
    /// transaction, or nothing is. Paths the session already holds are
    /// idempotently accepted. The input is deduplicated before the read.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown session and `Precondition` for
    /// a terminal one. Lock contention is not an error; it is the
    /// `Conflict` outcome.
    pub async fn acquire(
        &self,
        session_id: SessionId,
        paths: &[String],
    ) -> Result<AcquireOutcome> {
        let paths = dedup(paths);
        let mut tx = self.store.begin().await?;

        let session = RegistryStore::session_for_update(&mut tx, session_id)
            .await?
            .ok_or_else(|| RegistryError::not_found("session", session_id))?;
        if session.is_terminal() {
            return Err(RegistryError::Precondition(format!(
                "session {session_id} is {} and cannot take locks",
                session.status
            )));
        }

        let mut conflicts = Vec::new();
        let mut missing = Vec::new();
        for path in &paths {
            match Self::holder_of(&mut tx, path).await? {
                Some(holder) if holder != session_id => {
                    conflicts.push(LockConflict {
                        path: path.clone(),
                        held_by: holder,
                    });
                }
                Some(_) => {} // already ours
                None => missing.push(path.clone()),
            }
        }
        if !conflicts.is_empty() {
            tx.rollback().await?;
            return Ok(AcquireOutcome::Conflict { conflicts });
        }

        let locked_at = Utc::now();
        for path in &missing {
            let inserted = sqlx::query(
                "INSERT INTO file_locks (file_path, session_id, locked_at) VALUES (?, ?, ?)",
            )
            .bind(path)
            .bind(session_id.to_string())
            .bind(locked_at)
            .execute(&mut *tx)
            .await;

            match inserted {
                Ok(_) => {}
                Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                    // Lost the race for this path. Abort the whole batch
                    // and report the conflict set from a fresh snapshot.
                    tx.rollback().await?;
                    let conflicts = self.conflicts_for(session_id, &paths).await?;
                    return Ok(AcquireOutcome::Conflict { conflicts });
                }
                Err(err) => return Err(err.into()),
            }
        }

        tx.commit().await?;
        tracing::debug!(session = %session_id, locked = paths.len(), "locks acquired");
        Ok(AcquireOutcome::Acquired { locked: paths })
    }

    /// Reassigns every lock held by `from` to `to`, inside the caller's
    /// transaction.
    ///
    /// Used by the remediation loop so a child session inherits its
    /// parent's lock set with no unlocked window.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn transfer(tx: &mut Tx<'_>, from: SessionId, to: SessionId) -> Result<u64> {
        let result = sqlx::query("UPDATE file_locks SET session_id = ? WHERE session_id = ?")
            .bind(to.to_string())
            .bind(from.to_string())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    /// Deletes all locks held by a session.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn release(&self, session_id: SessionId) -> Result<u64> {
        let mut tx = self.store.begin().await?;
        let released = Self::release_in(&mut tx, session_id).await?;
        tx.commit().await?;
        Ok(released)
    }

    /// Deletes all locks held by a session, inside the caller's
    /// transaction. Terminal transitions call this so invariant and
    /// transition commit together.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn release_in(tx: &mut Tx<'_>, session_id: SessionId) -> Result<u64> {
        let result = sqlx::query("DELETE FROM file_locks WHERE session_id = ?")
            .bind(session_id.to_string())
            .execute(&mut **tx)
            .await?;
        Ok(result.rows_affected())
    }

    /// Read-only view of who holds the given paths.
    ///
    /// # Errors
    ///
    /// Returns a database or corrupt-row error.
    pub async fn conflict_status(&self, paths: &[String]) -> Result<Vec<LockStatus>> {
        let paths = dedup(paths);
        let mut out = Vec::new();
        for path in &paths {
            let row = sqlx::query(
                "SELECT l.file_path, l.session_id, s.status, s.branch_name
                 FROM file_locks l JOIN sessions s ON s.id = l.session_id
                 WHERE l.file_path = ?",
            )
            .bind(path)
            .fetch_optional(self.store.pool())
            .await?;
            if let Some(row) = row {
                out.push(Self::row_to_status(&row)?);
            }
        }
        Ok(out)
    }

    /// Lists every lock in the registry.
    ///
    /// # Errors
    ///
    /// Returns a database or corrupt-row error.
    pub async fn list_locks(&self) -> Result<Vec<FileLock>> {
        let rows = sqlx::query(
            "SELECT file_path, session_id, locked_at FROM file_locks ORDER BY file_path",
        )
        .fetch_all(self.store.pool())
        .await?;
        rows.iter().map(row_to_lock).collect()
    }

    /// Lists the locks held by one session.
    ///
    /// # Errors
    ///
    /// Returns a database or corrupt-row error.
    pub async fn locks_for_session(&self, session_id: SessionId) -> Result<Vec<FileLock>> {
        let rows = sqlx::query(
            "SELECT file_path, session_id, locked_at FROM file_locks
             WHERE session_id = ? ORDER BY file_path",
        )
        .bind(session_id.to_string())
        .fetch_all(self.store.pool())
        .await?;
        rows.iter().map(row_to_lock).collect()
    }

    /// Deletes every lock. Operator escape hatch behind `DELETE /locks`.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn purge_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM file_locks")
            .execute(self.store.pool())
            .await?;
        Ok(result.rows_affected())
    }

    async fn holder_of(tx: &mut Tx<'_>, path: &str) -> Result<Option<SessionId>> {
        let row = sqlx::query("SELECT session_id FROM file_locks WHERE file_path = ?")
            .bind(path)
            .fetch_optional(&mut **tx)
            .await?;
        row.map(|r| {
            let holder: String = r.get("session_id");
            holder
                .parse()
                .map_err(|_| RegistryError::CorruptRow(format!("bad session id '{holder}'")))
        })
        .transpose()
    }

    async fn conflicts_for(
        &self,
        session_id: SessionId,
        paths: &[String],
    ) -> Result<Vec<LockConflict>> {
        let mut conflicts = Vec::new();
        for path in paths {
            let row = sqlx::query("SELECT session_id FROM file_locks WHERE file_path = ?")
                .bind(path)
                .fetch_optional(self.store.pool())
                .await?;
            if let Some(row) = row {
                let holder: String = row.get("session_id");
                let holder: SessionId = holder
                    .parse()
                    .map_err(|_| RegistryError::CorruptRow(format!("bad session id '{holder}'")))?;
                if holder != session_id {
                    conflicts.push(LockConflict {
                        path: path.clone(),
                        held_by: holder,
                    });
                }
            }
        }
        Ok(conflicts)
    }

    fn row_to_status(row: &sqlx::sqlite::SqliteRow) -> Result<LockStatus> {
        let session_id: String = row.get("session_id");
        let status: String = row.get("status");
        Ok(LockStatus {
            path: row.get("file_path"),
            session_id: session_id
                .parse()
                .map_err(|_| RegistryError::CorruptRow(format!("bad session id '{session_id}'")))?,
            status: status
                .parse::<SessionStatus>()
                .map_err(|e| RegistryError::CorruptRow(e.to_string()))?,
            branch_name: row.get("branch_name"),
        })
    }
}

fn row_to_lock(row: &sqlx::sqlite::SqliteRow) -> Result<FileLock> {
    let session_id: String = row.get("session_id");
    Ok(FileLock {
        file_path: row.get("file_path"),
        session_id: session_id
            .parse()
            .map_err(|_| RegistryError::CorruptRow(format!("bad session id '{session_id}'")))?,
        locked_at: row.get("locked_at"),
    })
}

fn dedup(paths: &[String]) -> Vec<String> {
    let mut seen = std::collections::BTreeSet::new();
    paths
        .iter()
        .filter(|p| seen.insert(p.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::{Session, SessionSpec};

    async fn seeded_session(store: &RegistryStore, branch: &str) -> Session {
        let session = Session::from_spec(SessionSpec {
            goal_id: None,
            cascade_id: None,
            source_repo: "acme/platform".into(),
            branch_name: branch.into(),
            base_branch: "main".into(),
            remediation_depth: 0,
        });
        let mut tx = store.begin().await.expect("begin");
        RegistryStore::insert_session(&mut tx, &session)
            .await
            .expect("insert");
        tx.commit().await.expect("commit");
        session
    }

    fn paths(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[tokio::test]
    async fn second_acquirer_gets_a_conflict() {
        let store = RegistryStore::in_memory().await.expect("open");
        let locks = LockManager::new(store.clone());
        let s1 = seeded_session(&store, "b1").await;
        let s2 = seeded_session(&store, "b2").await;

        let first = locks.acquire(s1.id, &paths(&["a.ts"])).await.expect("first");
        assert!(first.is_acquired());

        let second = locks.acquire(s2.id, &paths(&["a.ts"])).await.expect("second");
        match second {
            AcquireOutcome::Conflict { conflicts } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].path, "a.ts");
                assert_eq!(conflicts[0].held_by, s1.id);
            }
            AcquireOutcome::Acquired { .. } => panic!("expected conflict"),
        }
    }

    #[tokio::test]
    async fn batch_acquisition_is_all_or_nothing() {
        let store = RegistryStore::in_memory().await.expect("open");
        let locks = LockManager::new(store.clone());
        let s1 = seeded_session(&store, "b1").await;
        let s2 = seeded_session(&store, "b2").await;

        locks
            .acquire(s1.id, &paths(&["page.ts"]))
            .await
            .expect("seed lock");

        let outcome = locks
            .acquire(s2.id, &paths(&["layout.ts", "page.ts"]))
            .await
            .expect("batch");
        assert!(!outcome.is_acquired());

        // The uncontested path must not have been inserted.
        let all = locks.list_locks().await.expect("list");
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].file_path, "page.ts");
    }

    #[tokio::test]
    async fn reacquiring_held_paths_is_idempotent() {
        let store = RegistryStore::in_memory().await.expect("open");
        let locks = LockManager::new(store.clone());
        let s1 = seeded_session(&store, "b1").await;

        locks.acquire(s1.id, &paths(&["a.ts"])).await.expect("first");
        let again = locks
            .acquire(s1.id, &paths(&["a.ts", "b.ts"]))
            .await
            .expect("second");
        assert!(again.is_acquired());
        assert_eq!(locks.list_locks().await.expect("list").len(), 2);
    }

    #[tokio::test]
    async fn duplicate_input_paths_are_collapsed() {
        let store = RegistryStore::in_memory().await.expect("open");
        let locks = LockManager::new(store.clone());
        let s1 = seeded_session(&store, "b1").await;

        let outcome = locks
            .acquire(s1.id, &paths(&["a.ts", "a.ts", "b.ts"]))
            .await
            .expect("acquire");
        match outcome {
            AcquireOutcome::Acquired { locked } => assert_eq!(locked.len(), 2),
            AcquireOutcome::Conflict { .. } => panic!("expected acquisition"),
        }
    }

    #[tokio::test]
    async fn acquire_then_release_restores_the_pre_state() {
        let store = RegistryStore::in_memory().await.expect("open");
        let locks = LockManager::new(store.clone());
        let s1 = seeded_session(&store, "b1").await;

        locks
            .acquire(s1.id, &paths(&["a.ts", "b.ts"]))
            .await
            .expect("acquire");
        let released = locks.release(s1.id).await.expect("release");
        assert_eq!(released, 2);
        assert!(locks.list_locks().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn transfer_preserves_lock_cardinality() {
        let store = RegistryStore::in_memory().await.expect("open");
        let locks = LockManager::new(store.clone());
        let parent = seeded_session(&store, "b1").await;
        let child = seeded_session(&store, "b1").await;

        locks
            .acquire(parent.id, &paths(&["a.ts", "b.ts", "c.ts"]))
            .await
            .expect("acquire");

        let mut tx = store.begin().await.expect("begin");
        let moved = LockManager::transfer(&mut tx, parent.id, child.id)
            .await
            .expect("transfer");
        tx.commit().await.expect("commit");

        assert_eq!(moved, 3);
        assert!(locks
            .locks_for_session(parent.id)
            .await
            .expect("parent locks")
            .is_empty());
        assert_eq!(
            locks
                .locks_for_session(child.id)
                .await
                .expect("child locks")
                .len(),
            3
        );
    }

    #[tokio::test]
    async fn terminal_sessions_cannot_take_locks() {
        let store = RegistryStore::in_memory().await.expect("open");
        let locks = LockManager::new(store.clone());
        let mut session = seeded_session(&store, "b1").await;

        session.status = SessionStatus::Failed;
        let mut tx = store.begin().await.expect("begin");
        RegistryStore::update_session(&mut tx, &session)
            .await
            .expect("update");
        tx.commit().await.expect("commit");

        let err = locks
            .acquire(session.id, &paths(&["a.ts"]))
            .await
            .expect_err("terminal session");
        assert!(matches!(err, RegistryError::Precondition(_)));
    }

    #[tokio::test]
    async fn conflict_status_joins_holder_metadata() {
        let store = RegistryStore::in_memory().await.expect("open");
        let locks = LockManager::new(store.clone());
        let s1 = seeded_session(&store, "feature/locks").await;

        locks.acquire(s1.id, &paths(&["a.ts"])).await.expect("acquire");

        let status = locks
            .conflict_status(&paths(&["a.ts", "unlocked.ts"]))
            .await
            .expect("status");
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].session_id, s1.id);
        assert_eq!(status[0].branch_name, "feature/locks");
    }
}
