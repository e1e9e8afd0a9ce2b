//! Goal row storage.
//!
//! Criteria and review artifacts are stored as JSON blobs and rewritten
//! whole under the goal's row; the engine reads the goal inside its write
//! transaction before merging an assessment, which is what prevents lost
//! updates when the auditor runs concurrently with an operator edit.

use foreman_core::{Goal, GoalId, GoalStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{RegistryError, Result};
use crate::store::{RegistryStore, Tx};

const GOAL_COLUMNS: &str =
    "id, title, description, criteria, review_artifacts, status, created_at, updated_at";

fn row_to_goal(row: &SqliteRow) -> Result<Goal> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let criteria: String = row.get("criteria");
    let review_artifacts: String = row.get("review_artifacts");
    Ok(Goal {
        id: id
            .parse()
            .map_err(|_| RegistryError::CorruptRow(format!("bad goal id '{id}'")))?,
        title: row.get("title"),
        description: row.get("description"),
        criteria: serde_json::from_str(&criteria)?,
        review_artifacts: serde_json::from_str(&review_artifacts)?,
        status: status
            .parse::<GoalStatus>()
            .map_err(|e| RegistryError::CorruptRow(e.to_string()))?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl RegistryStore {
    /// Inserts a goal row inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// Returns a database or serialization error.
    pub async fn insert_goal(tx: &mut Tx<'_>, goal: &Goal) -> Result<()> {
        sqlx::query(
            "INSERT INTO goals (id, title, description, criteria, review_artifacts, status,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(goal.id.to_string())
        .bind(&goal.title)
        .bind(&goal.description)
        .bind(serde_json::to_string(&goal.criteria)?)
        .bind(serde_json::to_string(&goal.review_artifacts)?)
        .bind(goal.status.to_string())
        .bind(goal.created_at)
        .bind(goal.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Rewrites a goal row (criteria and artifacts included) inside the
    /// caller's transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the row does not exist.
    pub async fn update_goal(tx: &mut Tx<'_>, goal: &Goal) -> Result<()> {
        let result = sqlx::query(
            "UPDATE goals SET title = ?, description = ?, criteria = ?, review_artifacts = ?,
                 status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&goal.title)
        .bind(&goal.description)
        .bind(serde_json::to_string(&goal.criteria)?)
        .bind(serde_json::to_string(&goal.review_artifacts)?)
        .bind(goal.status.to_string())
        .bind(goal.updated_at)
        .bind(goal.id.to_string())
        .execute(&mut **tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found("goal", goal.id));
        }
        Ok(())
    }

    /// Reads a goal inside the caller's transaction, pinning its row for
    /// a read-modify-write.
    ///
    /// # Errors
    ///
    /// Returns a database or corrupt-row error.
    pub async fn goal_for_update(tx: &mut Tx<'_>, id: GoalId) -> Result<Option<Goal>> {
        let row = sqlx::query(&format!("SELECT {GOAL_COLUMNS} FROM goals WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&mut **tx)
            .await?;
        row.as_ref().map(row_to_goal).transpose()
    }

    /// Reads a goal by ID.
    ///
    /// # Errors
    ///
    /// Returns a database or corrupt-row error.
    pub async fn goal(&self, id: GoalId) -> Result<Option<Goal>> {
        let row = sqlx::query(&format!("SELECT {GOAL_COLUMNS} FROM goals WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(self.pool())
            .await?;
        row.as_ref().map(row_to_goal).transpose()
    }

    /// Lists all goals, newest first.
    ///
    /// # Errors
    ///
    /// Returns a database or corrupt-row error.
    pub async fn list_goals(&self) -> Result<Vec<Goal>> {
        let rows = sqlx::query(&format!("SELECT {GOAL_COLUMNS} FROM goals ORDER BY id DESC"))
            .fetch_all(self.pool())
            .await?;
        rows.iter().map(row_to_goal).collect()
    }

    /// Deletes a goal. Sessions pointing at it have their pointer nulled
    /// by the schema.
    ///
    /// # Errors
    ///
    /// Returns a database error.
    pub async fn delete_goal(&self, id: GoalId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM goals WHERE id = ?")
            .bind(id.to_string())
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use foreman_core::AcceptanceCriterion;

    fn sample_goal() -> Goal {
        Goal::new(
            "Stabilize the planner",
            "The planner must stop emitting duplicate steps",
            vec![AcceptanceCriterion::new("c-dup", "no duplicate steps in output")],
        )
    }

    #[tokio::test]
    async fn goal_round_trips_with_criteria() {
        let store = RegistryStore::in_memory().await.expect("open");
        let goal = sample_goal();

        let mut tx = store.begin().await.expect("begin");
        RegistryStore::insert_goal(&mut tx, &goal).await.expect("insert");
        tx.commit().await.expect("commit");

        let read = store.goal(goal.id).await.expect("read").expect("row");
        assert_eq!(read.criteria, goal.criteria);
        assert_eq!(read.status, GoalStatus::Backlog);
    }

    #[tokio::test]
    async fn criterion_ids_survive_rewrite() {
        let store = RegistryStore::in_memory().await.expect("open");
        let mut goal = sample_goal();

        let mut tx = store.begin().await.expect("begin");
        RegistryStore::insert_goal(&mut tx, &goal).await.expect("insert");
        tx.commit().await.expect("commit");

        goal.criteria[0].met = true;
        goal.status = GoalStatus::InProgress;
        let mut tx = store.begin().await.expect("begin");
        RegistryStore::update_goal(&mut tx, &goal).await.expect("update");
        tx.commit().await.expect("commit");

        let read = store.goal(goal.id).await.expect("read").expect("row");
        assert_eq!(read.criteria[0].id, "c-dup");
        assert!(read.criteria[0].met);
        assert_eq!(read.status, GoalStatus::InProgress);
    }

    #[tokio::test]
    async fn delete_returns_whether_a_row_existed() {
        let store = RegistryStore::in_memory().await.expect("open");
        let goal = sample_goal();

        let mut tx = store.begin().await.expect("begin");
        RegistryStore::insert_goal(&mut tx, &goal).await.expect("insert");
        tx.commit().await.expect("commit");

        assert!(store.delete_goal(goal.id).await.expect("delete"));
        assert!(!store.delete_goal(goal.id).await.expect("second delete"));
    }
}
