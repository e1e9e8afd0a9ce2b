//! Cascade row storage.

use foreman_core::{Cascade, CascadeId, CascadeStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::error::{RegistryError, Result};
use crate::store::{RegistryStore, Tx};

const CASCADE_COLUMNS: &str = "id, trigger_session_id, core_files_changed, downstream_files, \
     repair_job_count, summary, status, telemetry, created_at, updated_at";

fn row_to_cascade(row: &SqliteRow) -> Result<Cascade> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let core_files: String = row.get("core_files_changed");
    let downstream: String = row.get("downstream_files");
    let telemetry: Option<String> = row.get("telemetry");
    Ok(Cascade {
        id: id
            .parse()
            .map_err(|_| RegistryError::CorruptRow(format!("bad cascade id '{id}'")))?,
        trigger_session_id: row
            .get::<Option<String>, _>("trigger_session_id")
            .map(|v| {
                v.parse()
                    .map_err(|_| RegistryError::CorruptRow(format!("bad session id '{v}'")))
            })
            .transpose()?,
        core_files_changed: serde_json::from_str(&core_files)?,
        downstream_files: serde_json::from_str(&downstream)?,
        repair_job_count: row.get::<i64, _>("repair_job_count") as usize,
        summary: row.get("summary"),
        status: status
            .parse::<CascadeStatus>()
            .map_err(|e| RegistryError::CorruptRow(e.to_string()))?,
        telemetry: telemetry.map(|t| serde_json::from_str(&t)).transpose()?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

impl RegistryStore {
    /// Inserts a cascade row inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// Returns a database or serialization error.
    pub async fn insert_cascade(tx: &mut Tx<'_>, cascade: &Cascade) -> Result<()> {
        sqlx::query(
            "INSERT INTO cascades (id, trigger_session_id, core_files_changed, downstream_files,
                 repair_job_count, summary, status, telemetry, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(cascade.id.to_string())
        .bind(cascade.trigger_session_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&cascade.core_files_changed)?)
        .bind(serde_json::to_string(&cascade.downstream_files)?)
        .bind(cascade.repair_job_count as i64)
        .bind(&cascade.summary)
        .bind(cascade.status.to_string())
        .bind(
            cascade
                .telemetry
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(cascade.created_at)
        .bind(cascade.updated_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Rewrites a cascade row inside the caller's transaction.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the row does not exist.
    pub async fn update_cascade(tx: &mut Tx<'_>, cascade: &Cascade) -> Result<()> {
        let result = sqlx::query(
            "UPDATE cascades SET trigger_session_id = ?, core_files_changed = ?,
                 downstream_files = ?, repair_job_count = ?, summary = ?, status = ?,
                 telemetry = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(cascade.trigger_session_id.map(|id| id.to_string()))
        .bind(serde_json::to_string(&cascade.core_files_changed)?)
        .bind(serde_json::to_string(&cascade.downstream_files)?)
        .bind(cascade.repair_job_count as i64)
        .bind(&cascade.summary)
        .bind(cascade.status.to_string())
        .bind(
            cascade
                .telemetry
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
        )
        .bind(cascade.updated_at)
        .bind(cascade.id.to_string())
        .execute(&mut **tx)
        .await?;
        if result.rows_affected() == 0 {
            return Err(RegistryError::not_found("cascade", cascade.id));
        }
        Ok(())
    }

    /// Reads a cascade by ID.
    ///
    /// # Errors
    ///
    /// Returns a database or corrupt-row error.
    pub async fn cascade(&self, id: CascadeId) -> Result<Option<Cascade>> {
        let row = sqlx::query(&format!(
            "SELECT {CASCADE_COLUMNS} FROM cascades WHERE id = ?"
        ))
        .bind(id.to_string())
        .fetch_optional(self.pool())
        .await?;
        row.as_ref().map(row_to_cascade).transpose()
    }
}
