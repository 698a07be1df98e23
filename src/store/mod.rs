//! Task store: durable tasks, per-task copied marks, and the listing cache.
//!
//! Three concerns share one SQLite database:
//! - `task` rows tie a (source, target) pair to a status and the append-only
//!   root mapping that lets a resumed run reconstruct the partial
//!   destination tree.
//! - `copied` marks record every file successfully copied under a task; the
//!   resume path reads them to skip work already done.
//! - `listing` rows cache folder listings so a recount or an incremental
//!   re-copy can walk the tree without touching the remote.

mod models;

pub use models::{ListingRow, TaskRow, TaskStatus, format_mapping_record, parse_mapping};

use chrono::Utc;
use sqlx::Row;
use thiserror::Error;
use tracing::instrument;

use crate::db::Database;
use crate::remote::RemoteObject;
use crate::summary::ListingSummary;

/// Task store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An update addressed a task row that does not exist.
    #[error("task {0} not found")]
    TaskNotFound(i64),

    /// A JSON column failed to serialize or deserialize.
    #[error("corrupt JSON in store row: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Returns `Ok(())` if at least one row was affected; otherwise
/// [`StoreError::TaskNotFound`].
fn check_affected(id: i64, rows_affected: u64) -> Result<()> {
    if rows_affected == 0 {
        Err(StoreError::TaskNotFound(id))
    } else {
        Ok(())
    }
}

/// Persistent store for tasks, copied marks, and cached listings.
#[derive(Debug, Clone)]
pub struct TaskStore {
    db: Database,
}

impl TaskStore {
    /// Creates a store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Looks up the task for a (source, target) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn task_get(&self, source: &str, target: &str) -> Result<Option<TaskRow>> {
        let row = sqlx::query_as::<_, TaskRow>(
            "SELECT * FROM task WHERE source = ? AND target = ? LIMIT 1",
        )
        .bind(source)
        .bind(target)
        .fetch_optional(self.db.pool())
        .await?;
        Ok(row)
    }

    /// Inserts a new task row and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails, including when
    /// a row for the same (source, target) already exists.
    #[instrument(skip(self, mapping))]
    pub async fn task_insert(
        &self,
        source: &str,
        target: &str,
        status: TaskStatus,
        mapping: &str,
    ) -> Result<i64> {
        let row = sqlx::query(
            "INSERT INTO task (source, target, status, mapping, ctime) \
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(source)
        .bind(target)
        .bind(status)
        .bind(mapping)
        .bind(Utc::now().timestamp())
        .fetch_one(self.db.pool())
        .await?;
        Ok(row.get("id"))
    }

    /// Advances a task's status, stamping the finish time.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if no task exists with the id.
    #[instrument(skip(self))]
    pub async fn task_status_update(&self, id: i64, status: TaskStatus) -> Result<()> {
        let result = sqlx::query("UPDATE task SET status = ?, ftime = ? WHERE id = ?")
            .bind(status)
            .bind(Utc::now().timestamp())
            .bind(id)
            .execute(self.db.pool())
            .await?;
        check_affected(id, result.rows_affected())
    }

    /// Rewrites a task's status and mapping together (restart path).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if no task exists with the id.
    #[instrument(skip(self, mapping))]
    pub async fn task_update(&self, id: i64, status: TaskStatus, mapping: &str) -> Result<()> {
        let result = sqlx::query("UPDATE task SET status = ?, mapping = ? WHERE id = ?")
            .bind(status)
            .bind(mapping)
            .bind(id)
            .execute(self.db.pool())
            .await?;
        check_affected(id, result.rows_affected())
    }

    /// Appends one mapping record to a task's root mapping.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::TaskNotFound`] if no task exists with the id.
    #[instrument(skip(self, record))]
    pub async fn task_add_mapping(&self, id: i64, record: &str) -> Result<()> {
        let result = sqlx::query("UPDATE task SET mapping = mapping || ? WHERE id = ?")
            .bind(record)
            .bind(id)
            .execute(self.db.pool())
            .await?;
        check_affected(id, result.rows_affected())
    }

    /// Deletes the task for a (source, target) pair.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn task_delete(&self, source: &str, target: &str) -> Result<()> {
        sqlx::query("DELETE FROM task WHERE source = ? AND target = ?")
            .bind(source)
            .bind(target)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Returns the source file ids already copied under a task.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn copied_get(&self, task_id: i64) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT fileid FROM copied WHERE taskid = ?")
            .bind(task_id)
            .fetch_all(self.db.pool())
            .await?;
        Ok(rows.into_iter().map(|r| r.get("fileid")).collect())
    }

    /// Records a successful file copy. Re-inserting the same mark is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the insert fails.
    #[instrument(skip(self))]
    pub async fn copied_insert(&self, task_id: i64, file_id: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO copied (taskid, fileid) VALUES (?, ?)")
            .bind(task_id)
            .bind(file_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Deletes every copied mark for a task (restart path).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the delete fails.
    #[instrument(skip(self))]
    pub async fn copied_delete(&self, task_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM copied WHERE taskid = ?")
            .bind(task_id)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }

    /// Reads the cached listing for a folder.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn listing_get(&self, fid: &str) -> Result<Option<ListingRow>> {
        let row = sqlx::query_as::<_, ListingRow>("SELECT * FROM listing WHERE fid = ? LIMIT 1")
            .bind(fid)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row)
    }

    /// True when a cached listing exists for the folder.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the query fails.
    #[instrument(skip(self))]
    pub async fn listing_exists(&self, fid: &str) -> Result<bool> {
        let row = sqlx::query("SELECT fid FROM listing WHERE fid = ? LIMIT 1")
            .bind(fid)
            .fetch_optional(self.db.pool())
            .await?;
        Ok(row.is_some())
    }

    /// Writes (or refreshes) the cached listing for a folder.
    ///
    /// The subfolder column is derived here so it always stays the
    /// folder-kind subset of the children column.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Json`] on serialization failure or
    /// [`StoreError::Database`] if the write fails.
    #[instrument(skip(self, children), fields(count = children.len()))]
    pub async fn listing_put(&self, fid: &str, children: &[RemoteObject]) -> Result<()> {
        let subfolder_ids: Vec<&str> = children
            .iter()
            .filter(|c| c.is_folder())
            .map(|c| c.id.as_str())
            .collect();
        let info = serde_json::to_string(children)?;
        let subf = serde_json::to_string(&subfolder_ids)?;
        let now = Utc::now().timestamp();

        sqlx::query(
            "INSERT INTO listing (fid, info, subf, ctime) VALUES (?, ?, ?, ?) \
             ON CONFLICT(fid) DO UPDATE SET info = excluded.info, subf = excluded.subf, mtime = ?",
        )
        .bind(fid)
        .bind(info)
        .bind(subf)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Stores (or clears, with `None`) the subtree summary on a listing row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Json`] on serialization failure or
    /// [`StoreError::Database`] if the write fails.
    #[instrument(skip(self, summary))]
    pub async fn listing_put_summary(
        &self,
        fid: &str,
        summary: Option<&ListingSummary>,
    ) -> Result<()> {
        let json = match summary {
            Some(s) => Some(serde_json::to_string(s)?),
            None => None,
        };
        sqlx::query("UPDATE listing SET summary = ?, mtime = ? WHERE fid = ?")
            .bind(json)
            .bind(Utc::now().timestamp())
            .bind(fid)
            .execute(self.db.pool())
            .await?;
        Ok(())
    }
}
