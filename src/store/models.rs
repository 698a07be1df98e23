//! Row types for the task store.

use sqlx::FromRow;

use crate::remote::RemoteObject;
use crate::summary::ListingSummary;

/// Lifecycle state of a copy task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
pub enum TaskStatus {
    /// The task has started and has not reached a terminal state. A crashed
    /// run leaves its row in this state, which is what makes it resumable.
    Copying,
    /// Every file in the batch copied successfully.
    Finished,
    /// At least one file failed, or setup hit a fatal error.
    Error,
}

impl TaskStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Copying => "copying",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }
}

/// One copy task: a (source, target) pair plus accumulated progress.
#[derive(Debug, Clone, FromRow)]
pub struct TaskRow {
    pub id: i64,
    pub source: String,
    pub target: String,
    pub status: TaskStatus,
    /// Newline-delimited `"<srcId> <dstId>"` pairs, append-only while the
    /// task runs. The first pair maps the source root to the destination
    /// root created for this task.
    pub mapping: String,
    pub ctime: i64,
    pub ftime: Option<i64>,
}

impl TaskRow {
    /// Parses the persisted mapping text into (source, destination) pairs.
    #[must_use]
    pub fn mapping_pairs(&self) -> Vec<(String, String)> {
        parse_mapping(&self.mapping)
    }
}

/// Cached listing of one folder's direct children.
#[derive(Debug, Clone, FromRow)]
pub struct ListingRow {
    pub fid: String,
    /// JSON array of [`RemoteObject`].
    pub info: String,
    /// JSON array of the folder-kind child identifiers, a subset of `info`.
    pub subf: String,
    /// JSON roll-up of the whole subtree, present only on walked roots.
    pub summary: Option<String>,
    pub ctime: i64,
    pub mtime: Option<i64>,
}

impl ListingRow {
    /// Deserializes the cached children.
    ///
    /// # Errors
    ///
    /// Returns the JSON error if the row predates the current schema or was
    /// corrupted externally.
    pub fn children(&self) -> Result<Vec<RemoteObject>, serde_json::Error> {
        serde_json::from_str(&self.info)
    }

    /// Deserializes the cached subfolder identifiers.
    ///
    /// # Errors
    ///
    /// Returns the JSON error on a corrupt column.
    pub fn subfolder_ids(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.subf)
    }

    /// Deserializes the stored summary, if one was written.
    #[must_use]
    pub fn stored_summary(&self) -> Option<ListingSummary> {
        self.summary
            .as_deref()
            .filter(|s| !s.is_empty())
            .and_then(|s| serde_json::from_str(s).ok())
    }
}

/// Formats one append-only mapping record.
#[must_use]
pub fn format_mapping_record(src_id: &str, dst_id: &str) -> String {
    format!("{src_id} {dst_id}\n")
}

/// Parses mapping text back into (source, destination) pairs.
///
/// Tolerates trailing newlines and blank lines; a line without two fields is
/// skipped.
#[must_use]
pub fn parse_mapping(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            match (fields.next(), fields.next()) {
                (Some(src), Some(dst)) => Some((src.to_owned(), dst.to_owned())),
                _ => None,
            }
        })
        .collect()
}
