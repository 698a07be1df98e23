//! Parallel file copier with per-file completion marks.
//!
//! Every file copy resolves its destination parent from the completed
//! source-to-destination map (falling back to the destination root), issues
//! the server-side copy through the envelope, and records a copied mark on
//! success. One file failing does not abort its siblings; it marks the task
//! errored and is reported in the outcome.
//!
//! Deduplication on resume is the caller's job: the coordinator filters the
//! input set against the stored marks before handing it here.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::status::{Counter, StatusKind, spawn_status_line};
use super::{RemoteCaller, TransferError};
use crate::remote::RemoteObject;
use crate::store::{TaskStatus, TaskStore};

/// What a copy batch accomplished.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CopyOutcome {
    /// Files copied and marked.
    pub copied: usize,
    /// Files that failed terminally.
    pub failed: usize,
}

/// Fan-out copier for the file set of one task.
#[derive(Debug, Clone)]
pub struct FileCopier {
    caller: Arc<RemoteCaller>,
    store: TaskStore,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl FileCopier {
    #[must_use]
    pub fn new(
        caller: Arc<RemoteCaller>,
        store: TaskStore,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            caller,
            store,
            semaphore,
            cancel,
        }
    }

    /// Copies `files` into their mapped destination folders.
    ///
    /// # Errors
    ///
    /// Only cancellation aborts the batch; individual failures are counted
    /// in the returned outcome.
    #[instrument(skip_all, fields(files = files.len(), task_id))]
    pub async fn copy_files(
        &self,
        files: &[RemoteObject],
        mapping: &HashMap<String, RemoteObject>,
        dest_root: &RemoteObject,
        task_id: i64,
    ) -> Result<CopyOutcome, TransferError> {
        if files.is_empty() {
            return Ok(CopyOutcome::default());
        }
        info!(total = files.len(), "copying files");

        let copied = Arc::new(AtomicUsize::new(0));
        let failed = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(Counter::new());
        let pending = Arc::new(Counter::new());
        pending.set(files.len() as i64);

        let status_cancel = self.cancel.child_token();
        let status = spawn_status_line(
            status_cancel.clone(),
            Arc::clone(&done),
            Arc::clone(&pending),
            StatusKind::CopyFiles,
        );

        let mut tasks: JoinSet<Result<(), TransferError>> = JoinSet::new();
        for file in files {
            if file.id.is_empty() {
                pending.dec();
                continue;
            }
            let dest_parent = file
                .parent
                .as_ref()
                .and_then(|parent| mapping.get(parent))
                .filter(|dest| !dest.id.is_empty())
                .unwrap_or(dest_root)
                .id
                .clone();
            tasks.spawn(self.copy_one(
                file.clone(),
                dest_parent,
                task_id,
                Arc::clone(&copied),
                Arc::clone(&failed),
                Arc::clone(&done),
                Arc::clone(&pending),
            ));
        }

        // Drain fully even on cancellation so no worker is torn away from a
        // checked-out credential.
        let mut batch_error: Option<TransferError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(join_error) if join_error.is_cancelled() => continue,
                Err(join_error) => Err(TransferError::Worker(join_error.to_string())),
            };
            if let Err(error) = outcome {
                batch_error.get_or_insert(error);
            }
        }

        status_cancel.cancel();
        let _ = status.await;
        if let Some(error) = batch_error {
            return Err(error);
        }

        let outcome = CopyOutcome {
            copied: copied.load(Ordering::SeqCst),
            failed: failed.load(Ordering::SeqCst),
        };
        info!(copied = outcome.copied, failed = outcome.failed, "file copy batch complete");
        Ok(outcome)
    }

    /// One file copy. Failures other than cancellation are absorbed here:
    /// logged, counted, and reflected on the task status.
    #[allow(clippy::too_many_arguments)]
    fn copy_one(
        &self,
        file: RemoteObject,
        dest_parent: String,
        task_id: i64,
        copied: Arc<AtomicUsize>,
        failed: Arc<AtomicUsize>,
        done: Arc<Counter>,
        pending: Arc<Counter>,
    ) -> impl std::future::Future<Output = Result<(), TransferError>> + Send + 'static {
        let caller = Arc::clone(&self.caller);
        let store = self.store.clone();
        let semaphore = Arc::clone(&self.semaphore);
        async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| TransferError::Worker("semaphore closed".to_owned()))?;

            let result = caller.copy_file(&file.id, &dest_parent).await;
            pending.dec();
            match result {
                Ok(_) => {
                    copied.fetch_add(1, Ordering::SeqCst);
                    done.inc();
                    if let Err(error) = store.copied_insert(task_id, &file.id).await {
                        warn!(file = %file.id, %error, "failed to record copied mark");
                    }
                    Ok(())
                }
                Err(TransferError::Cancelled) => Err(TransferError::Cancelled),
                Err(error) => {
                    warn!(file = %file.id, name = %file.name, %error, "file copy failed");
                    failed.fetch_add(1, Ordering::SeqCst);
                    if let Err(error) = store.task_status_update(task_id, TaskStatus::Error).await {
                        warn!(task_id, %error, "failed to mark task errored");
                    }
                    Ok(())
                }
            }
        }
    }
}
