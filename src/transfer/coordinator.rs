//! The task coordinator: ties a (source, target) pair to durable progress.
//!
//! State machine per pair: `Absent -> Copying -> Finished | Error`. A crash
//! leaves the row in `Copying`; the next copy request for the same pair asks
//! the resume prompt whether to continue against the persisted mapping,
//! restart under a fresh destination root, or leave everything alone.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::walker::{WalkOptions, Walker};
use super::{FileCopier, FolderReplicator, RemoteCaller, TransferError};
use crate::remote::{FieldSelection, RemoteObject};
use crate::store::{TaskRow, TaskStatus, TaskStore, format_mapping_record};

/// Decision taken when a copy request finds an existing task row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeChoice {
    /// Keep the persisted destination tree; copy only unmarked files.
    Continue,
    /// New destination root; every mark is dropped and recopied.
    Restart,
    /// Leave the task untouched.
    Exit,
}

/// Supplies the resume decision. The interactive prompt lives in the CLI;
/// scripted runs and tests answer with a fixed choice.
pub trait ResumePrompt: Send + Sync {
    fn choose(&self) -> ResumeChoice;
}

impl ResumePrompt for ResumeChoice {
    fn choose(&self) -> ResumeChoice {
        *self
    }
}

/// Options shaping one copy request.
#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    /// Rename the new destination root; defaults to the source's name.
    pub name: Option<String>,
    /// Skip files smaller than this many bytes.
    pub min_size: i64,
    /// Refresh cached listings while walking.
    pub update: bool,
    /// Do not create a new root: copy directly into the target folder.
    pub dncr: bool,
    /// The source is not a shared drive.
    pub not_team_drive: bool,
}

/// Result of a completed copy request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyReport {
    /// Task row the run was recorded under; zero for single-file copies,
    /// which bypass the task machinery.
    pub task_id: i64,
    /// Destination root the tree was copied under.
    pub dest_root_id: String,
    /// Folders in the source set.
    pub folders: usize,
    /// Files attempted this run (after resume filtering).
    pub files: usize,
    /// Files copied this run.
    pub copied: usize,
    /// Files that failed terminally.
    pub failed: usize,
}

/// Owns the resume state machine and drives walker, replicator, and copier.
#[derive(Debug, Clone)]
pub struct TaskCoordinator {
    caller: Arc<RemoteCaller>,
    store: TaskStore,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    page_size: i64,
}

impl TaskCoordinator {
    #[must_use]
    pub fn new(
        caller: Arc<RemoteCaller>,
        store: TaskStore,
        semaphore: Arc<Semaphore>,
        cancel: CancellationToken,
        page_size: i64,
    ) -> Self {
        Self {
            caller,
            store,
            semaphore,
            cancel,
            page_size,
        }
    }

    /// Handles one copy request.
    ///
    /// Returns `None` when the user chose to leave an existing task alone.
    /// On failure the task row (if any) is advanced to `Error`, except on
    /// cancellation, which leaves it `Copying` and therefore resumable.
    ///
    /// # Errors
    ///
    /// Surfaces the first fatal error from any phase.
    #[instrument(skip(self, options, prompt))]
    pub async fn copy(
        &self,
        source: &str,
        target: &str,
        options: &CopyOptions,
        prompt: &dyn ResumePrompt,
    ) -> Result<Option<CopyReport>, TransferError> {
        let source_info = self.caller.get_file(source, FieldSelection::Core).await?;

        if !source_info.is_folder() {
            debug!("source is a single file");
            let copied = self.caller.copy_file(source, target).await?;
            return Ok(Some(CopyReport {
                task_id: 0,
                dest_root_id: copied.parent.unwrap_or_else(|| target.to_owned()),
                folders: 0,
                files: 1,
                copied: 1,
                failed: 0,
            }));
        }

        let result = self.run_tree_copy(source, target, options, prompt).await;
        if let Err(error) = &result {
            if !matches!(error, TransferError::Cancelled) {
                warn!(%error, "copy request failed");
                if let Ok(Some(task)) = self.store.task_get(source, target).await {
                    if let Err(store_error) =
                        self.store.task_status_update(task.id, TaskStatus::Error).await
                    {
                        warn!(%store_error, "failed to mark task errored");
                    }
                }
            }
        }
        result
    }

    async fn run_tree_copy(
        &self,
        source: &str,
        target: &str,
        options: &CopyOptions,
        prompt: &dyn ResumePrompt,
    ) -> Result<Option<CopyReport>, TransferError> {
        match self.store.task_get(source, target).await? {
            None => {
                debug!("no existing task for pair, starting fresh");
                self.fresh_copy(source, target, options).await.map(Some)
            }
            Some(task) => match prompt.choose() {
                ResumeChoice::Exit => {
                    debug!(task_id = task.id, "existing task left untouched");
                    Ok(None)
                }
                ResumeChoice::Continue => {
                    info!(task_id = task.id, "resuming existing task");
                    self.resume_copy(&task, source, options).await.map(Some)
                }
                ResumeChoice::Restart => {
                    info!(task_id = task.id, "restarting existing task");
                    self.restart_copy(&task, source, target, options).await.map(Some)
                }
            },
        }
    }

    async fn fresh_copy(
        &self,
        source: &str,
        target: &str,
        options: &CopyOptions,
    ) -> Result<CopyReport, TransferError> {
        let dest_root = self.new_dest_root(source, target, options).await?;
        let task_id = self
            .store
            .task_insert(
                source,
                target,
                TaskStatus::Copying,
                &format_mapping_record(source, &dest_root.id),
            )
            .await?;
        self.execute(source, task_id, dest_root, None, &HashSet::new(), options)
            .await
    }

    /// Continue path. The persisted mapping text is re-parsed; its first row
    /// names the destination root the interrupted run was copying into, and
    /// the remaining rows seed the replicator so existing destination
    /// folders are reused instead of recreated.
    async fn resume_copy(
        &self,
        task: &TaskRow,
        source: &str,
        options: &CopyOptions,
    ) -> Result<CopyReport, TransferError> {
        let copied: HashSet<String> = self.store.copied_get(task.id).await?.into_iter().collect();

        let pairs = task.mapping_pairs();
        let Some((_, root_id)) = pairs.first() else {
            return Err(TransferError::MissingMapping(task.id));
        };
        let dest_root = RemoteObject::folder_ref(root_id.clone());
        let old_mapping: HashMap<String, RemoteObject> = pairs
            .iter()
            .map(|(src, dst)| (src.clone(), RemoteObject::folder_ref(dst.clone())))
            .collect();

        debug!(
            task_id = task.id,
            copied = copied.len(),
            mapped = old_mapping.len(),
            "recovered resume state"
        );
        self.store.task_status_update(task.id, TaskStatus::Copying).await?;
        self.execute(source, task.id, dest_root, Some(old_mapping), &copied, options)
            .await
    }

    async fn restart_copy(
        &self,
        task: &TaskRow,
        source: &str,
        target: &str,
        options: &CopyOptions,
    ) -> Result<CopyReport, TransferError> {
        let dest_root = self.new_dest_root(source, target, options).await?;
        self.store
            .task_update(
                task.id,
                TaskStatus::Copying,
                &format_mapping_record(source, &dest_root.id),
            )
            .await?;
        self.store.copied_delete(task.id).await?;
        self.execute(source, task.id, dest_root, None, &HashSet::new(), options)
            .await
    }

    /// Walk, replicate, copy - the common spine of all three entry paths.
    async fn execute(
        &self,
        source: &str,
        task_id: i64,
        dest_root: RemoteObject,
        old_mapping: Option<HashMap<String, RemoteObject>>,
        already_copied: &HashSet<String>,
        options: &CopyOptions,
    ) -> Result<CopyReport, TransferError> {
        let walker = Walker::new(
            Arc::clone(&self.caller),
            self.store.clone(),
            Arc::clone(&self.semaphore),
            self.cancel.clone(),
        );
        let listing = walker
            .walk(
                source,
                &WalkOptions {
                    update: options.update,
                    not_team_drive: options.not_team_drive,
                    with_modified: false,
                    page_size: self.page_size,
                },
            )
            .await?;

        let folders: Vec<RemoteObject> =
            listing.iter().filter(|o| o.is_folder()).cloned().collect();
        let files: Vec<RemoteObject> = listing
            .iter()
            .filter(|o| !o.is_folder())
            .filter(|o| options.min_size <= 0 || o.size >= options.min_size)
            .filter(|o| !already_copied.contains(&o.id))
            .cloned()
            .collect();
        info!(
            folders = folders.len(),
            files = files.len(),
            skipped = already_copied.len(),
            "source set resolved"
        );

        let replicator = FolderReplicator::new(
            Arc::clone(&self.caller),
            self.store.clone(),
            Arc::clone(&self.semaphore),
            self.cancel.clone(),
        );
        let mapping = replicator
            .replicate(source, old_mapping, &folders, &dest_root, task_id)
            .await?;

        let copier = FileCopier::new(
            Arc::clone(&self.caller),
            self.store.clone(),
            Arc::clone(&self.semaphore),
            self.cancel.clone(),
        );
        let outcome = copier.copy_files(&files, &mapping, &dest_root, task_id).await?;

        if outcome.failed == 0 {
            self.store.task_status_update(task_id, TaskStatus::Finished).await?;
        }

        Ok(CopyReport {
            task_id,
            dest_root_id: dest_root.id,
            folders: folders.len(),
            files: files.len(),
            copied: outcome.copied,
            failed: outcome.failed,
        })
    }

    /// Resolves the destination root for a fresh or restarted task.
    async fn new_dest_root(
        &self,
        source: &str,
        target: &str,
        options: &CopyOptions,
    ) -> Result<RemoteObject, TransferError> {
        if options.dncr {
            return Ok(RemoteObject::folder_ref(target));
        }
        let name = match &options.name {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.source_name(source).await?,
        };
        self.caller.create_folder(target, &name).await
    }

    /// The source's display name: its own name, the drive name when the
    /// source is a shared-drive root, or the raw identifier as a last
    /// resort.
    async fn source_name(&self, source: &str) -> Result<String, TransferError> {
        let info = self.caller.get_file(source, FieldSelection::Core).await?;
        if !info.name.is_empty() {
            return Ok(info.name);
        }
        if info.team_drive_id.as_deref() == Some(info.id.as_str()) {
            info!("source is a shared drive root");
            return Ok(self.caller.get_drive(source).await?.name);
        }
        Ok(source.to_owned())
    }
}
