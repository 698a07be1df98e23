//! Level-by-level folder replication.
//!
//! A child folder can only be created once its parent exists at the
//! destination, so replication walks the folder set breadth-first: every
//! folder in a level is created concurrently, the level is joined, and only
//! then does the next level start. That is the minimal ordering that keeps
//! parents first while preserving full parallelism within a level.
//!
//! Each creation appends its `(source, destination)` pair to the task's
//! durable root mapping so an interrupted run can resume against the partial
//! destination tree.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use super::status::{Counter, StatusKind, spawn_status_line};
use super::{RemoteCaller, TransferError};
use crate::remote::RemoteObject;
use crate::store::{TaskStore, format_mapping_record};

type SharedMapping = Arc<Mutex<HashMap<String, RemoteObject>>>;

fn lock_mapping(mapping: &SharedMapping) -> std::sync::MutexGuard<'_, HashMap<String, RemoteObject>> {
    mapping.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Creates the destination folder tree and builds the source-to-destination
/// map consumed by the file copier.
#[derive(Debug, Clone)]
pub struct FolderReplicator {
    caller: Arc<RemoteCaller>,
    store: TaskStore,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl FolderReplicator {
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

    /// Replicates `folders` under `dest_root`, returning the completed
    /// source-id to destination-object map.
    ///
    /// `old_mapping` overlays mappings recovered from a previous run;
    /// folders already mapped are not created again.
    ///
    /// # Errors
    ///
    /// A folder creation failure is fatal to its level: all of the missing
    /// parent's descendants would be orphaned, so the error propagates.
    #[instrument(skip_all, fields(folders = folders.len(), task_id))]
    pub async fn replicate(
        &self,
        source_root: &str,
        old_mapping: Option<HashMap<String, RemoteObject>>,
        folders: &[RemoteObject],
        dest_root: &RemoteObject,
        task_id: i64,
    ) -> Result<HashMap<String, RemoteObject>, TransferError> {
        let mut seed = old_mapping.unwrap_or_default();
        seed.insert(source_root.to_owned(), dest_root.clone());
        let mapping: SharedMapping = Arc::new(Mutex::new(seed));

        if folders.is_empty() {
            return Ok(unwrap_mapping(mapping));
        }

        let missing = folders
            .iter()
            .filter(|f| !lock_mapping(&mapping).contains_key(&f.id))
            .count();
        info!(total = missing, "creating destination folders");

        let created = Arc::new(Counter::new());
        let pending = Arc::new(Counter::new());
        pending.set(folders.len() as i64);
        let status_cancel = self.cancel.child_token();
        let status = spawn_status_line(
            status_cancel.clone(),
            Arc::clone(&created),
            Arc::clone(&pending),
            StatusKind::CreateFolders,
        );

        let result = self
            .replicate_levels(source_root, folders, dest_root, task_id, &mapping, &created, &pending)
            .await;

        status_cancel.cancel();
        let _ = status.await;
        result?;

        Ok(unwrap_mapping(mapping))
    }

    #[allow(clippy::too_many_arguments)]
    async fn replicate_levels(
        &self,
        source_root: &str,
        folders: &[RemoteObject],
        dest_root: &RemoteObject,
        task_id: i64,
        mapping: &SharedMapping,
        created: &Arc<Counter>,
        pending: &Arc<Counter>,
    ) -> Result<(), TransferError> {
        let mut level: Vec<RemoteObject> = folders
            .iter()
            .filter(|f| f.parent.as_deref() == Some(source_root))
            .cloned()
            .collect();

        while !level.is_empty() {
            let to_create: Vec<RemoteObject> = {
                let guard = lock_mapping(mapping);
                level
                    .iter()
                    .filter(|f| !guard.contains_key(&f.id))
                    .cloned()
                    .collect()
            };

            let mut tasks: JoinSet<Result<(), TransferError>> = JoinSet::new();
            for folder in to_create {
                tasks.spawn(self.create_one(
                    folder,
                    dest_root.clone(),
                    task_id,
                    Arc::clone(mapping),
                    Arc::clone(created),
                    Arc::clone(pending),
                ));
            }

            // Drain the level fully even on error: aborting could tear a
            // worker away from a checked-out credential.
            let mut level_error: Option<TransferError> = None;
            while let Some(joined) = tasks.join_next().await {
                let outcome = match joined {
                    Ok(outcome) => outcome,
                    Err(join_error) if join_error.is_cancelled() => continue,
                    Err(join_error) => Err(TransferError::Worker(join_error.to_string())),
                };
                if let Err(error) = outcome {
                    level_error.get_or_insert(error);
                }
            }
            if let Some(error) = level_error {
                return Err(error);
            }

            let level_ids: HashSet<&str> = level.iter().map(|f| f.id.as_str()).collect();
            level = folders
                .iter()
                .filter(|f| {
                    f.parent
                        .as_deref()
                        .is_some_and(|parent| level_ids.contains(parent))
                })
                .cloned()
                .collect();
        }
        Ok(())
    }

    /// One folder creation: resolve the destination parent from the map
    /// (falling back to the destination root), create, record.
    fn create_one(
        &self,
        folder: RemoteObject,
        dest_root: RemoteObject,
        task_id: i64,
        mapping: SharedMapping,
        created: Arc<Counter>,
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

            let dest_parent = {
                let guard = lock_mapping(&mapping);
                folder
                    .parent
                    .as_ref()
                    .and_then(|parent| guard.get(parent))
                    .map(|dest| dest.id.clone())
            };
            let dest_parent = match dest_parent {
                Some(id) => id,
                None => {
                    // Best-effort recovery for malformed input: a folder with
                    // no replicated parent lands under the destination root.
                    warn!(
                        folder = %folder.id,
                        name = %folder.name,
                        "parent not replicated, attaching to destination root"
                    );
                    dest_root.id.clone()
                }
            };

            let new_folder = caller.create_folder(&dest_parent, &folder.name).await?;
            created.inc();
            pending.dec();

            let record = format_mapping_record(&folder.id, &new_folder.id);
            lock_mapping(&mapping).insert(folder.id.clone(), new_folder);

            if let Err(error) = store.task_add_mapping(task_id, &record).await {
                warn!(folder = %folder.id, %error, "failed to persist mapping record");
            }
            Ok(())
        }
    }
}

fn unwrap_mapping(mapping: SharedMapping) -> HashMap<String, RemoteObject> {
    match Arc::try_unwrap(mapping) {
        Ok(inner) => inner.into_inner().unwrap_or_else(std::sync::PoisonError::into_inner),
        Err(shared) => lock_mapping(&shared).clone(),
    }
}
