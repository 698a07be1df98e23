//! Bounded-parallel directory walker with a write-through listing cache.
//!
//! The walk fans one listing task out per discovered folder. Unless a
//! refresh is forced, a folder already present in the cache is served from
//! it without a remote call; every remote listing is written back through
//! the cache. The output is an unordered flat set of all descendants -
//! ordering is imposed downstream by the replicator.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::status::{Counter, StatusKind, spawn_status_line};
use super::{RemoteCaller, TransferError};
use crate::remote::{ListQuery, RemoteObject};
use crate::store::{StoreError, TaskStore};
use crate::summary::{SummarySort, summarize};

/// Flags shaping one walk.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Bypass the cache on read; every folder is re-listed remotely.
    pub update: bool,
    /// The source is not a shared drive; use the cheaper list query.
    pub not_team_drive: bool,
    /// Request modified timestamps for every child.
    pub with_modified: bool,
    /// Page size for list calls, already capped.
    pub page_size: i64,
}

/// Parallel traversal of a source folder.
#[derive(Debug, Clone)]
pub struct Walker {
    caller: Arc<RemoteCaller>,
    store: TaskStore,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Walker {
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

    /// Walks the subtree under `root` and returns every descendant.
    ///
    /// After the traversal quiesces, a roll-up summary of the full result is
    /// stored on the root's listing row.
    ///
    /// # Errors
    ///
    /// Returns the first listing or store error; in-flight siblings are
    /// aborted.
    #[instrument(skip(self, options), fields(update = options.update))]
    pub async fn walk(
        &self,
        root: &str,
        options: &WalkOptions,
    ) -> Result<Vec<RemoteObject>, TransferError> {
        let started = std::time::Instant::now();

        if options.update && self.store.listing_exists(root).await? {
            debug!("refreshing cached subtree, clearing stale summary");
            if let Err(error) = self.store.listing_put_summary(root, None).await {
                warn!(%error, "failed to clear stored summary");
            }
        }

        let read = Arc::new(Counter::new());
        let pending = Arc::new(Counter::new());
        let status_cancel = self.cancel.child_token();
        let status = spawn_status_line(
            status_cancel.clone(),
            Arc::clone(&read),
            Arc::clone(&pending),
            StatusKind::Walk,
        );

        let mut tasks: JoinSet<Result<Vec<RemoteObject>, TransferError>> = JoinSet::new();
        let mut results: Vec<RemoteObject> = Vec::new();
        let mut first_error: Option<TransferError> = None;
        self.spawn_list(&mut tasks, root.to_owned(), options, &pending);

        // On error, stop spawning and drain what is already in flight; an
        // abort could tear a worker away from a checked-out credential.
        while let Some(joined) = tasks.join_next().await {
            let children = match joined {
                Ok(Ok(children)) => children,
                Ok(Err(error)) => {
                    first_error.get_or_insert(error);
                    continue;
                }
                Err(join_error) if join_error.is_cancelled() => continue,
                Err(join_error) => {
                    first_error.get_or_insert(TransferError::Worker(join_error.to_string()));
                    continue;
                }
            };

            read.add(children.len() as i64);
            if first_error.is_none() {
                for child in &children {
                    if child.is_folder() && !self.cancel.is_cancelled() {
                        self.spawn_list(&mut tasks, child.id.clone(), options, &pending);
                    }
                }
            }
            results.extend(children);
        }

        status_cancel.cancel();
        let _ = status.await;
        if let Some(error) = first_error {
            return Err(error);
        }

        let summary = summarize(&results, SummarySort::default());
        if !summary.is_empty() {
            if let Err(error) = self.store.listing_put_summary(root, Some(&summary)).await {
                warn!(%error, "failed to store walk summary");
            }
        }

        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            count = results.len(),
            "walk complete"
        );
        Ok(results)
    }

    fn spawn_list(
        &self,
        tasks: &mut JoinSet<Result<Vec<RemoteObject>, TransferError>>,
        folder: String,
        options: &WalkOptions,
        pending: &Arc<Counter>,
    ) {
        pending.inc();
        let caller = Arc::clone(&self.caller);
        let store = self.store.clone();
        let semaphore = Arc::clone(&self.semaphore);
        let cancel = self.cancel.clone();
        let options = options.clone();
        let pending = Arc::clone(pending);
        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| TransferError::Worker("semaphore closed".to_owned()))?;
            let result = list_one(&caller, &store, &folder, &options, &cancel).await;
            pending.dec();
            result
        });
    }
}

/// Lists one folder, consulting and feeding the cache per the walk options.
async fn list_one(
    caller: &RemoteCaller,
    store: &TaskStore,
    folder: &str,
    options: &WalkOptions,
    cancel: &CancellationToken,
) -> Result<Vec<RemoteObject>, TransferError> {
    if cancel.is_cancelled() {
        return Err(TransferError::Cancelled);
    }

    if !options.update {
        if let Some(row) = store.listing_get(folder).await? {
            debug!(folder, "listing served from cache");
            return row.children().map_err(|e| StoreError::Json(e).into());
        }
    }

    let query = ListQuery::children_of(
        folder,
        options.not_team_drive,
        options.with_modified,
        options.page_size,
    );
    let children = caller.list_children(query).await?;
    if let Err(error) = store.listing_put(folder, &children).await {
        warn!(folder, %error, "failed to cache listing");
    }
    Ok(children)
}

/// Reads a whole cached subtree without touching the remote.
///
/// Each child's parent is normalized to the row it was read from. Subtrees
/// whose rows are missing (a partially-walked cache) are skipped with a
/// debug log rather than failing the read.
///
/// # Errors
///
/// Returns [`StoreError`] on database failures or corrupt rows.
pub async fn collect_cached(
    store: &TaskStore,
    root: &str,
) -> Result<Vec<RemoteObject>, StoreError> {
    let mut results = Vec::new();
    let mut queue = VecDeque::from([root.to_owned()]);

    while let Some(fid) = queue.pop_front() {
        let Some(row) = store.listing_get(&fid).await? else {
            debug!(%fid, "cached subtree incomplete, skipping branch");
            continue;
        };
        let mut children = row.children()?;
        for child in &mut children {
            child.parent = Some(fid.clone());
        }
        queue.extend(row.subfolder_ids()?);
        results.extend(children);
    }
    Ok(results)
}
