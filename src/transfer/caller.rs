//! The call envelope: one retry loop shared by every remote operation.
//!
//! Each attempt checks the credential out of the pool, waits for a rate-gate
//! slot, runs the operation, and reacts to the classified outcome:
//!
//! - rate limit: the identity is exhausted, discard it and rotate to the
//!   next credential immediately;
//! - backend error or timeout: the identity is fine, return it and retry
//!   the request after a backoff;
//! - anything else terminal: return the credential and surface the error.
//!
//! Every checkout is paired with exactly one release or discard, including
//! on cancellation (the credential is still valid, so it goes back hot).

use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use super::TransferError;
use crate::auth::{Credential, CredentialPool};
use crate::remote::{
    ApiError, Drive, ErrorClass, FieldSelection, ListQuery, RemoteObject, RemoteStore, classify,
};
use crate::transfer::RateGate;

/// Base delay before the first backend/timeout retry.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Backoff ceiling.
const BACKOFF_MAX: Duration = Duration::from_secs(32);

/// Maximum jitter added to each backoff.
const BACKOFF_JITTER_MS: u64 = 250;

/// Exponential backoff with jitter for retry attempt `attempt` (0-indexed).
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(BACKOFF_MAX);
    let jitter = rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS);
    exp + Duration::from_millis(jitter)
}

/// Credential-rotating retry wrapper around a [`RemoteStore`].
#[derive(Clone)]
pub struct RemoteCaller {
    store: Arc<dyn RemoteStore>,
    pool: Arc<CredentialPool>,
    gate: Arc<RateGate>,
    retry_limit: u32,
    cancel: CancellationToken,
}

impl std::fmt::Debug for RemoteCaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteCaller")
            .field("retry_limit", &self.retry_limit)
            .finish_non_exhaustive()
    }
}

impl RemoteCaller {
    #[must_use]
    pub fn new(
        store: Arc<dyn RemoteStore>,
        pool: Arc<CredentialPool>,
        gate: Arc<RateGate>,
        retry_limit: u32,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            pool,
            gate,
            retry_limit,
            cancel,
        }
    }

    /// The cancellation token governing this caller.
    #[must_use]
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The retry loop itself. `attempt_fn` builds one attempt future from a
    /// checked-out credential; it runs at most `retry_limit + 1` times.
    async fn call<T>(
        &self,
        op: &'static str,
        attempt_fn: impl Fn(Credential) -> BoxFuture<'static, Result<T, ApiError>>,
    ) -> Result<T, TransferError>
    where
        T: Send + 'static,
    {
        for attempt in 0..=self.retry_limit {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let cred = tokio::select! {
                res = self.pool.acquire() => res?,
                () = self.cancel.cancelled() => return Err(TransferError::Cancelled),
            };

            tokio::select! {
                () = self.gate.take() => {}
                () = self.cancel.cancelled() => {
                    self.pool.release(cred);
                    return Err(TransferError::Cancelled);
                }
            }

            let error = match attempt_fn(cred.clone()).await {
                Ok(value) => {
                    self.pool.release(cred);
                    return Ok(value);
                }
                Err(error) => error,
            };

            match classify(&error, &self.cancel) {
                ErrorClass::RateLimit => {
                    debug!(op, attempt, principal = %cred.principal, "identity throttled, rotating");
                    self.pool.discard(cred);
                }
                ErrorClass::Backend | ErrorClass::Timeout => {
                    warn!(op, attempt, %error, "transient failure, will retry");
                    self.pool.release(cred);
                    self.sleep_backoff(attempt).await?;
                }
                ErrorClass::Cancelled => {
                    self.pool.release(cred);
                    return Err(TransferError::Cancelled);
                }
                ErrorClass::NotFound | ErrorClass::BadRequest | ErrorClass::Unknown => {
                    self.pool.release(cred);
                    return Err(error.into());
                }
            }
        }
        Err(TransferError::Exhausted { op })
    }

    /// Backoff sleep that aborts promptly on cancellation.
    async fn sleep_backoff(&self, attempt: u32) -> Result<(), TransferError> {
        tokio::select! {
            () = tokio::time::sleep(backoff_delay(attempt)) => Ok(()),
            () = self.cancel.cancelled() => Err(TransferError::Cancelled),
        }
    }

    /// Fetches a shared drive.
    ///
    /// # Errors
    ///
    /// Terminal [`TransferError`] after local recovery is spent.
    #[instrument(skip(self))]
    pub async fn get_drive(&self, id: &str) -> Result<Drive, TransferError> {
        let store = Arc::clone(&self.store);
        let id = id.to_owned();
        self.call("drives.get", move |cred| {
            let store = Arc::clone(&store);
            let id = id.clone();
            async move { store.get_drive(&cred, &id).await }.boxed()
        })
        .await
    }

    /// Fetches a single object.
    ///
    /// # Errors
    ///
    /// Terminal [`TransferError`] after local recovery is spent.
    #[instrument(skip(self))]
    pub async fn get_file(
        &self,
        id: &str,
        fields: FieldSelection,
    ) -> Result<RemoteObject, TransferError> {
        let store = Arc::clone(&self.store);
        let id = id.to_owned();
        self.call("files.get", move |cred| {
            let store = Arc::clone(&store);
            let id = id.clone();
            async move { store.get_file(&cred, &id, fields).await }.boxed()
        })
        .await
    }

    /// Lists a folder's direct children across all pages.
    ///
    /// # Errors
    ///
    /// Terminal [`TransferError`] after local recovery is spent.
    #[instrument(skip(self, query), fields(parent = %query.parent))]
    pub async fn list_children(&self, query: ListQuery) -> Result<Vec<RemoteObject>, TransferError> {
        let store = Arc::clone(&self.store);
        self.call("files.list", move |cred| {
            let store = Arc::clone(&store);
            let query = query.clone();
            async move { store.list_children(&cred, &query).await }.boxed()
        })
        .await
    }

    /// Creates a folder under `parent`.
    ///
    /// # Errors
    ///
    /// Terminal [`TransferError`] after local recovery is spent.
    #[instrument(skip(self))]
    pub async fn create_folder(
        &self,
        parent: &str,
        name: &str,
    ) -> Result<RemoteObject, TransferError> {
        let store = Arc::clone(&self.store);
        let parent = parent.to_owned();
        let name = name.to_owned();
        self.call("files.create", move |cred| {
            let store = Arc::clone(&store);
            let parent = parent.clone();
            let name = name.clone();
            async move { store.create_folder(&cred, &parent, &name).await }.boxed()
        })
        .await
    }

    /// Server-side copy of `src_id` into `dest_parent`.
    ///
    /// # Errors
    ///
    /// Terminal [`TransferError`] after local recovery is spent.
    #[instrument(skip(self))]
    pub async fn copy_file(
        &self,
        src_id: &str,
        dest_parent: &str,
    ) -> Result<RemoteObject, TransferError> {
        let store = Arc::clone(&self.store);
        let src_id = src_id.to_owned();
        let dest_parent = dest_parent.to_owned();
        self.call("files.copy", move |cred| {
            let store = Arc::clone(&store);
            let src_id = src_id.clone();
            let dest_parent = dest_parent.clone();
            async move { store.copy_file(&cred, &src_id, &dest_parent).await }.boxed()
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_delay_grows_and_caps() {
        let first = backoff_delay(0);
        assert!(first >= Duration::from_millis(500));
        assert!(first <= Duration::from_millis(750));

        let third = backoff_delay(2);
        assert!(third >= Duration::from_secs(2));

        let huge = backoff_delay(30);
        assert!(huge <= BACKOFF_MAX + Duration::from_millis(BACKOFF_JITTER_MS));
    }
}
